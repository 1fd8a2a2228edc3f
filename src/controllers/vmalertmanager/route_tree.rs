// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::parse_duration;
use crate::crds::Route;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

/// Nesting deeper than this is rejected; it also bounds input that tries to
/// loop by re-embedding itself.
pub const MAX_ROUTE_DEPTH: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("route tree is nested deeper than {0} levels")]
    TooDeep(usize),

    #[error("cannot parse nested route {index} at depth {depth}: {message}")]
    Malformed { depth: usize, index: usize, message: String },

    #[error("cannot parse matchers {matcher:?} of route with receiver {receiver:?}: {message}")]
    Matcher {
        receiver: String,
        matcher: String,
        message: String,
    },

    #[error("invalid {field} {value:?}, expected a duration like 30s")]
    Duration { field: &'static str, value: String },
}

/// RouteNode is a fully expanded route: its own settings plus owned children.
/// `route.routes` is always empty; the children live in `children`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteNode {
    pub route: Route,
    pub children: Vec<RouteNode>,
}

impl RouteNode {
    pub fn depth(&self) -> usize {
        1 + self.children.iter().map(RouteNode::depth).max().unwrap_or(0)
    }

    /// Visits this node and every descendant, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Route)) {
        visit(&self.route);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// Renders the tree back into alertmanager's route layout. `rename` maps
    /// receiver and time interval names.
    pub fn render(&self, rename: &dyn Fn(&str) -> String) -> Result<Value, serde_json::Error> {
        let mut route = self.route.clone();
        route.receiver = route.receiver.as_deref().map(|r| rename(r));
        route.mute_time_intervals = route.mute_time_intervals.iter().map(|n| rename(n)).collect();
        route.active_time_intervals = route.active_time_intervals.iter().map(|n| rename(n)).collect();
        route.routes = self
            .children
            .iter()
            .map(|c| c.render(rename))
            .collect::<Result<Vec<_>, _>>()?;
        serde_json::to_value(&route)
    }
}

/// Expands a route whose children are raw fragments into an owned tree,
/// validating every level on the way down.
pub fn expand(route: &Route) -> Result<RouteNode, RouteError> {
    expand_at(route, 1)
}

fn expand_at(route: &Route, depth: usize) -> Result<RouteNode, RouteError> {
    if depth > MAX_ROUTE_DEPTH {
        return Err(RouteError::TooDeep(MAX_ROUTE_DEPTH));
    }
    validate_route(route)?;
    let mut children = Vec::with_capacity(route.routes.len());
    for (index, raw) in route.routes.iter().enumerate() {
        let child: Route = serde_json::from_value(raw.clone()).map_err(|e| RouteError::Malformed {
            depth: depth + 1,
            index,
            message: e.to_string(),
        })?;
        children.push(expand_at(&child, depth + 1)?);
    }
    let mut own = route.clone();
    own.routes.clear();
    Ok(RouteNode { route: own, children })
}

fn validate_route(route: &Route) -> Result<(), RouteError> {
    for matcher in &route.matchers {
        parse_matchers(matcher).map_err(|message| RouteError::Matcher {
            receiver: route.receiver.clone().unwrap_or_default(),
            matcher: matcher.clone(),
            message,
        })?;
    }
    let durations = [
        ("group_wait", &route.group_wait),
        ("group_interval", &route.group_interval),
        ("repeat_interval", &route.repeat_interval),
    ];
    for (field, value) in durations {
        if let Some(value) = value {
            if parse_duration(value).is_none() {
                return Err(RouteError::Duration {
                    field,
                    value: value.clone(),
                });
            }
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

fn matcher_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*(=~|!~|!=|=)\s*(.*?)\s*$").ok())
        .as_ref()
}

/// Splits on commas that are not inside a double-quoted value.
fn split_matchers(input: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in input.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ',' if !quoted => {
                parts.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

fn unquote(value: &str) -> Result<String, String> {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        serde_json::from_str::<String>(value).map_err(|e| format!("bad quoted value {}: {}", value, e))
    } else if value.contains('"') {
        Err(format!("unbalanced quotes in {}", value))
    } else {
        Ok(value.to_string())
    }
}

/// Parses an alertmanager matcher expression such as `{severity=~"crit|warn",team!="ops"}`.
pub fn parse_matchers(input: &str) -> Result<Vec<Matcher>, String> {
    let trimmed = input.trim();
    let body = match (trimmed.strip_prefix('{'), trimmed.ends_with('}')) {
        (Some(rest), true) => &rest[..rest.len() - 1],
        (None, false) => trimmed,
        _ => return Err("unbalanced braces".to_string()),
    };
    if body.trim().is_empty() {
        return if trimmed.starts_with('{') {
            Ok(Vec::new())
        } else {
            Err("empty matcher".to_string())
        };
    }
    let re = matcher_regex().ok_or_else(|| "matcher grammar unavailable".to_string())?;
    let mut matchers = Vec::new();
    for part in split_matchers(body) {
        if part.trim().is_empty() {
            continue;
        }
        let caps = re
            .captures(part)
            .ok_or_else(|| format!("bad matcher format: {}", part.trim()))?;
        let op = match &caps[2] {
            "=" => MatchOp::Equal,
            "!=" => MatchOp::NotEqual,
            "=~" => MatchOp::Regex,
            _ => MatchOp::NotRegex,
        };
        let value = unquote(&caps[3])?;
        if matches!(op, MatchOp::Regex | MatchOp::NotRegex) {
            Regex::new(&format!("^(?:{})$", value)).map_err(|e| format!("invalid regex {:?}: {}", value, e))?;
        }
        matchers.push(Matcher {
            name: caps[1].to_string(),
            op,
            value,
        });
    }
    Ok(matchers)
}
