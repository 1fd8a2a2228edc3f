// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::route_tree::{expand, parse_matchers, RouteNode};
use crate::crds::{InhibitRule, VMAlertmanagerConfig};
use crate::kubernetes_api_objects::KubeResource;
use crate::reconciler::graph::ParseError;
use kube::ResourceExt;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

pub const BASE_CONFIG_SOURCE: &str = "configRawYaml";
pub const BLACKHOLE_RECEIVER: &str = "blackhole";

/// The rendered alertmanager.yaml and every fragment left out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledConfig {
    pub yaml: String,
    pub errors: Vec<ParseError>,
}

/// Parse errors of a config are reported under its object key.
pub fn config_source(cfg: &VMAlertmanagerConfig) -> String {
    KubeResource::object_ref(cfg).to_string()
}

fn default_base() -> Map<String, Value> {
    let mut route = Map::new();
    route.insert("receiver".to_string(), Value::String(BLACKHOLE_RECEIVER.to_string()));
    let mut receiver = Map::new();
    receiver.insert("name".to_string(), Value::String(BLACKHOLE_RECEIVER.to_string()));
    let mut base = Map::new();
    base.insert("route".to_string(), Value::Object(route));
    base.insert("receivers".to_string(), Value::Array(vec![Value::Object(receiver)]));
    base
}

fn parse_base(raw: Option<&str>) -> Result<Map<String, Value>, String> {
    let raw = match raw {
        Some(raw) if !raw.trim().is_empty() => raw,
        _ => return Ok(default_base()),
    };
    let parsed: serde_yaml::Value = serde_yaml::from_str(raw).map_err(|e| e.to_string())?;
    let value = serde_json::to_value(parsed).map_err(|e| e.to_string())?;
    match value {
        Value::Object(map) if map.get("route").map_or(false, Value::is_object) => Ok(map),
        Value::Object(_) => Err("base configuration has no route".to_string()),
        _ => Err("base configuration must be a YAML mapping".to_string()),
    }
}

fn named_items(items: &[Value], what: &str) -> Result<BTreeSet<String>, String> {
    let mut names = BTreeSet::new();
    for item in items {
        let name = item
            .get("name")
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| format!("{} without a name", what))?;
        if !names.insert(name.to_string()) {
            return Err(format!("duplicate {} name {}", what, name));
        }
    }
    Ok(names)
}

fn validate_inhibit_rule(rule: &InhibitRule) -> Result<(), String> {
    for matcher in rule.source_matchers.iter().chain(rule.target_matchers.iter()) {
        parse_matchers(matcher).map_err(|e| format!("inhibit rule matcher {:?}: {}", matcher, e))?;
    }
    Ok(())
}

/// A config that passed every check, ready to be merged into the base.
struct Accepted<'a> {
    cfg: &'a VMAlertmanagerConfig,
    route: Option<RouteNode>,
}

fn check_config(cfg: &VMAlertmanagerConfig) -> Result<Accepted<'_>, String> {
    let receivers = named_items(&cfg.spec.receivers, "receiver")?;
    let intervals = named_items(&cfg.spec.time_intervals, "time interval")?;
    for rule in &cfg.spec.inhibit_rules {
        validate_inhibit_rule(rule)?;
    }
    let route = match &cfg.spec.route {
        None => None,
        Some(route) => {
            if route.receiver.as_deref().map_or(true, str::is_empty) {
                return Err("route must name a receiver".to_string());
            }
            let node = expand(route).map_err(|e| e.to_string())?;
            let mut missing = Vec::new();
            node.walk(&mut |r| {
                if let Some(receiver) = r.receiver.as_deref() {
                    if !receivers.contains(receiver) {
                        missing.push(format!("receiver {}", receiver));
                    }
                }
                for interval in r.mute_time_intervals.iter().chain(r.active_time_intervals.iter()) {
                    if !intervals.contains(interval) {
                        missing.push(format!("time interval {}", interval));
                    }
                }
            });
            if !missing.is_empty() {
                return Err(format!("route references undefined {}", missing.join(", ")));
            }
            Some(node)
        }
    };
    Ok(Accepted { cfg, route })
}

fn prefixed(prefix: &str, item: &Value) -> Value {
    let mut item = item.clone();
    if let Some(obj) = item.as_object_mut() {
        if let Some(name) = obj.get("name").and_then(Value::as_str) {
            let renamed = format!("{}{}", prefix, name);
            obj.insert("name".to_string(), Value::String(renamed));
        }
    }
    item
}

fn namespace_matcher(namespace: &str) -> String {
    format!("namespace=\"{}\"", namespace)
}

fn render_inhibit_rule(rule: &InhibitRule, namespace: &str) -> Result<Value, serde_json::Error> {
    let mut rule = rule.clone();
    rule.source_matchers.push(namespace_matcher(namespace));
    rule.target_matchers.push(namespace_matcher(namespace));
    serde_json::to_value(&rule)
}

fn append_to(base: &mut Map<String, Value>, key: &str, items: Vec<Value>) {
    if items.is_empty() {
        return;
    }
    let entry = base.entry(key.to_string()).or_insert_with(|| Value::Array(Vec::new()));
    match entry {
        Value::Array(existing) => existing.extend(items),
        other => *other = Value::Array(items),
    }
}

/// Compiles the base configuration and the selected configs into one
/// alertmanager.yaml. Configs are applied in namespace/name order, so the
/// output only depends on the set of inputs. A config failing any check is
/// left out and reported; the rest still compile.
pub fn compile(
    base_raw: Option<&str>,
    configs: &[VMAlertmanagerConfig],
    enforce_continue: bool,
) -> CompiledConfig {
    let mut errors = Vec::new();
    let mut base = parse_base(base_raw).unwrap_or_else(|message| {
        errors.push(ParseError::new(BASE_CONFIG_SOURCE, message));
        default_base()
    });

    let mut sorted: Vec<&VMAlertmanagerConfig> = configs.iter().collect();
    sorted.sort_by_key(|c| (c.namespace().unwrap_or_default(), c.name_any()));

    let mut routes = Vec::new();
    let mut receivers = Vec::new();
    let mut intervals = Vec::new();
    let mut inhibit_rules = Vec::new();
    for cfg in sorted {
        let accepted = match check_config(cfg) {
            Ok(accepted) => accepted,
            Err(message) => {
                errors.push(ParseError::new(config_source(cfg), message));
                continue;
            }
        };
        match render_config(&accepted, enforce_continue) {
            Ok(rendered) => {
                routes.extend(rendered.route);
                receivers.extend(rendered.receivers);
                intervals.extend(rendered.intervals);
                inhibit_rules.extend(rendered.inhibit_rules);
            }
            Err(err) => errors.push(ParseError::new(config_source(cfg), err.to_string())),
        }
    }

    if let Some(Value::Object(route)) = base.get_mut("route") {
        let existing = match route.remove("routes") {
            Some(Value::Array(existing)) => existing,
            _ => Vec::new(),
        };
        routes.extend(existing);
        if !routes.is_empty() {
            route.insert("routes".to_string(), Value::Array(routes));
        }
    }
    append_to(&mut base, "receivers", receivers);
    append_to(&mut base, "time_intervals", intervals);
    append_to(&mut base, "inhibit_rules", inhibit_rules);

    let yaml = serde_yaml::to_string(&Value::Object(base)).unwrap_or_else(|e| {
        errors.push(ParseError::new(BASE_CONFIG_SOURCE, e.to_string()));
        String::new()
    });
    CompiledConfig { yaml, errors }
}

struct Rendered {
    route: Option<Value>,
    receivers: Vec<Value>,
    intervals: Vec<Value>,
    inhibit_rules: Vec<Value>,
}

fn render_config(accepted: &Accepted<'_>, enforce_continue: bool) -> Result<Rendered, serde_json::Error> {
    let cfg = accepted.cfg;
    let namespace = cfg.namespace().unwrap_or_default();
    let prefix = format!("{}-{}-", namespace, cfg.name_any());
    let route = match &accepted.route {
        None => None,
        Some(node) => {
            let mut top = node.clone();
            top.route.matchers.push(namespace_matcher(&namespace));
            if enforce_continue {
                top.route.continue_ = true;
            }
            Some(top.render(&|name: &str| format!("{}{}", prefix, name))?)
        }
    };
    Ok(Rendered {
        route,
        receivers: cfg.spec.receivers.iter().map(|r| prefixed(&prefix, r)).collect(),
        intervals: cfg.spec.time_intervals.iter().map(|t| prefixed(&prefix, t)).collect(),
        inhibit_rules: cfg
            .spec
            .inhibit_rules
            .iter()
            .map(|r| render_inhibit_rule(r, &namespace))
            .collect::<Result<Vec<_>, _>>()?,
    })
}
