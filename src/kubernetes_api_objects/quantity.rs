// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

/// Quantities follow the Kubernetes resource quantity grammar:
/// a signed decimal number with an optional binary, decimal or exponent suffix.
fn quantity_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+))((?:[eE][+-]?[0-9]+)|Ki|Mi|Gi|Ti|Pi|Ei|m|k|M|G|T|P|E)?$").ok()
    })
    .as_ref()
}

/// Returns the numeric value of a quantity string, or None if it does not parse.
pub fn parse_quantity(quantity: &str) -> Option<f64> {
    let caps = quantity_regex()?.captures(quantity.trim())?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let multiplier = match caps.get(2).map(|m| m.as_str()) {
        None => 1.0,
        Some("Ki") => 1024f64,
        Some("Mi") => 1024f64.powi(2),
        Some("Gi") => 1024f64.powi(3),
        Some("Ti") => 1024f64.powi(4),
        Some("Pi") => 1024f64.powi(5),
        Some("Ei") => 1024f64.powi(6),
        Some("m") => 1e-3,
        Some("k") => 1e3,
        Some("M") => 1e6,
        Some("G") => 1e9,
        Some("T") => 1e12,
        Some("P") => 1e15,
        Some("E") => 1e18,
        Some(exp) => 10f64.powi(exp[1..].parse::<i32>().ok()?),
    };
    Some(number * multiplier)
}

pub fn is_valid_quantity(quantity: &str) -> bool {
    parse_quantity(quantity).is_some()
}

/// Compares two quantities by value. Unparsable quantities compare as None.
pub fn cmp_quantity(a: &Quantity, b: &Quantity) -> Option<Ordering> {
    parse_quantity(&a.0)?.partial_cmp(&parse_quantity(&b.0)?)
}
