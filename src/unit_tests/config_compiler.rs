// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::controllers::vmalertmanager::config_compiler::*;
use crate::crds::{VMAlertmanagerConfig, VMAlertmanagerConfigSpec};
use serde_json::{json, Value};

fn alertmanager_config(namespace: &str, name: &str, spec: Value) -> VMAlertmanagerConfig {
    let spec: VMAlertmanagerConfigSpec = serde_json::from_value(spec).unwrap();
    let mut cfg = VMAlertmanagerConfig::new(name, spec);
    cfg.metadata.namespace = Some(namespace.to_string());
    cfg
}

fn team_config(namespace: &str, name: &str) -> VMAlertmanagerConfig {
    alertmanager_config(
        namespace,
        name,
        json!({
            "route": { "receiver": "pager", "matchers": ["severity=\"critical\""] },
            "receivers": [{ "name": "pager", "webhook_configs": [{ "url": "http://pager" }] }],
            "inhibit_rules": [{ "source_matchers": ["severity=\"critical\""], "target_matchers": ["severity=\"warning\""] }]
        }),
    )
}

fn parsed(yaml: &str) -> Value {
    let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
    serde_json::to_value(value).unwrap()
}

fn receiver_names(config: &Value) -> Vec<String> {
    config["receivers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap().to_string())
        .collect()
}

#[test]
pub fn test_default_base_routes_to_blackhole() {
    println!("Testing compilation without base or configs...");
    let compiled = compile(None, &[], true);
    assert!(compiled.errors.is_empty());
    let config = parsed(&compiled.yaml);
    assert_eq!(config["route"]["receiver"], Value::from(BLACKHOLE_RECEIVER));
    assert_eq!(receiver_names(&config), vec![BLACKHOLE_RECEIVER]);
}

#[test]
pub fn test_configs_are_namespaced_and_ordered() {
    println!("Testing prefixing, namespace matchers and ordering...");
    let base = "route:\n  receiver: base\n  routes:\n  - receiver: base\n    matchers: ['team=\"infra\"']\nreceivers:\n- name: base\n";
    let configs = vec![team_config("prod", "b"), team_config("dev", "z"), team_config("prod", "a")];
    let compiled = compile(Some(base), &configs, true);
    assert!(compiled.errors.is_empty(), "{:?}", compiled.errors);
    let config = parsed(&compiled.yaml);

    assert_eq!(
        receiver_names(&config),
        vec!["base", "dev-z-pager", "prod-a-pager", "prod-b-pager"]
    );
    let routes = config["route"]["routes"].as_array().unwrap();
    let route_receivers: Vec<&str> = routes.iter().map(|r| r["receiver"].as_str().unwrap()).collect();
    assert_eq!(route_receivers, vec!["dev-z-pager", "prod-a-pager", "prod-b-pager", "base"]);
    assert_eq!(
        routes[1]["matchers"],
        json!(["severity=\"critical\"", "namespace=\"prod\""])
    );
    assert_eq!(routes[1]["continue"], Value::from(true));
    assert_eq!(routes[3]["receiver"], Value::from("base"));

    let inhibit = &config["inhibit_rules"][0];
    assert_eq!(
        inhibit["source_matchers"],
        json!(["severity=\"critical\"", "namespace=\"dev\""])
    );
    assert_eq!(
        inhibit["target_matchers"],
        json!(["severity=\"warning\"", "namespace=\"dev\""])
    );
}

#[test]
pub fn test_output_is_independent_of_input_order() {
    println!("Testing deterministic compilation...");
    let forward = compile(None, &[team_config("ns", "a"), team_config("ns", "b")], true);
    let backward = compile(None, &[team_config("ns", "b"), team_config("ns", "a")], true);
    assert_eq!(forward, backward);
}

#[test]
pub fn test_continue_is_left_alone_when_not_enforced() {
    println!("Testing disabled continue enforcement...");
    let compiled = compile(None, &[team_config("ns", "a")], false);
    let config = parsed(&compiled.yaml);
    assert_eq!(config["route"]["routes"][0]["continue"], Value::from(false));
}

#[test]
pub fn test_bad_config_is_excluded_and_reported() {
    println!("Testing that one broken config does not block the others...");
    let broken = alertmanager_config(
        "ns",
        "broken",
        json!({
            "route": { "receiver": "missing" },
            "receivers": [{ "name": "pager" }]
        }),
    );
    let compiled = compile(None, &[team_config("ns", "good"), broken.clone()], true);
    assert_eq!(compiled.errors.len(), 1);
    assert_eq!(compiled.errors[0].source, config_source(&broken));
    assert_eq!(compiled.errors[0].source, "VMAlertmanagerConfig/ns/broken");
    assert!(compiled.errors[0].message.contains("undefined receiver missing"));

    let config = parsed(&compiled.yaml);
    assert_eq!(receiver_names(&config), vec![BLACKHOLE_RECEIVER, "ns-good-pager"]);
    assert!(!compiled.yaml.contains("broken"));
}

#[test]
pub fn test_config_checks() {
    println!("Testing per-config validation rules...");
    let cases = vec![
        json!({ "receivers": [{ "name": "a" }, { "name": "a" }] }),
        json!({ "receivers": [{ "webhook_configs": [] }] }),
        json!({ "route": { "receiver": "" }, "receivers": [{ "name": "a" }] }),
        json!({ "route": { "receiver": "a", "mute_time_intervals": ["night"] }, "receivers": [{ "name": "a" }] }),
        json!({ "receivers": [{ "name": "a" }], "inhibit_rules": [{ "source_matchers": ["bad matcher"] }] }),
        json!({ "route": { "receiver": "a", "group_wait": "later" }, "receivers": [{ "name": "a" }] }),
    ];
    for (i, spec) in cases.into_iter().enumerate() {
        let cfg = alertmanager_config("ns", &format!("case-{}", i), spec);
        let compiled = compile(None, &[cfg], true);
        assert_eq!(compiled.errors.len(), 1, "case {} should be rejected", i);
    }

    let with_interval = alertmanager_config(
        "ns",
        "intervals",
        json!({
            "route": { "receiver": "a", "mute_time_intervals": ["night"] },
            "receivers": [{ "name": "a" }],
            "time_intervals": [{ "name": "night", "time_intervals": [{ "times": [{ "start_time": "22:00", "end_time": "23:59" }] }] }]
        }),
    );
    let compiled = compile(None, &[with_interval], true);
    assert!(compiled.errors.is_empty());
    let config = parsed(&compiled.yaml);
    assert_eq!(config["time_intervals"][0]["name"], Value::from("ns-intervals-night"));
    assert_eq!(
        config["route"]["routes"][0]["mute_time_intervals"],
        json!(["ns-intervals-night"])
    );
}

#[test]
pub fn test_bad_base_falls_back_to_default() {
    println!("Testing an invalid base configuration...");
    for base in ["receivers: []\n", "- a\n- b\n", "route: [unclosed\n"] {
        let compiled = compile(Some(base), &[team_config("ns", "a")], true);
        assert_eq!(compiled.errors.len(), 1, "base {:?}", base);
        assert_eq!(compiled.errors[0].source, BASE_CONFIG_SOURCE);
        let config = parsed(&compiled.yaml);
        assert_eq!(config["route"]["receiver"], Value::from(BLACKHOLE_RECEIVER));
        assert_eq!(receiver_names(&config), vec![BLACKHOLE_RECEIVER, "ns-a-pager"]);
    }
}
