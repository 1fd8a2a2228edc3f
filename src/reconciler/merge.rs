// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::quantity::cmp_quantity;
use crate::kubernetes_api_objects::KubeObject;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PersistentVolumeClaim, PodSpec, PodTemplateSpec, ResourceRequirements, Secret,
    Service, ServicePort, ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const HEADLESS_CLUSTER_IP: &str = "None";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAction {
    Create,
    Update,
    /// The live object holds an immutable field that has to change.
    Recreate,
    NoOp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: MergeAction,
    pub object: KubeObject,
}

/// Computes the transition of one object from its live state to `desired`.
///
/// Fields the engine owns are taken from `desired`, fields the platform or
/// other actors own are kept from `live`. An update carries the live version
/// token. When the merged object is a semantic derivative of the live one
/// and every engine-owned field matches exactly, the action is NoOp.
pub fn reconcile_object(desired: &KubeObject, live: Option<&KubeObject>) -> Decision {
    let live = match live {
        None => {
            return Decision {
                action: MergeAction::Create,
                object: desired.clone(),
            }
        }
        Some(live) => live,
    };
    let (merged, recreate) = match (desired, live) {
        (KubeObject::ConfigMap(d), KubeObject::ConfigMap(l)) => (KubeObject::ConfigMap(merge_config_map(d, l)), false),
        (KubeObject::Secret(d), KubeObject::Secret(l)) => (KubeObject::Secret(merge_secret(d, l)), false),
        (KubeObject::PersistentVolumeClaim(d), KubeObject::PersistentVolumeClaim(l)) => {
            (KubeObject::PersistentVolumeClaim(merge_pvc(d, l)), false)
        }
        (KubeObject::Service(d), KubeObject::Service(l)) => {
            let (svc, recreate) = merge_service(d, l);
            (KubeObject::Service(svc), recreate)
        }
        (KubeObject::StatefulSet(d), KubeObject::StatefulSet(l)) => {
            (KubeObject::StatefulSet(merge_stateful_set(d, l)), false)
        }
        (KubeObject::Deployment(d), KubeObject::Deployment(l)) => (KubeObject::Deployment(merge_deployment(d, l)), false),
        // a kind mismatch cannot happen for the same key
        _ => (desired.clone(), true),
    };
    if recreate {
        let mut object = merged;
        let meta = object.metadata_mut();
        meta.resource_version = None;
        meta.uid = None;
        meta.creation_timestamp = None;
        meta.generation = None;
        return Decision {
            action: MergeAction::Recreate,
            object,
        };
    }
    if is_derivative_of(&merged, live) && !owned_fields_differ(&merged, live) {
        Decision {
            action: MergeAction::NoOp,
            object: live.clone(),
        }
    } else {
        Decision {
            action: MergeAction::Update,
            object: merged,
        }
    }
}

fn is_derivative_of(merged: &KubeObject, live: &KubeObject) -> bool {
    fn to_value(o: &KubeObject) -> Option<Value> {
        match o {
            KubeObject::ConfigMap(o) => serde_json::to_value(o).ok(),
            KubeObject::Secret(o) => serde_json::to_value(o).ok(),
            KubeObject::PersistentVolumeClaim(o) => serde_json::to_value(o).ok(),
            KubeObject::Service(o) => serde_json::to_value(o).ok(),
            KubeObject::StatefulSet(o) => serde_json::to_value(o).ok(),
            KubeObject::Deployment(o) => serde_json::to_value(o).ok(),
        }
    }
    match (to_value(merged), to_value(live)) {
        (Some(m), Some(l)) => is_derivative(&m, &l),
        _ => false,
    }
}

fn quantities_match(desired: Option<&BTreeMap<String, Quantity>>, live: Option<&BTreeMap<String, Quantity>>) -> bool {
    let empty = BTreeMap::new();
    let (desired, live) = (desired.unwrap_or(&empty), live.unwrap_or(&empty));
    desired.len() == live.len()
        && desired.iter().all(|(name, d)| {
            live.get(name)
                .map_or(false, |l| d == l || cmp_quantity(d, l) == Some(Ordering::Equal))
        })
}

fn resources_match(desired: Option<&ResourceRequirements>, live: Option<&ResourceRequirements>) -> bool {
    quantities_match(
        desired.and_then(|r| r.limits.as_ref()),
        live.and_then(|r| r.limits.as_ref()),
    ) && quantities_match(
        desired.and_then(|r| r.requests.as_ref()),
        live.and_then(|r| r.requests.as_ref()),
    )
}

/// The API server fills in the TCP protocol.
fn port_keys(container: &Container) -> Vec<(Option<&str>, i32, &str, Option<i32>)> {
    container
        .ports
        .iter()
        .flatten()
        .map(|p| {
            (
                p.name.as_deref(),
                p.container_port,
                p.protocol.as_deref().unwrap_or("TCP"),
                p.host_port,
            )
        })
        .collect()
}

fn container_matches(desired: &Container, live: &Container) -> bool {
    desired.name == live.name
        && desired.image == live.image
        && desired.args.as_deref().unwrap_or_default() == live.args.as_deref().unwrap_or_default()
        && desired.env.as_deref().unwrap_or_default() == live.env.as_deref().unwrap_or_default()
        && desired.volume_mounts.as_deref().unwrap_or_default() == live.volume_mounts.as_deref().unwrap_or_default()
        && port_keys(desired) == port_keys(live)
        && resources_match(desired.resources.as_ref(), live.resources.as_ref())
}

fn containers_match(desired: &[Container], live: &[Container]) -> bool {
    desired.len() == live.len() && desired.iter().zip(live).all(|(d, l)| container_matches(d, l))
}

fn volume_names(spec: &PodSpec) -> Vec<&str> {
    spec.volumes.iter().flatten().map(|v| v.name.as_str()).collect()
}

/// Compares the parts of a pod template the engine renders in full: labels,
/// containers and the set of volumes. Server defaults inside volumes are
/// left to the derivative check.
fn template_matches(desired: &PodTemplateSpec, live: &PodTemplateSpec) -> bool {
    let labels = |t: &PodTemplateSpec| t.metadata.as_ref().and_then(|m| m.labels.clone()).unwrap_or_default();
    if labels(desired) != labels(live) {
        return false;
    }
    match (desired.spec.as_ref(), live.spec.as_ref()) {
        (None, None) => true,
        (Some(d), Some(l)) => {
            containers_match(&d.containers, &l.containers)
                && containers_match(
                    d.init_containers.as_deref().unwrap_or_default(),
                    l.init_containers.as_deref().unwrap_or_default(),
                )
                && volume_names(d) == volume_names(l)
        }
        _ => false,
    }
}

fn replicas_match(desired: Option<i32>, live: Option<i32>) -> bool {
    desired.is_none() || desired == live
}

/// Engine-owned fields whose removal has to reach the live object, which the
/// derivative check alone would treat as unset.
fn owned_fields_differ(merged: &KubeObject, live: &KubeObject) -> bool {
    match (merged, live) {
        (KubeObject::ConfigMap(m), KubeObject::ConfigMap(l)) => {
            m.data.clone().unwrap_or_default() != l.data.clone().unwrap_or_default()
                || m.binary_data.clone().unwrap_or_default() != l.binary_data.clone().unwrap_or_default()
        }
        (KubeObject::Secret(m), KubeObject::Secret(l)) if m.string_data.is_none() => {
            m.data.clone().unwrap_or_default() != l.data.clone().unwrap_or_default()
        }
        (KubeObject::Service(m), KubeObject::Service(l)) => {
            let selector = |s: &Service| s.spec.as_ref().and_then(|s| s.selector.clone()).unwrap_or_default();
            selector(m) != selector(l)
        }
        (KubeObject::Deployment(m), KubeObject::Deployment(l)) => match (m.spec.as_ref(), l.spec.as_ref()) {
            (Some(m), Some(l)) => !replicas_match(m.replicas, l.replicas) || !template_matches(&m.template, &l.template),
            (m, l) => m.is_some() != l.is_some(),
        },
        (KubeObject::StatefulSet(m), KubeObject::StatefulSet(l)) => match (m.spec.as_ref(), l.spec.as_ref()) {
            (Some(m), Some(l)) => !replicas_match(m.replicas, l.replicas) || !template_matches(&m.template, &l.template),
            (m, l) => m.is_some() != l.is_some(),
        },
        _ => false,
    }
}

/// Reports whether every field set in `desired` equals the one in `live`.
/// Null and empty collections in `desired` count as unset.
pub fn is_derivative(desired: &Value, live: &Value) -> bool {
    match (desired, live) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(l)) => d.iter().all(|(k, dv)| match l.get(k) {
            Some(lv) => is_derivative(dv, lv),
            None => is_unset(dv),
        }),
        (Value::Array(d), Value::Array(l)) => {
            d.len() == l.len() && d.iter().zip(l.iter()).all(|(dv, lv)| is_derivative(dv, lv))
        }
        (d, Value::Null) => is_unset(d),
        (d, l) => d == l,
    }
}

fn is_unset(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::Object(m) => m.values().all(is_unset),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

pub fn is_derivative_typed<T: Serialize>(desired: &T, live: &T) -> bool {
    match (serde_json::to_value(desired), serde_json::to_value(live)) {
        (Ok(d), Ok(l)) => is_derivative(&d, &l),
        _ => false,
    }
}

fn merge_maps(
    desired: Option<&BTreeMap<String, String>>,
    live: Option<&BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (desired, live) {
        (None, None) => None,
        _ => {
            let mut merged = live.cloned().unwrap_or_default();
            if let Some(desired) = desired {
                merged.extend(desired.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            Some(merged)
        }
    }
}

/// Labels and annotations are merged with desired keys winning, owner
/// references are the engine's, everything else stays as the platform has it.
pub fn merge_metadata(desired: &ObjectMeta, live: &ObjectMeta) -> ObjectMeta {
    let mut meta = live.clone();
    meta.labels = merge_maps(desired.labels.as_ref(), live.labels.as_ref());
    meta.annotations = merge_maps(desired.annotations.as_ref(), live.annotations.as_ref());
    if desired.owner_references.is_some() {
        meta.owner_references = desired.owner_references.clone();
    }
    meta
}

fn merge_template_annotations(desired: &PodTemplateSpec, live: &PodTemplateSpec) -> PodTemplateSpec {
    let mut template = desired.clone();
    let live_annotations = live.metadata.as_ref().and_then(|m| m.annotations.as_ref());
    if live_annotations.is_some() {
        let meta = template.metadata.get_or_insert_with(ObjectMeta::default);
        meta.annotations = merge_maps(meta.annotations.as_ref(), live_annotations);
    }
    template
}

/// Keeps the live spelling of resource quantities that are equal in value,
/// as the API server stores them in canonical form.
fn keep_canonical_resources(template: &mut PodTemplateSpec, live: &PodTemplateSpec) {
    let (spec, live_spec) = match (template.spec.as_mut(), live.spec.as_ref()) {
        (Some(spec), Some(live_spec)) => (spec, live_spec),
        _ => return,
    };
    for container in spec.containers.iter_mut() {
        let live_container = live_spec.containers.iter().find(|c| c.name == container.name);
        if let Some(live_container) = live_container {
            if live_container.resources != container.resources
                && resources_match(container.resources.as_ref(), live_container.resources.as_ref())
            {
                container.resources = live_container.resources.clone();
            }
        }
    }
}

fn merge_config_map(desired: &ConfigMap, live: &ConfigMap) -> ConfigMap {
    ConfigMap {
        metadata: merge_metadata(&desired.metadata, &live.metadata),
        data: desired.data.clone(),
        binary_data: desired.binary_data.clone(),
        immutable: desired.immutable,
    }
}

fn merge_secret(desired: &Secret, live: &Secret) -> Secret {
    Secret {
        metadata: merge_metadata(&desired.metadata, &live.metadata),
        data: desired.data.clone(),
        string_data: desired.string_data.clone(),
        type_: desired.type_.clone().or_else(|| live.type_.clone()),
        immutable: desired.immutable,
    }
}

/// Only the requested size is engine-owned, and it only grows.
fn merge_pvc(desired: &PersistentVolumeClaim, live: &PersistentVolumeClaim) -> PersistentVolumeClaim {
    let mut merged = live.clone();
    merged.metadata = merge_metadata(&desired.metadata, &live.metadata);
    let desired_requests = desired
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref());
    if let (Some(desired_requests), Some(spec)) = (desired_requests, merged.spec.as_mut()) {
        let resources = spec.resources.get_or_insert_with(Default::default);
        let requests = resources.requests.get_or_insert_with(BTreeMap::new);
        for (name, quantity) in desired_requests {
            let shrink = requests
                .get(name)
                .map_or(false, |current| cmp_quantity(quantity, current) == Some(Ordering::Less));
            if !shrink {
                requests.insert(name.clone(), quantity.clone());
            }
        }
    }
    merged
}

fn has_node_ports(service_type: &str) -> bool {
    service_type == "NodePort" || service_type == "LoadBalancer"
}

fn is_auto_ip(ip: Option<&String>) -> bool {
    ip.map_or(true, |ip| ip.is_empty())
}

/// Resolves the clusterIP of a service update.
///
/// A concrete or headless desired value always wins. An unset (or empty)
/// desired value keeps an allocated live address, but falls back to auto
/// allocation when the live service is headless. ExternalName services carry
/// no address. Returns the new clusterIP, clusterIPs and whether the live
/// object has to be recreated because an assigned address would change.
fn resolve_cluster_ip(desired: &ServiceSpec, live: &ServiceSpec) -> (Option<String>, Option<Vec<String>>, bool) {
    let desired_type = desired.type_.as_deref().unwrap_or("ClusterIP");
    let live_ip = live.cluster_ip.clone().filter(|ip| !ip.is_empty());
    let (ip, ips) = if desired_type == "ExternalName" {
        (None, None)
    } else if !is_auto_ip(desired.cluster_ip.as_ref()) {
        let wanted = desired.cluster_ip.clone().unwrap_or_default();
        if live_ip.as_deref() == Some(wanted.as_str()) {
            (Some(wanted), live.cluster_ips.clone())
        } else {
            (Some(wanted.clone()), Some(vec![wanted]))
        }
    } else {
        match live_ip.as_deref() {
            Some(HEADLESS_CLUSTER_IP) | None => (None, None),
            Some(_) => (live_ip.clone(), live.cluster_ips.clone()),
        }
    };
    let recreate = desired_type != "ExternalName" && live_ip.is_some() && ip != live_ip;
    (ip, ips, recreate)
}

fn preserve_node_ports(desired: &mut [ServicePort], live: &[ServicePort]) {
    for port in desired.iter_mut().filter(|p| p.node_port.is_none()) {
        let by_name = port
            .name
            .as_ref()
            .and_then(|name| live.iter().find(|l| l.name.as_ref() == Some(name)));
        let matched = by_name.or_else(|| live.iter().find(|l| l.port == port.port));
        port.node_port = matched.and_then(|l| l.node_port);
    }
}

fn merge_service(desired: &Service, live: &Service) -> (Service, bool) {
    let desired_spec = desired.spec.clone().unwrap_or_default();
    let live_spec = live.spec.clone().unwrap_or_default();
    let desired_type = desired_spec.type_.clone().unwrap_or_else(|| "ClusterIP".to_string());
    let mut spec = desired_spec.clone();

    let (ip, ips, recreate) = resolve_cluster_ip(&desired_spec, &live_spec);
    spec.cluster_ip = ip;
    spec.cluster_ips = ips;

    if has_node_ports(&desired_type) {
        if let (Some(ports), Some(live_ports)) = (spec.ports.as_mut(), live_spec.ports.as_ref()) {
            preserve_node_ports(ports, live_ports);
        }
        spec.health_check_node_port = spec.health_check_node_port.or(live_spec.health_check_node_port);
        spec.external_traffic_policy = spec
            .external_traffic_policy
            .or_else(|| live_spec.external_traffic_policy.clone());
    }
    if desired_type != "ExternalName" {
        spec.ip_families = spec.ip_families.or_else(|| live_spec.ip_families.clone());
        spec.ip_family_policy = spec.ip_family_policy.or_else(|| live_spec.ip_family_policy.clone());
        spec.internal_traffic_policy = spec
            .internal_traffic_policy
            .or_else(|| live_spec.internal_traffic_policy.clone());
    }
    spec.session_affinity = spec.session_affinity.or_else(|| live_spec.session_affinity.clone());

    let merged = Service {
        metadata: merge_metadata(&desired.metadata, &live.metadata),
        spec: Some(spec),
        status: live.status.clone(),
    };
    (merged, recreate)
}

fn merge_deployment(desired: &Deployment, live: &Deployment) -> Deployment {
    let mut merged = live.clone();
    merged.metadata = merge_metadata(&desired.metadata, &live.metadata);
    if let Some(desired_spec) = desired.spec.as_ref() {
        let mut spec = desired_spec.clone();
        if let Some(live_spec) = live.spec.as_ref() {
            spec.template = merge_template_annotations(&desired_spec.template, &live_spec.template);
            keep_canonical_resources(&mut spec.template, &live_spec.template);
            spec.revision_history_limit = spec.revision_history_limit.or(live_spec.revision_history_limit);
            spec.progress_deadline_seconds = spec.progress_deadline_seconds.or(live_spec.progress_deadline_seconds);
        }
        merged.spec = Some(spec);
    }
    merged
}

fn merge_stateful_set(desired: &StatefulSet, live: &StatefulSet) -> StatefulSet {
    let mut merged = live.clone();
    merged.metadata = merge_metadata(&desired.metadata, &live.metadata);
    if let Some(desired_spec) = desired.spec.as_ref() {
        let mut spec = desired_spec.clone();
        if let Some(live_spec) = live.spec.as_ref() {
            spec.template = merge_template_annotations(&desired_spec.template, &live_spec.template);
            keep_canonical_resources(&mut spec.template, &live_spec.template);
            spec.selector = live_spec.selector.clone();
            spec.service_name = live_spec.service_name.clone();
            spec.pod_management_policy = live_spec.pod_management_policy.clone();
            spec.volume_claim_templates = live_spec.volume_claim_templates.clone();
        }
        merged.spec = Some(spec);
    }
    merged
}
