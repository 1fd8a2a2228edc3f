// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{KubeObject, ObjectRef};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "vm-operator";
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";
pub const NAME_LABEL: &str = "app.kubernetes.io/name";

/// Labels selecting the pods of one component of one intent.
pub fn selector_labels(component: &str, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (NAME_LABEL.to_string(), component.to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

/// Labels carried by every object the operator creates for `instance`.
pub fn owned_selector(instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INSTANCE_LABEL.to_string(), instance.to_string()),
        (MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string()),
    ])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloutPolicy {
    pub pod_ready_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraphEntry {
    pub component: String,
    pub object: KubeObject,
    /// Set for StatefulSets whose pods are replaced by the rollout orchestrator.
    pub rollout: Option<RolloutPolicy>,
}

/// ObjectGraph is the desired state of one intent, in apply order.
/// Supporting objects are pushed before the workloads that mount them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectGraph {
    entries: Vec<GraphEntry>,
    retained: BTreeSet<ObjectRef>,
}

impl ObjectGraph {
    pub fn new() -> ObjectGraph {
        ObjectGraph::default()
    }

    pub fn push(&mut self, component: &str, object: impl Into<KubeObject>) {
        self.entries.push(GraphEntry {
            component: component.to_string(),
            object: object.into(),
            rollout: None,
        });
    }

    pub fn push_stateful(&mut self, component: &str, sts: StatefulSet, policy: RolloutPolicy) {
        self.entries.push(GraphEntry {
            component: component.to_string(),
            object: KubeObject::StatefulSet(sts),
            rollout: Some(policy),
        });
    }

    /// Marks an object that must be neither written nor pruned this pass,
    /// used when its content could not be rendered.
    pub fn retain(&mut self, key: ObjectRef) {
        self.retained.insert(key);
    }

    pub fn entries(&self) -> &[GraphEntry] {
        &self.entries
    }

    pub fn retained(&self) -> &BTreeSet<ObjectRef> {
        &self.retained
    }

    pub fn get(&self, key: &ObjectRef) -> Option<&KubeObject> {
        self.entries
            .iter()
            .map(|e| &e.object)
            .find(|o| &o.object_ref() == key)
    }

    /// Keys that must exist after this pass: desired plus retained objects.
    pub fn keys(&self) -> BTreeSet<ObjectRef> {
        self.entries
            .iter()
            .map(|e| e.object.object_ref())
            .chain(self.retained.iter().cloned())
            .collect()
    }

    pub fn set_owner(&mut self, owner: &OwnerReference) {
        for entry in self.entries.iter_mut() {
            entry.object.metadata_mut().owner_references = Some(vec![owner.clone()]);
        }
    }
}

/// A nested configuration fragment that failed to parse or validate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub source: String,
    pub message: String,
}

impl ParseError {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> ParseError {
        ParseError {
            source: source.into(),
            message: message.into(),
        }
    }
}

/// Synthesis is what a synthesizer hands to the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Synthesis {
    pub graph: ObjectGraph,
    pub parse_errors: Vec<ParseError>,
}
