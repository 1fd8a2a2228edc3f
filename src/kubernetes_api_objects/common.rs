// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{VMAgent, VMAlertmanager, VMAlertmanagerConfig, VMCluster};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use kube::api::ApiResource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind enumerates every object kind the operator reads or writes.
/// The native kinds come first in the order they are applied inside one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    ConfigMapKind,
    SecretKind,
    PersistentVolumeClaimKind,
    ServiceKind,
    StatefulSetKind,
    DeploymentKind,
    PodKind,
    VMClusterKind,
    VMAgentKind,
    VMAlertmanagerKind,
    VMAlertmanagerConfigKind,
}

impl Kind {
    /// Kinds the operator creates on behalf of an intent and may prune.
    pub const OWNED: [Kind; 6] = [
        Kind::ConfigMapKind,
        Kind::SecretKind,
        Kind::PersistentVolumeClaimKind,
        Kind::ServiceKind,
        Kind::StatefulSetKind,
        Kind::DeploymentKind,
    ];

    pub fn api_resource(&self) -> ApiResource {
        match self {
            Kind::ConfigMapKind => ApiResource::erase::<ConfigMap>(&()),
            Kind::SecretKind => ApiResource::erase::<Secret>(&()),
            Kind::PersistentVolumeClaimKind => ApiResource::erase::<PersistentVolumeClaim>(&()),
            Kind::ServiceKind => ApiResource::erase::<Service>(&()),
            Kind::StatefulSetKind => ApiResource::erase::<StatefulSet>(&()),
            Kind::DeploymentKind => ApiResource::erase::<Deployment>(&()),
            Kind::PodKind => ApiResource::erase::<Pod>(&()),
            Kind::VMClusterKind => ApiResource::erase::<VMCluster>(&()),
            Kind::VMAgentKind => ApiResource::erase::<VMAgent>(&()),
            Kind::VMAlertmanagerKind => ApiResource::erase::<VMAlertmanager>(&()),
            Kind::VMAlertmanagerConfigKind => ApiResource::erase::<VMAlertmanagerConfig>(&()),
        }
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Kind::ConfigMapKind => "ConfigMap",
            Kind::SecretKind => "Secret",
            Kind::PersistentVolumeClaimKind => "PersistentVolumeClaim",
            Kind::ServiceKind => "Service",
            Kind::StatefulSetKind => "StatefulSet",
            Kind::DeploymentKind => "Deployment",
            Kind::PodKind => "Pod",
            Kind::VMClusterKind => "VMCluster",
            Kind::VMAgentKind => "VMAgent",
            Kind::VMAlertmanagerKind => "VMAlertmanager",
            Kind::VMAlertmanagerConfigKind => "VMAlertmanagerConfig",
        }
    }

    pub fn from_kind_str(kind: &str) -> Option<Kind> {
        [
            Kind::ConfigMapKind,
            Kind::SecretKind,
            Kind::PersistentVolumeClaimKind,
            Kind::ServiceKind,
            Kind::StatefulSetKind,
            Kind::DeploymentKind,
            Kind::PodKind,
            Kind::VMClusterKind,
            Kind::VMAgentKind,
            Kind::VMAlertmanagerKind,
            Kind::VMAlertmanagerConfigKind,
        ]
        .into_iter()
        .find(|k| k.kind_str() == kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind_str())
    }
}

/// ObjectRef identifies one object in the store by (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectRef {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: Kind, namespace: &str, name: &str) -> ObjectRef {
        ObjectRef {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}
