// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{VMAgent, VMAlertmanager, VMAlertmanagerConfig, VMCluster};
use crate::kubernetes_api_objects::{common::*, error::*};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use kube::api::DynamicObject;
use kube::core::NamespaceResourceScope;
use kube::Resource;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// KubeResource is implemented by every typed object the operator exchanges with the store.
/// The store itself speaks DynamicObject so that one seam serves all kinds.
pub trait KubeResource:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    const KIND: Kind;

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(
            Self::KIND,
            self.meta().namespace.as_deref().unwrap_or_default(),
            self.meta().name.as_deref().unwrap_or_default(),
        )
    }

    fn to_dynamic(&self) -> Result<DynamicObject, StoreError> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    fn from_dynamic(obj: &DynamicObject) -> Result<Self, StoreError> {
        let value = serde_json::to_value(obj)?;
        serde_json::from_value(value).map_err(|e| {
            StoreError::Serialization(format!(
                "{}/{}: {}",
                Self::KIND,
                obj.metadata.name.as_deref().unwrap_or_default(),
                e
            ))
        })
    }
}

macro_rules! impl_kube_resource {
    ($($t:ty => $kind:expr),* $(,)?) => {
        $(impl KubeResource for $t {
            const KIND: Kind = $kind;
        })*
    };
}

impl_kube_resource! {
    ConfigMap => Kind::ConfigMapKind,
    Secret => Kind::SecretKind,
    PersistentVolumeClaim => Kind::PersistentVolumeClaimKind,
    Service => Kind::ServiceKind,
    StatefulSet => Kind::StatefulSetKind,
    Deployment => Kind::DeploymentKind,
    Pod => Kind::PodKind,
    VMCluster => Kind::VMClusterKind,
    VMAgent => Kind::VMAgentKind,
    VMAlertmanager => Kind::VMAlertmanagerKind,
    VMAlertmanagerConfig => Kind::VMAlertmanagerConfigKind,
}

pub fn dynamic_ref(kind: Kind, obj: &DynamicObject) -> ObjectRef {
    ObjectRef::new(
        kind,
        obj.metadata.namespace.as_deref().unwrap_or_default(),
        obj.metadata.name.as_deref().unwrap_or_default(),
    )
}
