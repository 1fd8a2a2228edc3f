// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{common::*, error::*, resource::*};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;

/// KubeObject is one native object of a desired graph.
/// Keeping the concrete type lets the merge step apply per-kind field rules.
#[derive(Debug, Clone, PartialEq)]
pub enum KubeObject {
    ConfigMap(ConfigMap),
    Secret(Secret),
    PersistentVolumeClaim(PersistentVolumeClaim),
    Service(Service),
    StatefulSet(StatefulSet),
    Deployment(Deployment),
}

impl KubeObject {
    pub fn kind(&self) -> Kind {
        match self {
            KubeObject::ConfigMap(_) => Kind::ConfigMapKind,
            KubeObject::Secret(_) => Kind::SecretKind,
            KubeObject::PersistentVolumeClaim(_) => Kind::PersistentVolumeClaimKind,
            KubeObject::Service(_) => Kind::ServiceKind,
            KubeObject::StatefulSet(_) => Kind::StatefulSetKind,
            KubeObject::Deployment(_) => Kind::DeploymentKind,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            KubeObject::ConfigMap(o) => &o.metadata,
            KubeObject::Secret(o) => &o.metadata,
            KubeObject::PersistentVolumeClaim(o) => &o.metadata,
            KubeObject::Service(o) => &o.metadata,
            KubeObject::StatefulSet(o) => &o.metadata,
            KubeObject::Deployment(o) => &o.metadata,
        }
    }

    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            KubeObject::ConfigMap(o) => &mut o.metadata,
            KubeObject::Secret(o) => &mut o.metadata,
            KubeObject::PersistentVolumeClaim(o) => &mut o.metadata,
            KubeObject::Service(o) => &mut o.metadata,
            KubeObject::StatefulSet(o) => &mut o.metadata,
            KubeObject::Deployment(o) => &mut o.metadata,
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        let meta = self.metadata();
        ObjectRef::new(
            self.kind(),
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default(),
        )
    }

    pub fn to_dynamic(&self) -> Result<DynamicObject, StoreError> {
        match self {
            KubeObject::ConfigMap(o) => o.to_dynamic(),
            KubeObject::Secret(o) => o.to_dynamic(),
            KubeObject::PersistentVolumeClaim(o) => o.to_dynamic(),
            KubeObject::Service(o) => o.to_dynamic(),
            KubeObject::StatefulSet(o) => o.to_dynamic(),
            KubeObject::Deployment(o) => o.to_dynamic(),
        }
    }

    /// Parses a live object of the given kind back into its typed form.
    pub fn from_dynamic(kind: Kind, obj: &DynamicObject) -> Result<KubeObject, StoreError> {
        Ok(match kind {
            Kind::ConfigMapKind => KubeObject::ConfigMap(ConfigMap::from_dynamic(obj)?),
            Kind::SecretKind => KubeObject::Secret(Secret::from_dynamic(obj)?),
            Kind::PersistentVolumeClaimKind => {
                KubeObject::PersistentVolumeClaim(PersistentVolumeClaim::from_dynamic(obj)?)
            }
            Kind::ServiceKind => KubeObject::Service(Service::from_dynamic(obj)?),
            Kind::StatefulSetKind => KubeObject::StatefulSet(StatefulSet::from_dynamic(obj)?),
            Kind::DeploymentKind => KubeObject::Deployment(Deployment::from_dynamic(obj)?),
            other => {
                return Err(StoreError::Serialization(format!(
                    "{} is not a graph object kind",
                    other
                )))
            }
        })
    }
}

impl From<ConfigMap> for KubeObject {
    fn from(o: ConfigMap) -> Self {
        KubeObject::ConfigMap(o)
    }
}

impl From<Secret> for KubeObject {
    fn from(o: Secret) -> Self {
        KubeObject::Secret(o)
    }
}

impl From<PersistentVolumeClaim> for KubeObject {
    fn from(o: PersistentVolumeClaim) -> Self {
        KubeObject::PersistentVolumeClaim(o)
    }
}

impl From<Service> for KubeObject {
    fn from(o: Service) -> Self {
        KubeObject::Service(o)
    }
}

impl From<StatefulSet> for KubeObject {
    fn from(o: StatefulSet) -> Self {
        KubeObject::StatefulSet(o)
    }
}

impl From<Deployment> for KubeObject {
    fn from(o: Deployment) -> Self {
        KubeObject::Deployment(o)
    }
}
