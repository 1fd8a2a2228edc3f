// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{Kind, KubeResource, ObjectRef, StoreError};
use async_trait::async_trait;
use kube::api::DynamicObject;
use std::collections::BTreeMap;

/// ObjectStore is the engine's only view of the remote declarative API.
/// Reads return independent copies, so callers may mutate what they get back.
/// Writes carry the object's resourceVersion for optimistic concurrency.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &ObjectRef) -> Result<Option<DynamicObject>, StoreError>;

    /// Lists objects of `kind` in `namespace` whose labels contain every pair of `selector`.
    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    async fn create(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replaces the whole object. Fails with Conflict when the version token is stale.
    async fn replace(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Replaces only the status subresource.
    async fn replace_status(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    /// Deletes the object. Returns false if it was already gone.
    async fn delete(&self, key: &ObjectRef) -> Result<bool, StoreError>;
}

pub async fn get_typed<K: KubeResource>(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<K>, StoreError> {
    match store.get(&ObjectRef::new(K::KIND, namespace, name)).await? {
        Some(obj) => Ok(Some(K::from_dynamic(&obj)?)),
        None => Ok(None),
    }
}

pub async fn list_typed<K: KubeResource>(
    store: &dyn ObjectStore,
    namespace: &str,
    selector: &BTreeMap<String, String>,
) -> Result<Vec<K>, StoreError> {
    store
        .list(K::KIND, namespace, selector)
        .await?
        .iter()
        .map(K::from_dynamic)
        .collect()
}

pub async fn replace_status_typed<K: KubeResource>(store: &dyn ObjectStore, obj: &K) -> Result<K, StoreError> {
    let updated = store.replace_status(K::KIND, &obj.to_dynamic()?).await?;
    K::from_dynamic(&updated)
}

/// Returns true when `labels` carries every pair of `selector`.
pub fn labels_match(labels: Option<&BTreeMap<String, String>>, selector: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}
