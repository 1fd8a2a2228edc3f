// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{dynamic_ref, kube_error_to_store_error, Kind, ObjectRef, StoreError};
use crate::shim_layer::store::ObjectStore;
use async_trait::async_trait;
use kube::api::{Api, DeleteParams, DynamicObject, ListParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;

/// KubeStore talks to the Kubernetes API server through kube-rs.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> KubeStore {
        KubeStore { client }
    }

    fn api(&self, kind: Kind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

fn name_of(obj: &DynamicObject) -> &str {
    obj.metadata.name.as_deref().unwrap_or_default()
}

fn namespace_of(obj: &DynamicObject) -> &str {
    obj.metadata.namespace.as_deref().unwrap_or_default()
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, key: &ObjectRef) -> Result<Option<DynamicObject>, StoreError> {
        self.api(key.kind, &key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| kube_error_to_store_error(&key.to_string(), e))
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let label_selector = selector
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        let lp = ListParams::default().labels(&label_selector);
        let list = self
            .api(kind, namespace)
            .list(&lp)
            .await
            .map_err(|e| kube_error_to_store_error(&format!("{}/{}", kind, namespace), e))?;
        Ok(list.items)
    }

    async fn create(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = dynamic_ref(kind, obj);
        self.api(kind, namespace_of(obj))
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| kube_error_to_store_error(&key.to_string(), e))
    }

    async fn replace(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = dynamic_ref(kind, obj);
        self.api(kind, namespace_of(obj))
            .replace(name_of(obj), &PostParams::default(), obj)
            .await
            .map_err(|e| kube_error_to_store_error(&key.to_string(), e))
    }

    async fn replace_status(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = dynamic_ref(kind, obj);
        let body = serde_json::to_vec(obj)?;
        self.api(kind, namespace_of(obj))
            .replace_status(name_of(obj), &PostParams::default(), body)
            .await
            .map_err(|e| kube_error_to_store_error(&key.to_string(), e))
    }

    async fn delete(&self, key: &ObjectRef) -> Result<bool, StoreError> {
        match self
            .api(key.kind, &key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match kube_error_to_store_error(&key.to_string(), e) {
                StoreError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}
