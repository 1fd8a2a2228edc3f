// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{dynamic_ref, Kind, KubeResource, ObjectRef, StoreError};
use crate::shim_layer::store::{labels_match, ObjectStore};
use async_trait::async_trait;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Replace,
    ReplaceStatus,
    Delete,
}

/// One write issued against the store, recorded in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOp {
    pub verb: Verb,
    pub key: ObjectRef,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectRef, DynamicObject>,
    version: u64,
    uid: u64,
    ops: Vec<StoreOp>,
    injected_conflicts: u32,
    injected_transient: u32,
}

impl State {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn next_uid(&mut self) -> String {
        self.uid += 1;
        format!("uid-{}", self.uid)
    }

    fn take_transient(&mut self, key: &ObjectRef) -> Result<(), StoreError> {
        if self.injected_transient > 0 {
            self.injected_transient -= 1;
            return Err(StoreError::Transient(format!("injected failure on {}", key)));
        }
        Ok(())
    }

    fn take_conflict(&mut self, key: &ObjectRef) -> Result<(), StoreError> {
        if self.injected_conflicts > 0 {
            self.injected_conflicts -= 1;
            return Err(StoreError::Conflict(key.to_string()));
        }
        Ok(())
    }

    fn insert_new(&mut self, kind: Kind, mut obj: DynamicObject) -> DynamicObject {
        let key = dynamic_ref(kind, &obj);
        fill_types(kind, &mut obj);
        obj.metadata.uid = Some(self.next_uid());
        obj.metadata.resource_version = Some(self.next_version());
        obj.metadata.generation = Some(1);
        self.objects.insert(key, obj.clone());
        obj
    }

    /// Replaces the main resource. Status is kept from the stored object and
    /// generation advances only when something besides metadata changed.
    fn replace_existing(&mut self, kind: Kind, mut obj: DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = dynamic_ref(kind, &obj);
        let current = self
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(rv) = &obj.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(rv) {
                return Err(StoreError::Conflict(key.to_string()));
            }
        }
        fill_types(kind, &mut obj);
        set_status(&mut obj.data, status_of(&current.data));
        let generation = current.metadata.generation.unwrap_or(1);
        obj.metadata.generation = if without_status(&obj.data) != without_status(&current.data) {
            Some(generation + 1)
        } else {
            Some(generation)
        };
        obj.metadata.uid = current.metadata.uid.clone();
        obj.metadata.creation_timestamp = current.metadata.creation_timestamp.clone();
        obj.metadata.resource_version = Some(self.next_version());
        self.objects.insert(key, obj.clone());
        Ok(obj)
    }

    fn remove_cascading(&mut self, key: &ObjectRef) -> bool {
        let removed = match self.objects.remove(key) {
            Some(obj) => obj,
            None => return false,
        };
        if let Some(uid) = removed.metadata.uid {
            let dependents: Vec<ObjectRef> = self
                .objects
                .iter()
                .filter(|(_, o)| {
                    o.metadata
                        .owner_references
                        .as_ref()
                        .map_or(false, |refs| refs.iter().any(|r| r.uid == uid))
                })
                .map(|(k, _)| k.clone())
                .collect();
            for dependent in dependents {
                self.remove_cascading(&dependent);
            }
        }
        true
    }
}

fn fill_types(kind: Kind, obj: &mut DynamicObject) {
    if obj.types.is_none() {
        let ar = kind.api_resource();
        obj.types = Some(TypeMeta {
            api_version: ar.api_version,
            kind: ar.kind,
        });
    }
}

fn status_of(data: &serde_json::Value) -> Option<serde_json::Value> {
    data.get("status").cloned()
}

fn set_status(data: &mut serde_json::Value, status: Option<serde_json::Value>) {
    if let Some(map) = data.as_object_mut() {
        match status {
            Some(status) => {
                map.insert("status".to_string(), status);
            }
            None => {
                map.remove("status");
            }
        }
    }
}

fn without_status(data: &serde_json::Value) -> serde_json::Value {
    let mut data = data.clone();
    set_status(&mut data, None);
    data
}

/// MemoryStore is an in-process ObjectStore with the same version-token,
/// generation and owner-reference semantics as the API server.
/// It records every write so tests can assert on the exact operations issued,
/// and can inject conflicts or transient failures.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Writes an object directly, bypassing the op log and failure injection.
    /// An existing object keeps its uid and its status unless `obj` carries one.
    pub fn seed(&self, kind: Kind, mut obj: DynamicObject) -> DynamicObject {
        let mut state = self.state.lock();
        let key = dynamic_ref(kind, &obj);
        match state.objects.get(&key).cloned() {
            None => state.insert_new(kind, obj),
            Some(current) => {
                obj.metadata.resource_version = None;
                if status_of(&obj.data).is_none() {
                    set_status(&mut obj.data, status_of(&current.data));
                }
                let status = status_of(&obj.data);
                match state.replace_existing(kind, obj) {
                    Ok(mut stored) => {
                        set_status(&mut stored.data, status);
                        state.objects.insert(key, stored.clone());
                        stored
                    }
                    Err(_) => current,
                }
            }
        }
    }

    pub fn seed_typed<K: KubeResource>(&self, obj: &K) -> Result<K, StoreError> {
        let stored = self.seed(K::KIND, obj.to_dynamic()?);
        K::from_dynamic(&stored)
    }

    pub fn peek(&self, key: &ObjectRef) -> Option<DynamicObject> {
        self.state.lock().objects.get(key).cloned()
    }

    pub fn peek_typed<K: KubeResource>(&self, namespace: &str, name: &str) -> Option<K> {
        self.peek(&ObjectRef::new(K::KIND, namespace, name))
            .and_then(|obj| K::from_dynamic(&obj).ok())
    }

    pub fn keys(&self, kind: Kind) -> Vec<ObjectRef> {
        self.state
            .lock()
            .objects
            .keys()
            .filter(|k| k.kind == kind)
            .cloned()
            .collect()
    }

    /// Removes an object as an external actor would, cascading to dependents.
    pub fn remove(&self, key: &ObjectRef) -> bool {
        self.state.lock().remove_cascading(key)
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.state.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.state.lock().ops.clear();
    }

    /// The next `n` replace or status writes fail with a version conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.state.lock().injected_conflicts = n;
    }

    /// The next `n` operations of any kind fail as if the store were unreachable.
    pub fn inject_transient(&self, n: u32) {
        self.state.lock().injected_transient = n;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, key: &ObjectRef) -> Result<Option<DynamicObject>, StoreError> {
        let mut state = self.state.lock();
        state.take_transient(key)?;
        Ok(state.objects.get(key).cloned())
    }

    async fn list(
        &self,
        kind: Kind,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let mut state = self.state.lock();
        state.take_transient(&ObjectRef::new(kind, namespace, ""))?;
        Ok(state
            .objects
            .iter()
            .filter(|(k, o)| {
                k.kind == kind && k.namespace == namespace && labels_match(o.metadata.labels.as_ref(), selector)
            })
            .map(|(_, o)| o.clone())
            .collect())
    }

    async fn create(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = dynamic_ref(kind, obj);
        let mut state = self.state.lock();
        state.take_transient(&key)?;
        if key.name.is_empty() || key.namespace.is_empty() {
            return Err(StoreError::Invalid {
                key: key.to_string(),
                message: "name and namespace are required".to_string(),
            });
        }
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key.to_string()));
        }
        let mut obj = obj.clone();
        obj.metadata.resource_version = None;
        set_status(&mut obj.data, None);
        let stored = state.insert_new(kind, obj);
        state.ops.push(StoreOp { verb: Verb::Create, key });
        Ok(stored)
    }

    async fn replace(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = dynamic_ref(kind, obj);
        let mut state = self.state.lock();
        state.take_transient(&key)?;
        state.take_conflict(&key)?;
        let stored = state.replace_existing(kind, obj.clone())?;
        state.ops.push(StoreOp { verb: Verb::Replace, key });
        Ok(stored)
    }

    async fn replace_status(&self, kind: Kind, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let key = dynamic_ref(kind, obj);
        let mut state = self.state.lock();
        state.take_transient(&key)?;
        state.take_conflict(&key)?;
        let mut current = state
            .objects
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        if let Some(rv) = &obj.metadata.resource_version {
            if current.metadata.resource_version.as_ref() != Some(rv) {
                return Err(StoreError::Conflict(key.to_string()));
            }
        }
        set_status(&mut current.data, status_of(&obj.data));
        current.metadata.resource_version = Some(state.next_version());
        state.objects.insert(key.clone(), current.clone());
        state.ops.push(StoreOp {
            verb: Verb::ReplaceStatus,
            key,
        });
        Ok(current)
    }

    async fn delete(&self, key: &ObjectRef) -> Result<bool, StoreError> {
        let mut state = self.state.lock();
        state.take_transient(key)?;
        let removed = state.remove_cascading(key);
        if removed {
            state.ops.push(StoreOp {
                verb: Verb::Delete,
                key: key.clone(),
            });
        }
        Ok(removed)
    }
}
