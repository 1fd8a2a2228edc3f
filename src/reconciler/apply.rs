// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::{dynamic_ref, Kind, KubeObject, ObjectRef, StoreError};
use crate::reconciler::engine::Context;
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::{owned_selector, ObjectGraph};
use crate::reconciler::merge::{reconcile_object, MergeAction};
use std::collections::BTreeSet;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub action: MergeAction,
    /// The object as the store holds it after this step.
    pub object: KubeObject,
}

/// Drives one object to its desired state.
///
/// A version conflict (or a create racing with another writer) re-reads the
/// live object and recomputes the merge, up to `conflictRetries` times.
pub async fn apply_object(ctx: &Context, desired: &KubeObject) -> Result<Applied, ReconcileError> {
    let key = desired.object_ref();
    let store = ctx.store.as_ref();
    for attempt in 0..=ctx.config.conflict_retries {
        let live = match store.get(&key).await? {
            Some(obj) => Some(KubeObject::from_dynamic(key.kind, &obj)?),
            None => None,
        };
        let decision = reconcile_object(desired, live.as_ref());
        let result = match decision.action {
            MergeAction::NoOp => {
                debug!(key = %key, "object is up to date");
                Ok(decision.object)
            }
            MergeAction::Create => {
                let created = store.create(key.kind, &decision.object.to_dynamic()?).await;
                created.and_then(|obj| KubeObject::from_dynamic(key.kind, &obj))
            }
            MergeAction::Update => {
                let updated = store.replace(key.kind, &decision.object.to_dynamic()?).await;
                updated.and_then(|obj| KubeObject::from_dynamic(key.kind, &obj))
            }
            MergeAction::Recreate => {
                info!(key = %key, "immutable field changed, deleting before create");
                store.delete(&key).await?;
                let created = store.create(key.kind, &decision.object.to_dynamic()?).await;
                created.and_then(|obj| KubeObject::from_dynamic(key.kind, &obj))
            }
        };
        match result {
            Ok(object) => {
                if decision.action != MergeAction::NoOp {
                    info!(key = %key, action = ?decision.action, "applied object");
                }
                return Ok(Applied {
                    action: decision.action,
                    object,
                });
            }
            Err(StoreError::Conflict(_)) | Err(StoreError::AlreadyExists(_)) => {
                debug!(key = %key, attempt, "write raced with another writer, retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(ReconcileError::Conflict(key.to_string()))
}

/// Deletes every object owned by `owner_uid` that the graph no longer names.
/// Deleting an object that is already gone is not an error.
pub async fn prune(
    ctx: &Context,
    namespace: &str,
    instance: &str,
    owner_uid: &str,
    graph: &ObjectGraph,
) -> Result<Vec<ObjectRef>, ReconcileError> {
    let keep: BTreeSet<ObjectRef> = graph.keys();
    let selector = owned_selector(instance);
    let mut deleted = Vec::new();
    for kind in Kind::OWNED {
        for obj in ctx.store.list(kind, namespace, &selector).await? {
            let owned = obj
                .metadata
                .owner_references
                .as_ref()
                .map_or(false, |refs| refs.iter().any(|r| r.uid == owner_uid));
            let key = dynamic_ref(kind, &obj);
            if !owned || keep.contains(&key) {
                continue;
            }
            if ctx.store.delete(&key).await? {
                info!(key = %key, "deleted object no longer in the desired graph");
                deleted.push(key);
            }
        }
    }
    Ok(deleted)
}
