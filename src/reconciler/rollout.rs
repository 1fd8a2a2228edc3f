// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{RolloutState, RolloutStatus};
use crate::kubernetes_api_objects::{Kind, ObjectRef};
use crate::reconciler::engine::Context;
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::RolloutPolicy;
use crate::reconciler::intent::Intent;
use crate::reconciler::status::publish_rollout_progress;
use crate::shim_layer::store::get_typed;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use tokio::time::Instant;
use tracing::{info, warn};

pub const REVISION_LABEL: &str = "controller-revision-hash";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaReadiness {
    Ready,
    NotReady,
    Unknown,
}

pub fn pod_name(sts_name: &str, ordinal: i32) -> String {
    format!("{}-{}", sts_name, ordinal)
}

fn pod_revision(pod: &Pod) -> Option<&str> {
    pod.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(REVISION_LABEL))
        .map(|s| s.as_str())
}

fn is_pod_ready(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_none()
        && pod
            .status
            .as_ref()
            .and_then(|s| s.conditions.as_ref())
            .map_or(false, |conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
}

/// A replica is Ready once it runs the update revision and reports Ready,
/// NotReady while it exists in any other state, and Unknown while absent.
pub fn replica_readiness(pod: Option<&Pod>, update_revision: &str) -> ReplicaReadiness {
    match pod {
        None => ReplicaReadiness::Unknown,
        Some(pod) if pod_revision(pod) == Some(update_revision) && is_pod_ready(pod) => ReplicaReadiness::Ready,
        Some(_) => ReplicaReadiness::NotReady,
    }
}

/// The stateful component a rollout acts on.
pub struct RolloutTarget<'a> {
    pub intent: &'a ObjectRef,
    pub generation: i64,
    pub component: &'a str,
    pub policy: RolloutPolicy,
    /// The cursor left on the status by the previous pass.
    pub previous: Option<&'a RolloutStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutOutcome {
    pub status: RolloutStatus,
    /// The component took longer than appReadyTimeout to become ready.
    pub deadline_exceeded: bool,
}

/// Waits until the StatefulSet controller has observed the latest spec, so
/// that status.updateRevision belongs to it. Returns None on timeout.
async fn wait_observed<I: Intent>(
    ctx: &Context,
    target: &RolloutTarget<'_>,
    namespace: &str,
    name: &str,
) -> Result<Option<StatefulSet>, ReconcileError> {
    let deadline = Instant::now() + target.policy.pod_ready_timeout;
    loop {
        ctx.checkpoint::<I>(target.intent, target.generation).await?;
        if let Some(sts) = get_typed::<StatefulSet>(ctx.store.as_ref(), namespace, name).await? {
            let observed = sts.status.as_ref().and_then(|s| s.observed_generation);
            if observed.is_some() && observed >= sts.metadata.generation {
                return Ok(Some(sts));
            }
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        ctx.sleep(ctx.config.pod_wait_ready_interval_check).await?;
    }
}

async fn wait_replica_ready<I: Intent>(
    ctx: &Context,
    target: &RolloutTarget<'_>,
    pod_key: &ObjectRef,
    update_revision: &str,
) -> Result<bool, ReconcileError> {
    let deadline = Instant::now() + target.policy.pod_ready_timeout;
    loop {
        ctx.checkpoint::<I>(target.intent, target.generation).await?;
        let pod = get_typed::<Pod>(ctx.store.as_ref(), &pod_key.namespace, &pod_key.name).await?;
        if replica_readiness(pod.as_ref(), update_revision) == ReplicaReadiness::Ready {
            return Ok(true);
        }
        if Instant::now() >= deadline {
            return Ok(false);
        }
        ctx.sleep(ctx.config.pod_wait_ready_interval_check).await?;
    }
}

/// Drives the pods of an OnDelete StatefulSet to its update revision.
///
/// Replicas are visited from the highest ordinal down to 0. An outdated
/// replica is deleted so the platform recreates it at the update revision,
/// and the next replica is only touched once this one reports ready. A replica
/// that does not become ready within the pod timeout pauses the rollout; the
/// next reconcile pass re-evaluates from scratch and resumes.
///
/// appReadyTimeout bounds the whole transition, across passes: its start is
/// kept on the cursor until the component converges.
pub async fn orchestrate<I: Intent>(
    ctx: &Context,
    target: &RolloutTarget<'_>,
    sts: &StatefulSet,
) -> Result<RolloutOutcome, ReconcileError> {
    let pass_started = ctx.now();
    let deadline_exceeded =
        |started_at: Option<&Time>| started_at.map_or(false, |t| ctx.since(t) > ctx.config.app_ready_timeout);
    let namespace = sts.metadata.namespace.clone().unwrap_or_default();
    let name = sts.metadata.name.clone().unwrap_or_default();
    let component = target.component;

    let observed = match wait_observed::<I>(ctx, target, &namespace, &name).await? {
        Some(sts) => sts,
        None => {
            warn!(intent = %target.intent, component, "statefulset generation was not observed in time");
            let started_at = carried_start(target.previous, None).unwrap_or(pass_started);
            return Ok(RolloutOutcome {
                deadline_exceeded: deadline_exceeded(Some(&started_at)),
                status: RolloutStatus {
                    state: RolloutState::Paused,
                    reason: Some("statefulset controller has not observed the latest spec".to_string()),
                    started_at: Some(started_at),
                    ..RolloutStatus::default()
                },
            });
        }
    };
    let sts_status = observed.status.clone().unwrap_or_default();
    let update_revision = match sts_status.update_revision.or(sts_status.current_revision) {
        Some(rev) => rev,
        None => {
            let started_at = carried_start(target.previous, None).unwrap_or(pass_started);
            return Ok(RolloutOutcome {
                deadline_exceeded: deadline_exceeded(Some(&started_at)),
                status: RolloutStatus {
                    state: RolloutState::Paused,
                    reason: Some("statefulset reports no revision".to_string()),
                    started_at: Some(started_at),
                    ..RolloutStatus::default()
                },
            });
        }
    };
    let replicas = observed.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let mut cursor = RolloutStatus {
        state: if replicas == 0 {
            RolloutState::Idle
        } else {
            RolloutState::Converged
        },
        revision: Some(update_revision.clone()),
        started_at: carried_start(target.previous, Some(update_revision.as_str())),
        ..RolloutStatus::default()
    };
    let mut rolling = false;

    for ordinal in (0..replicas).rev() {
        let pod_key = ObjectRef::new(Kind::PodKind, &namespace, &pod_name(&name, ordinal));
        let pod = get_typed::<Pod>(ctx.store.as_ref(), &namespace, &pod_key.name).await?;
        if replica_readiness(pod.as_ref(), &update_revision) != ReplicaReadiness::Ready {
            if cursor.started_at.is_none() {
                cursor.started_at = Some(pass_started.clone());
            }
            let outdated = pod
                .as_ref()
                .map_or(false, |p| pod_revision(p) != Some(update_revision.as_str()));
            if outdated {
                if !rolling {
                    rolling = true;
                    cursor.state = RolloutState::RollingOut;
                    publish_rollout_progress::<I>(ctx, target.intent, component, &cursor).await?;
                }
                info!(intent = %target.intent, component, ordinal, revision = %update_revision, "replacing outdated replica");
                ctx.store.delete(&pod_key).await?;
            }
            if !wait_replica_ready::<I>(ctx, target, &pod_key, &update_revision).await? {
                warn!(intent = %target.intent, component, ordinal, "replica did not become ready, pausing rollout");
                cursor.state = RolloutState::Paused;
                cursor.stalled_ordinal = Some(ordinal);
                cursor.reason = Some(format!(
                    "replica {} not ready within {}s",
                    pod_key.name,
                    target.policy.pod_ready_timeout.as_secs()
                ));
                return Ok(RolloutOutcome {
                    deadline_exceeded: deadline_exceeded(cursor.started_at.as_ref()),
                    status: cursor,
                });
            }
        }
        cursor.confirmed_replicas += 1;
        cursor.last_confirmed_ordinal = Some(ordinal);
        if rolling && ordinal > 0 {
            publish_rollout_progress::<I>(ctx, target.intent, component, &cursor).await?;
        }
    }
    if replicas > 0 {
        cursor.state = RolloutState::Converged;
    }
    let exceeded = deadline_exceeded(cursor.started_at.as_ref());
    if exceeded {
        warn!(intent = %target.intent, component, "component converged after the app ready timeout");
    }
    cursor.started_at = None;
    Ok(RolloutOutcome {
        status: cursor,
        deadline_exceeded: exceeded,
    })
}

/// The start of a transition that an earlier pass left unfinished. A new
/// update revision starts over.
fn carried_start(previous: Option<&RolloutStatus>, revision: Option<&str>) -> Option<Time> {
    let previous = previous.filter(|p| p.in_progress())?;
    match (revision, previous.revision.as_deref()) {
        (Some(revision), Some(previous_revision)) if revision != previous_revision => None,
        _ => previous.started_at.clone(),
    }
}
