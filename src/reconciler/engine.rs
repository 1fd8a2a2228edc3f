// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::OperatorConfig;
use crate::crds::{HasStatus, UpdateStatus};
use crate::kubernetes_api_objects::{KubeObject, ObjectRef};
use crate::reconciler::apply::{apply_object, prune};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::intent::Intent;
use crate::reconciler::merge::MergeAction;
use crate::reconciler::rollout::{orchestrate, RolloutTarget};
use crate::reconciler::status::{
    compute_status, reconciling_status, transient_failure_status, write_status, PassOutcome,
};
use crate::shim_layer::store::{get_typed, ObjectStore};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::chrono::{self, DateTime, SubsecRound, Utc};
use kube::Resource;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Context is shared by every reconcile task of the process.
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub config: Arc<OperatorConfig>,
    /// Cancelled on shutdown; every wait inside a pass observes it.
    pub cancel: CancellationToken,
    failures: Mutex<HashMap<ObjectRef, u32>>,
    clock_origin: (DateTime<Utc>, Instant),
}

impl Context {
    pub fn new(store: Arc<dyn ObjectStore>, config: Arc<OperatorConfig>, cancel: CancellationToken) -> Context {
        Context {
            store,
            config,
            cancel,
            failures: Mutex::new(HashMap::new()),
            clock_origin: (Utc::now().trunc_subsecs(0), Instant::now()),
        }
    }

    /// Wall clock time driven by the runtime clock, so a paused runtime
    /// stops it as well. Whole seconds, as Time is stored.
    pub fn now(&self) -> Time {
        let (wall, origin) = self.clock_origin;
        let elapsed = chrono::Duration::seconds(origin.elapsed().as_secs() as i64);
        Time(wall + elapsed)
    }

    /// Time passed since `since` on the clock of `now`.
    pub fn since(&self, since: &Time) -> Duration {
        (self.now().0 - since.0).to_std().unwrap_or_default()
    }

    pub async fn sleep(&self, d: Duration) -> Result<(), ReconcileError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ReconcileError::Cancelled),
            _ = tokio::time::sleep(d) => Ok(()),
        }
    }

    /// Fails when the process is shutting down or the intent has moved on to
    /// another generation (or disappeared) since the pass began.
    pub async fn checkpoint<I: Intent>(&self, key: &ObjectRef, generation: i64) -> Result<(), ReconcileError> {
        if self.cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }
        match get_typed::<I>(self.store.as_ref(), &key.namespace, &key.name).await? {
            None => Err(ReconcileError::Cancelled),
            Some(intent) => {
                let current = intent.meta().generation.unwrap_or(0);
                if current != generation {
                    Err(ReconcileError::Superseded(current))
                } else {
                    Ok(())
                }
            }
        }
    }

    pub fn record_failure(&self, key: &ObjectRef) -> u32 {
        let mut failures = self.failures.lock();
        let count = failures.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failure_count(&self, key: &ObjectRef) -> u32 {
        self.failures.lock().get(key).copied().unwrap_or(0)
    }

    pub fn reset_failures(&self, key: &ObjectRef) {
        self.failures.lock().remove(key);
    }
}

/// Summary of one reconcile pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// None when the intent no longer exists.
    pub update_status: Option<UpdateStatus>,
    pub applied: Vec<(ObjectRef, MergeAction)>,
    pub deleted: Vec<ObjectRef>,
    pub status_written: bool,
}

/// Reconcile entry point for one intent object.
///
/// Fatal spec errors, parse errors and stalled rollouts are reported on the
/// status and end the pass successfully. Store failures and exhausted
/// conflicts are returned for a backoff retry and reach the status only after
/// `transientFailureThreshold` consecutive failures.
pub async fn reconcile_intent<I: Intent>(ctx: &Context, key: &ObjectRef) -> Result<ReconcileReport, ReconcileError> {
    match reconcile_pass::<I>(ctx, key).await {
        Ok(report) => {
            ctx.reset_failures(key);
            Ok(report)
        }
        Err(err) if err.is_transient() => {
            let failures = ctx.record_failure(key);
            warn!(intent = %key, failures, error = %err, "reconcile failed");
            if failures > ctx.config.transient_failure_threshold {
                let message = err.to_string();
                let written =
                    write_status::<I, _>(ctx, key, |previous| transient_failure_status(previous, &message)).await;
                if let Err(status_err) = written {
                    warn!(intent = %key, error = %status_err, "cannot record failure on status");
                }
            }
            Err(err)
        }
        Err(err) => {
            info!(intent = %key, error = %err, "reconcile abandoned");
            Err(err)
        }
    }
}

async fn reconcile_pass<I: Intent>(ctx: &Context, key: &ObjectRef) -> Result<ReconcileReport, ReconcileError> {
    let store = ctx.store.as_ref();
    let intent = match get_typed::<I>(store, &key.namespace, &key.name).await? {
        Some(intent) => intent,
        None => {
            info!(intent = %key, "intent not found, owned objects are left to garbage collection");
            return Ok(ReconcileReport::default());
        }
    };
    let generation = intent.meta().generation.unwrap_or(0);
    info!(intent = %key, generation, "reconcile started");
    let mut report = ReconcileReport::default();

    if intent.status().and_then(|s| s.observed_generation) != Some(generation) {
        report.status_written |=
            write_status::<I, _>(ctx, key, |previous| reconciling_status(previous, generation)).await?;
    }

    if let Err(err) = intent.validate() {
        warn!(intent = %key, error = %err, "spec rejected");
        let outcome = PassOutcome {
            generation,
            fatal: Some(err.to_string()),
            ..PassOutcome::default()
        };
        report.status_written |= write_status::<I, _>(ctx, key, |previous| compute_status(previous, &outcome)).await?;
        report.update_status = Some(UpdateStatus::Failed);
        return Ok(report);
    }

    let inputs = intent.gather(store).await?;
    let mut synthesis = intent.synthesize(&inputs, &ctx.config);
    for err in &synthesis.parse_errors {
        warn!(intent = %key, source = %err.source, message = %err.message, "configuration fragment rejected");
    }
    let owner = intent
        .controller_owner_ref(&())
        .ok_or_else(|| ReconcileError::FatalConfig("intent has no uid".to_string()))?;
    synthesis.graph.set_owner(&owner);

    let mut outcome = PassOutcome {
        generation,
        parse_errors: synthesis.parse_errors.clone(),
        ..PassOutcome::default()
    };
    for entry in synthesis.graph.entries() {
        let applied = apply_object(ctx, &entry.object).await?;
        report.applied.push((entry.object.object_ref(), applied.action));
        if let (Some(policy), KubeObject::StatefulSet(sts)) = (entry.rollout, &applied.object) {
            let target = RolloutTarget {
                intent: key,
                generation,
                component: &entry.component,
                policy,
                previous: intent.status().and_then(|s| s.rollouts.get(&entry.component)),
            };
            let rollout = orchestrate::<I>(ctx, &target, sts).await?;
            if rollout.deadline_exceeded {
                outcome.deadline_exceeded.push(entry.component.clone());
            }
            outcome.rollouts.insert(entry.component.clone(), rollout.status);
        }
    }

    report.deleted = prune(ctx, &key.namespace, &key.name, &owner.uid, &synthesis.graph).await?;
    intent
        .publish_input_statuses(store, &ctx.config, &inputs, &synthesis)
        .await?;

    for err in outcome.soft_errors() {
        warn!(intent = %key, error = %err, "reconcile pass finished with an error");
    }
    let status = compute_status(intent.status(), &outcome);
    report.update_status = status.update_status;
    report.status_written |= write_status::<I, _>(ctx, key, |previous| compute_status(previous, &outcome)).await?;
    info!(
        intent = %key,
        generation,
        update_status = ?report.update_status,
        changed = report.applied.iter().filter(|(_, a)| *a != MergeAction::NoOp).count(),
        deleted = report.deleted.len(),
        "reconcile finished"
    );
    Ok(report)
}
