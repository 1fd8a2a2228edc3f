// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{
    Condition, IntentStatus, ParseErrorStatus, RolloutState, RolloutStatus, UpdateStatus, CONDITION_CONFIG_VALID,
    CONDITION_DEGRADED, CONDITION_READY,
};
use crate::kubernetes_api_objects::{ObjectRef, StoreError};
use crate::reconciler::engine::Context;
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::ParseError;
use crate::reconciler::intent::Intent;
use crate::shim_layer::store::{get_typed, replace_status_typed};
use std::collections::BTreeMap;
use tracing::debug;

/// What one reconcile pass found, before it is turned into a status.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassOutcome {
    pub generation: i64,
    pub fatal: Option<String>,
    pub parse_errors: Vec<ParseError>,
    pub rollouts: BTreeMap<String, RolloutStatus>,
    /// Components that exceeded appReadyTimeout.
    pub deadline_exceeded: Vec<String>,
}

impl PassOutcome {
    pub fn stalled(&self) -> Vec<(&String, &RolloutStatus)> {
        self.rollouts
            .iter()
            .filter(|(_, r)| r.state == RolloutState::Paused)
            .collect()
    }

    /// Failures that leave the pass running: parse errors, then stalled rollouts.
    pub fn soft_errors(&self) -> Vec<ReconcileError> {
        let stalled = self.stalled().into_iter().map(|(component, rollout)| ReconcileError::RolloutStalled {
            component: component.clone(),
            reason: rollout.reason.clone().unwrap_or_else(|| "not ready".to_string()),
        });
        self.parse_errors
            .iter()
            .map(ReconcileError::from)
            .chain(stalled)
            .collect()
    }
}

fn parse_error_statuses(errors: &[ParseError]) -> Vec<ParseErrorStatus> {
    errors
        .iter()
        .map(|e| ParseErrorStatus {
            source: e.source.clone(),
            message: e.message.clone(),
        })
        .collect()
}

/// Maps a pass outcome onto the status of the intent.
///
/// Precedence of the coarse state: a fatal spec error, then parse errors
/// (both `failed`), then a stalled rollout (`reconciling`), else `ready`.
/// An exceeded app deadline only raises Degraded.
pub fn compute_status(previous: Option<&IntentStatus>, outcome: &PassOutcome) -> IntentStatus {
    let mut status = IntentStatus {
        observed_generation: Some(outcome.generation),
        ..IntentStatus::default()
    };

    if let Some(message) = &outcome.fatal {
        status.update_status = Some(UpdateStatus::Failed);
        status.reason = Some(message.clone());
        status.rollouts = previous.map(|p| p.rollouts.clone()).unwrap_or_default();
        status.set_condition(Condition::new(CONDITION_READY, false, "InvalidSpec", message));
        status.set_condition(Condition::new(CONDITION_DEGRADED, false, "", ""));
        status.set_condition(Condition::new(CONDITION_CONFIG_VALID, false, "InvalidSpec", message));
        return status;
    }

    status.rollouts = outcome.rollouts.clone();
    status.parse_errors = parse_error_statuses(&outcome.parse_errors);
    let stalled = outcome.stalled();

    let reasons = outcome
        .soft_errors()
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>();

    status.update_status = Some(if !outcome.parse_errors.is_empty() {
        UpdateStatus::Failed
    } else if !stalled.is_empty() {
        UpdateStatus::Reconciling
    } else {
        UpdateStatus::Ready
    });
    status.reason = if reasons.is_empty() {
        None
    } else {
        Some(reasons.join("; "))
    };

    let ready = status.update_status == Some(UpdateStatus::Ready);
    status.set_condition(Condition::new(
        CONDITION_READY,
        ready,
        if ready { "Reconciled" } else { "NotReconciled" },
        "",
    ));

    let degraded_message = stalled
        .iter()
        .map(|(c, _)| format!("{} rollout stalled", c))
        .chain(outcome.deadline_exceeded.iter().map(|c| format!("{} exceeded app ready timeout", c)))
        .collect::<Vec<_>>()
        .join("; ");
    let degraded_reason = if !stalled.is_empty() {
        "RolloutStalled"
    } else if !outcome.deadline_exceeded.is_empty() {
        "AppReadyTimeout"
    } else {
        ""
    };
    status.set_condition(Condition::new(
        CONDITION_DEGRADED,
        !degraded_message.is_empty(),
        degraded_reason,
        &degraded_message,
    ));

    let config_valid = outcome.parse_errors.is_empty();
    status.set_condition(Condition::new(
        CONDITION_CONFIG_VALID,
        config_valid,
        if config_valid { "Parsed" } else { "ParseError" },
        "",
    ));
    status
}

/// Status written when a new generation is first seen.
/// observedGeneration does not advance until the pass has run.
pub fn reconciling_status(previous: Option<&IntentStatus>, generation: i64) -> IntentStatus {
    let mut status = previous.cloned().unwrap_or_default();
    status.update_status = Some(UpdateStatus::Reconciling);
    status.reason = Some(format!("reconciling generation {}", generation));
    status
}

pub fn transient_failure_status(previous: Option<&IntentStatus>, message: &str) -> IntentStatus {
    let mut status = previous.cloned().unwrap_or_default();
    status.update_status = Some(UpdateStatus::Failed);
    status.reason = Some(message.to_string());
    status.set_condition(Condition::new(CONDITION_READY, false, "StoreUnavailable", message));
    status
}

/// Writes the status computed by `compute` from the freshly read one.
///
/// Nothing is written when the result equals the stored status. Version
/// conflicts re-read and recompute. Returns whether a write happened.
pub async fn write_status<I, F>(ctx: &Context, key: &ObjectRef, compute: F) -> Result<bool, ReconcileError>
where
    I: Intent,
    F: Fn(Option<&IntentStatus>) -> IntentStatus + Send + Sync,
{
    for _ in 0..=ctx.config.conflict_retries {
        let mut intent = match get_typed::<I>(ctx.store.as_ref(), &key.namespace, &key.name).await? {
            Some(intent) => intent,
            None => return Ok(false),
        };
        let next = compute(intent.status());
        if intent.status() == Some(&next) {
            debug!(intent = %key, "status unchanged, skipping write");
            return Ok(false);
        }
        intent.set_status(next);
        match replace_status_typed(ctx.store.as_ref(), &intent).await {
            Ok(_) => return Ok(true),
            Err(StoreError::Conflict(_)) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ReconcileError::Conflict(key.to_string()))
}

/// Publishes the rollout cursor of one component while the rollout runs.
pub async fn publish_rollout_progress<I: Intent>(
    ctx: &Context,
    key: &ObjectRef,
    component: &str,
    cursor: &RolloutStatus,
) -> Result<bool, ReconcileError> {
    write_status::<I, _>(ctx, key, |previous| {
        let mut status = previous.cloned().unwrap_or_default();
        status.rollouts.insert(component.to_string(), cursor.clone());
        status
    })
    .await
}
