// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::harness::*;
use crate::config::OperatorConfig;
use crate::crds::{RollingUpdateSpec, RolloutState, UpdateStatus, VMCluster, VMClusterSpec, CONDITION_DEGRADED};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::rollout::{replica_readiness, ReplicaReadiness, REVISION_LABEL};
use k8s_openapi::api::core::v1::Pod;
use serde_json::json;
use std::time::Duration;

fn cluster() -> VMCluster {
    in_namespace(VMCluster::new(
        "c",
        VMClusterSpec {
            retention_period: "1".to_string(),
            vmstorage: Some(stateful_app(3)),
            vmselect: Some(stateful_app(1)),
            ..VMClusterSpec::default()
        },
    ))
}

/// Changes the vmstorage pod template, which starts a new revision.
fn bump_storage(h: &Harness, value: &str) {
    let mut intent = h.get::<VMCluster>("c").unwrap();
    if let Some(storage) = intent.spec.vmstorage.as_mut() {
        storage
            .common
            .extra_args
            .insert("dedup.minScrapeInterval".to_string(), value.to_string());
    }
    h.seed(&intent);
}

async fn converged() -> Harness {
    converged_with(test_config()).await
}

async fn converged_with(config: OperatorConfig) -> Harness {
    let h = Harness::with_config(config);
    h.start_simulator();
    h.seed(&cluster());
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    h.store.clear_ops();
    h
}

#[test]
pub fn test_replica_readiness() {
    println!("Testing replica readiness classification...");
    let pod = |revision: &str, ready: &str| -> Pod {
        serde_json::from_value(json!({
            "metadata": { "name": "p", "labels": { (REVISION_LABEL): revision } },
            "status": { "conditions": [{ "type": "Ready", "status": ready }] }
        }))
        .unwrap()
    };
    assert_eq!(replica_readiness(None, "r2"), ReplicaReadiness::Unknown);
    assert_eq!(replica_readiness(Some(&pod("r2", "True")), "r2"), ReplicaReadiness::Ready);
    assert_eq!(replica_readiness(Some(&pod("r2", "False")), "r2"), ReplicaReadiness::NotReady);
    assert_eq!(replica_readiness(Some(&pod("r1", "True")), "r2"), ReplicaReadiness::NotReady);
}

#[tokio::test(start_paused = true)]
pub async fn test_rollout_replaces_replicas_in_descending_order() {
    println!("Testing an ordered rollout of a changed template...");
    let h = converged().await;
    bump_storage(&h, "1s");

    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    assert_eq!(
        h.deleted_pods(),
        vec!["vmstorage-c-2", "vmstorage-c-1", "vmstorage-c-0"]
    );

    let status = h.status::<VMCluster>("c");
    let rollout = &status.rollouts["vmstorage"];
    assert_eq!(rollout.state, RolloutState::Converged);
    assert_eq!(rollout.confirmed_replicas, 3);
    assert_eq!(rollout.last_confirmed_ordinal, Some(0));
    assert_eq!(rollout.started_at, None);
    assert_eq!(status.rollouts["vmselect"].state, RolloutState::Converged);
    assert_eq!(status.observed_generation, Some(2));
}

#[tokio::test(start_paused = true)]
pub async fn test_unready_replica_pauses_and_resumes() {
    println!("Testing that a replica that never becomes ready pauses the rollout...");
    let h = converged().await;
    h.never_ready.lock().insert("vmstorage-c-1".to_string());
    bump_storage(&h, "1s");

    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Reconciling));
    assert_eq!(h.deleted_pods(), vec!["vmstorage-c-2", "vmstorage-c-1"]);

    let status = h.status::<VMCluster>("c");
    let rollout = &status.rollouts["vmstorage"];
    assert_eq!(rollout.state, RolloutState::Paused);
    assert_eq!(rollout.stalled_ordinal, Some(1));
    assert_eq!(rollout.confirmed_replicas, 1);
    assert_eq!(rollout.last_confirmed_ordinal, Some(2));
    let degraded = status.condition(CONDITION_DEGRADED).unwrap();
    assert!(degraded.is_true());
    assert_eq!(degraded.reason, "RolloutStalled");
    assert_eq!(
        status.reason.as_deref(),
        Some("vmstorage rollout paused: replica vmstorage-c-1 not ready within 10s")
    );
    // the other stateful tier was still reconciled
    assert_eq!(status.rollouts["vmselect"].state, RolloutState::Converged);

    h.never_ready.lock().clear();
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.store.clear_ops();
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    assert_eq!(h.deleted_pods(), vec!["vmstorage-c-0"]);
    let status = h.status::<VMCluster>("c");
    assert_eq!(status.rollouts["vmstorage"].state, RolloutState::Converged);
    assert!(!status.condition(CONDITION_DEGRADED).unwrap().is_true());
}

#[tokio::test(start_paused = true)]
pub async fn test_new_generation_supersedes_running_rollout() {
    println!("Testing that a spec change aborts an in-flight rollout...");
    let h = converged().await;
    h.never_ready.lock().insert("vmstorage-c-2".to_string());
    bump_storage(&h, "1s");

    let store = h.store.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        let mut intent = store.peek_typed::<VMCluster>(NAMESPACE, "c").unwrap();
        intent.spec.retention_period = "2".to_string();
        store.seed_typed(&intent).unwrap();
    });

    let err = h.reconcile::<VMCluster>("c").await.unwrap_err();
    assert_eq!(err, ReconcileError::Superseded(3));
    assert!(err.is_retryable());
    assert_eq!(h.deleted_pods(), vec!["vmstorage-c-2"]);
}

#[tokio::test(start_paused = true)]
pub async fn test_pod_ready_timeout_override() {
    println!("Testing a per-component pod ready timeout...");
    let h = converged().await;
    let mut intent = h.get::<VMCluster>("c").unwrap();
    if let Some(storage) = intent.spec.vmstorage.as_mut() {
        storage.rolling_update = Some(RollingUpdateSpec {
            pod_ready_timeout_seconds: Some(3),
        });
        storage
            .common
            .extra_args
            .insert("dedup.minScrapeInterval".to_string(), "1s".to_string());
    }
    h.seed(&intent);
    h.never_ready.lock().insert("vmstorage-c-2".to_string());

    let started = tokio::time::Instant::now();
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Reconciling));
    assert!(started.elapsed() < Duration::from_secs(10));
    let status = h.status::<VMCluster>("c");
    let rollout = &status.rollouts["vmstorage"];
    assert_eq!(rollout.stalled_ordinal, Some(2));
    assert_eq!(rollout.reason.as_deref(), Some("replica vmstorage-c-2 not ready within 3s"));
}

#[tokio::test(start_paused = true)]
pub async fn test_cancellation_stops_waiting() {
    println!("Testing shutdown while a rollout waits...");
    let h = converged().await;
    h.never_ready.lock().insert("vmstorage-c-2".to_string());
    bump_storage(&h, "1s");

    let cancel = h.ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        cancel.cancel();
    });
    let err = h.reconcile::<VMCluster>("c").await.unwrap_err();
    assert_eq!(err, ReconcileError::Cancelled);
}

#[tokio::test(start_paused = true)]
pub async fn test_slow_rollout_raises_app_ready_timeout() {
    println!("Testing a rollout that outlives the app ready timeout...");
    let config = OperatorConfig {
        app_ready_timeout: Duration::from_secs(2),
        ..test_config()
    };
    let h = converged_with(config).await;
    // a pass with nothing to roll out settles the condition
    h.reconcile::<VMCluster>("c").await.unwrap();
    assert!(!h.status::<VMCluster>("c").condition(CONDITION_DEGRADED).unwrap().is_true());

    bump_storage(&h, "1s");
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    let status = h.status::<VMCluster>("c");
    assert_eq!(status.update_status, Some(UpdateStatus::Ready));
    assert_eq!(status.rollouts["vmstorage"].state, RolloutState::Converged);
    let degraded = status.condition(CONDITION_DEGRADED).unwrap();
    assert!(degraded.is_true());
    assert_eq!(degraded.reason, "AppReadyTimeout");
    assert!(degraded.message.contains("vmstorage"));
}

#[tokio::test(start_paused = true)]
pub async fn test_app_ready_timeout_spans_paused_passes() {
    println!("Testing that the app ready timeout counts from the first pass of a rollout...");
    let config = OperatorConfig {
        app_ready_timeout: Duration::from_secs(15),
        ..test_config()
    };
    let h = converged_with(config).await;
    h.never_ready.lock().insert("vmstorage-c-1".to_string());
    bump_storage(&h, "1s");

    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Reconciling));
    let status = h.status::<VMCluster>("c");
    let rollout = &status.rollouts["vmstorage"];
    assert_eq!(rollout.state, RolloutState::Paused);
    let started_at = rollout.started_at.clone();
    assert!(started_at.is_some());

    h.never_ready.lock().clear();
    tokio::time::sleep(Duration::from_secs(5)).await;
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    let status = h.status::<VMCluster>("c");
    assert_eq!(status.rollouts["vmstorage"].state, RolloutState::Converged);
    assert_eq!(status.rollouts["vmstorage"].started_at, None);
    let degraded = status.condition(CONDITION_DEGRADED).unwrap();
    assert!(degraded.is_true());
    assert_eq!(degraded.reason, "AppReadyTimeout");

    // once settled, the next pass clears the condition
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    assert!(!h.status::<VMCluster>("c").condition(CONDITION_DEGRADED).unwrap().is_true());
}
