// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use super::harness::*;
use crate::controllers::common::CONFIG_CHECKSUM_ANNOTATION;
use crate::crds::{
    RemoteWriteSpec, RolloutState, RolloutStatus, UpdateStatus, VMAgent, VMAgentSpec, VMCluster, VMClusterSpec, CONDITION_CONFIG_VALID,
    CONDITION_READY,
};
use crate::kubernetes_api_objects::{Kind, ObjectRef};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::{owned_selector, ParseError};
use crate::reconciler::merge::MergeAction;
use crate::reconciler::status::PassOutcome;
use crate::shim_layer::memory_store::Verb;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;
use std::collections::BTreeMap;

fn agent(scrape_config: Option<&str>) -> VMAgent {
    in_namespace(VMAgent::new(
        "a",
        VMAgentSpec {
            common: app(1),
            remote_write: vec![RemoteWriteSpec {
                url: "http://vminsert:8480/insert/0/prometheus".to_string(),
            }],
            scrape_config: scrape_config.map(|s| s.to_string()),
            persistent_queue: None,
        },
    ))
}

fn cluster(retention: &str) -> VMCluster {
    in_namespace(VMCluster::new(
        "c",
        VMClusterSpec {
            retention_period: retention.to_string(),
            vmstorage: Some(stateful_app(2)),
            vmselect: Some(stateful_app(1)),
            vminsert: Some(app(1)),
            ..VMClusterSpec::default()
        },
    ))
}

fn config_map_data(h: &Harness, name: &str) -> String {
    h.get::<ConfigMap>(name).unwrap().data.unwrap()["scrape.yaml"].clone()
}

fn deployment_checksum(h: &Harness, name: &str) -> Option<String> {
    h.get::<Deployment>(name)
        .unwrap()
        .spec
        .unwrap()
        .template
        .metadata
        .and_then(|m| m.annotations)
        .and_then(|a| a.get(CONFIG_CHECKSUM_ANNOTATION).cloned())
}

#[tokio::test(start_paused = true)]
pub async fn test_second_pass_is_idempotent() {
    println!("Testing that a converged intent issues no writes...");
    let h = Harness::new();
    let _sim = h.start_simulator();
    h.seed(&cluster("1"));

    let first = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(first.update_status, Some(UpdateStatus::Ready));
    assert!(first.status_written);
    assert!(first.applied.iter().all(|(_, action)| *action == MergeAction::Create));
    assert!(h.get::<StatefulSet>("vmstorage-c").is_some());
    assert!(h.get::<StatefulSet>("vmselect-c").is_some());
    assert!(h.get::<Deployment>("vminsert-c").is_some());

    h.store.clear_ops();
    let second = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(second.update_status, Some(UpdateStatus::Ready));
    assert!(!second.status_written);
    assert!(second.applied.iter().all(|(_, action)| *action == MergeAction::NoOp));
    assert!(second.deleted.is_empty());
    assert_eq!(h.store.ops(), Vec::new());
}

#[tokio::test(start_paused = true)]
pub async fn test_graph_objects_are_owned_by_the_intent() {
    println!("Testing owner references and labels on created objects...");
    let h = Harness::new();
    h.seed(&agent(None));
    h.reconcile::<VMAgent>("a").await.unwrap();

    let intent = h.get::<VMAgent>("a").unwrap();
    let uid = intent.meta().uid.clone().unwrap();
    for meta in [
        h.get::<ConfigMap>("vmagent-a-config").unwrap().metadata,
        h.get::<Service>("vmagent-a").unwrap().metadata,
        h.get::<Deployment>("vmagent-a").unwrap().metadata,
    ] {
        let owners = meta.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, uid);
        assert_eq!(owners[0].controller, Some(true));
        let labels = meta.labels.unwrap();
        for (k, v) in owned_selector("a") {
            assert_eq!(labels.get(&k), Some(&v));
        }
    }
}

#[tokio::test(start_paused = true)]
pub async fn test_fatal_spec_writes_nothing() {
    println!("Testing that an invalid spec is reported without touching objects...");
    let h = Harness::new();
    h.seed(&cluster(""));

    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Failed));
    assert!(report.applied.is_empty());
    assert_eq!(h.object_writes(), Vec::new());

    let status = h.status::<VMCluster>("c");
    assert_eq!(status.update_status, Some(UpdateStatus::Failed));
    assert_eq!(status.observed_generation, Some(1));
    assert!(status.reason.as_deref().unwrap_or_default().contains("retentionPeriod"));
    let ready = status.condition(CONDITION_READY).unwrap();
    assert!(!ready.is_true());
    assert_eq!(ready.reason, "InvalidSpec");
}

#[tokio::test(start_paused = true)]
pub async fn test_managed_flag_override_is_fatal() {
    println!("Testing extraArgs that collide with managed flags...");
    let h = Harness::new();
    let mut intent = agent(None);
    intent
        .spec
        .common
        .extra_args
        .insert("-remoteWrite.url".to_string(), "http://elsewhere".to_string());
    h.seed(&intent);
    let report = h.reconcile::<VMAgent>("a").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Failed));
    assert_eq!(h.object_writes(), Vec::new());
}

#[tokio::test(start_paused = true)]
pub async fn test_status_write_is_skipped_when_unchanged() {
    println!("Testing that an unchanged failure is not rewritten...");
    let h = Harness::new();
    h.seed(&cluster(""));
    h.reconcile::<VMCluster>("c").await.unwrap();
    h.store.clear_ops();
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert!(!report.status_written);
    assert_eq!(h.store.ops(), Vec::new());
}

#[tokio::test(start_paused = true)]
pub async fn test_missing_intent_is_a_no_op() {
    println!("Testing a reconcile of a deleted intent...");
    let h = Harness::new();
    let report = h.reconcile::<VMAgent>("gone").await.unwrap();
    assert_eq!(report.update_status, None);
    assert_eq!(h.store.ops(), Vec::new());
}

#[tokio::test(start_paused = true)]
pub async fn test_prune_only_touches_owned_objects() {
    println!("Testing deletion safety of the prune step...");
    let h = Harness::new();
    let _sim = h.start_simulator();
    h.seed(&cluster("1"));
    h.reconcile::<VMCluster>("c").await.unwrap();

    let intent = h.get::<VMCluster>("c").unwrap();
    let owner = intent.controller_owner_ref(&()).unwrap();
    let stale = in_namespace(ConfigMap {
        metadata: ObjectMeta {
            name: Some("stale".to_string()),
            labels: Some(owned_selector("c")),
            owner_references: Some(vec![owner]),
            ..ObjectMeta::default()
        },
        ..ConfigMap::default()
    });
    let foreign = in_namespace(ConfigMap {
        metadata: ObjectMeta {
            name: Some("foreign".to_string()),
            labels: Some(owned_selector("c")),
            ..ObjectMeta::default()
        },
        ..ConfigMap::default()
    });
    h.seed(&stale);
    h.seed(&foreign);

    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(
        report.deleted,
        vec![ObjectRef::new(Kind::ConfigMapKind, NAMESPACE, "stale")]
    );
    assert!(h.get::<ConfigMap>("stale").is_none());
    assert!(h.get::<ConfigMap>("foreign").is_some());
}

#[tokio::test(start_paused = true)]
pub async fn test_removed_tier_is_pruned() {
    println!("Testing that dropping a tier deletes its objects...");
    let h = Harness::new();
    let _sim = h.start_simulator();
    h.seed(&cluster("1"));
    h.reconcile::<VMCluster>("c").await.unwrap();

    let mut intent = h.get::<VMCluster>("c").unwrap();
    intent.spec.vmselect = None;
    h.seed(&intent);
    let report = h.reconcile::<VMCluster>("c").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    assert_eq!(
        report.deleted,
        vec![
            ObjectRef::new(Kind::ServiceKind, NAMESPACE, "vmselect-c"),
            ObjectRef::new(Kind::StatefulSetKind, NAMESPACE, "vmselect-c"),
        ]
    );
    assert!(h.get::<StatefulSet>("vmstorage-c").is_some());
    assert!(h.get::<Deployment>("vminsert-c").is_some());
}

#[tokio::test(start_paused = true)]
pub async fn test_unparsable_scrape_config_keeps_live_config() {
    println!("Testing that a parse error retains the last good config...");
    let h = Harness::new();
    h.seed(&agent(Some("scrape_configs:\n- job_name: node\n")));
    let report = h.reconcile::<VMAgent>("a").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    let good = config_map_data(&h, "vmagent-a-config");
    let checksum = deployment_checksum(&h, "vmagent-a");
    assert!(good.contains("job_name: node"));
    assert!(checksum.is_some());

    let mut intent = h.get::<VMAgent>("a").unwrap();
    intent.spec.scrape_config = Some("- just\n- a list\n".to_string());
    h.seed(&intent);
    let report = h.reconcile::<VMAgent>("a").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Failed));
    assert!(report.deleted.is_empty());
    assert_eq!(config_map_data(&h, "vmagent-a-config"), good);
    assert_eq!(deployment_checksum(&h, "vmagent-a"), checksum);

    let status = h.status::<VMAgent>("a");
    assert_eq!(status.parse_errors.len(), 1);
    assert_eq!(status.parse_errors[0].source, "scrapeConfig");
    assert!(status.reason.as_deref().unwrap_or_default().starts_with("scrapeConfig: "));
    let config_valid = status.condition(CONDITION_CONFIG_VALID).unwrap();
    assert!(!config_valid.is_true());
    assert_eq!(config_valid.reason, "ParseError");
}

#[tokio::test(start_paused = true)]
pub async fn test_config_change_rolls_checksum() {
    println!("Testing that a new scrape config changes the pod template...");
    let h = Harness::new();
    h.seed(&agent(Some("global:\n  scrape_interval: 30s\n")));
    h.reconcile::<VMAgent>("a").await.unwrap();
    let before = deployment_checksum(&h, "vmagent-a");

    let mut intent = h.get::<VMAgent>("a").unwrap();
    intent.spec.scrape_config = Some("global:\n  scrape_interval: 10s\n".to_string());
    h.seed(&intent);
    h.store.clear_ops();
    h.reconcile::<VMAgent>("a").await.unwrap();
    assert_ne!(deployment_checksum(&h, "vmagent-a"), before);
    let replaced: Vec<Kind> = h
        .object_writes()
        .into_iter()
        .filter(|op| op.verb == Verb::Replace)
        .map(|op| op.key.kind)
        .collect();
    assert_eq!(replaced, vec![Kind::ConfigMapKind, Kind::DeploymentKind]);
}

#[tokio::test(start_paused = true)]
pub async fn test_conflicts_are_retried() {
    println!("Testing recovery from version conflicts...");
    let h = Harness::new();
    h.seed(&agent(None));
    h.store.inject_conflicts(2);
    let report = h.reconcile::<VMAgent>("a").await.unwrap();
    assert_eq!(report.update_status, Some(UpdateStatus::Ready));
    assert_eq!(h.status::<VMAgent>("a").update_status, Some(UpdateStatus::Ready));
}

#[tokio::test(start_paused = true)]
pub async fn test_exhausted_conflicts_fail_the_pass() {
    println!("Testing conflict retry exhaustion...");
    let h = Harness::new();
    h.seed(&agent(None));
    h.store.inject_conflicts(100);
    let key = ObjectRef::new(Kind::VMAgentKind, NAMESPACE, "a");
    let err = h.reconcile::<VMAgent>("a").await.unwrap_err();
    assert!(matches!(err, ReconcileError::Conflict(_)));
    assert!(err.is_retryable());
    assert_eq!(h.ctx.failure_count(&key), 1);
    assert_eq!(h.get::<VMAgent>("a").unwrap().status, None);
}

#[tokio::test(start_paused = true)]
pub async fn test_transient_failures_reach_status_after_threshold() {
    println!("Testing the transient failure threshold...");
    let h = Harness::new();
    h.seed(&agent(None));
    let key = ObjectRef::new(Kind::VMAgentKind, NAMESPACE, "a");
    let threshold = h.ctx.config.transient_failure_threshold;

    for attempt in 1..=threshold {
        h.store.inject_transient(1);
        let err = h.reconcile::<VMAgent>("a").await.unwrap_err();
        assert!(matches!(err, ReconcileError::Transient(_)));
        assert_eq!(h.ctx.failure_count(&key), attempt);
        assert_eq!(h.get::<VMAgent>("a").unwrap().status, None);
    }

    h.store.inject_transient(1);
    h.reconcile::<VMAgent>("a").await.unwrap_err();
    let status = h.status::<VMAgent>("a");
    assert_eq!(status.update_status, Some(UpdateStatus::Failed));
    assert_eq!(status.condition(CONDITION_READY).unwrap().reason, "StoreUnavailable");

    h.reconcile::<VMAgent>("a").await.unwrap();
    assert_eq!(h.ctx.failure_count(&key), 0);
    assert_eq!(h.status::<VMAgent>("a").update_status, Some(UpdateStatus::Ready));
}

#[tokio::test(start_paused = true)]
pub async fn test_foreign_labels_on_owned_objects_survive() {
    println!("Testing that labels added by other actors are kept...");
    let h = Harness::new();
    h.seed(&agent(None));
    h.reconcile::<VMAgent>("a").await.unwrap();

    let mut svc = h.get::<Service>("vmagent-a").unwrap();
    svc.metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert("team".to_string(), "ops".to_string());
    h.seed(&svc);
    h.store.clear_ops();

    let report = h.reconcile::<VMAgent>("a").await.unwrap();
    assert!(report.applied.iter().all(|(_, action)| *action == MergeAction::NoOp));
    assert_eq!(h.store.ops(), Vec::new());
    assert_eq!(
        h.get::<Service>("vmagent-a").unwrap().metadata.labels.unwrap()["team"],
        "ops"
    );
}

#[test]
pub fn test_soft_errors_are_classified() {
    println!("Testing the errors a pass finishes with...");
    let outcome = PassOutcome {
        generation: 4,
        parse_errors: vec![ParseError::new("receivers", "unknown field")],
        rollouts: BTreeMap::from([
            (
                "vmstorage".to_string(),
                RolloutStatus {
                    state: RolloutState::Paused,
                    reason: Some("replica vmstorage-c-0 not ready within 10s".to_string()),
                    ..RolloutStatus::default()
                },
            ),
            (
                "vmselect".to_string(),
                RolloutStatus {
                    state: RolloutState::Converged,
                    ..RolloutStatus::default()
                },
            ),
        ]),
        ..PassOutcome::default()
    };
    let errors = outcome.soft_errors();
    assert_eq!(
        errors,
        vec![
            ReconcileError::SpecParse {
                fragment: "receivers".to_string(),
                message: "unknown field".to_string(),
            },
            ReconcileError::RolloutStalled {
                component: "vmstorage".to_string(),
                reason: "replica vmstorage-c-0 not ready within 10s".to_string(),
            },
        ]
    );
    assert!(errors.iter().all(|e| !e.is_retryable()));
    assert_eq!(errors[0].to_string(), "receivers: unknown field");
}
