// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod config_compiler;
pub mod resource;
pub mod route_tree;

use crate::config::OperatorConfig;
use crate::controllers::common::{config_checksum, rollout_policy, validate_app};
use crate::crds::{VMAlertmanager, VMAlertmanagerConfig, VMAlertmanagerConfigStatus};
use crate::kubernetes_api_objects::StoreError;
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::{ObjectGraph, ParseError, Synthesis};
use crate::reconciler::intent::Intent;
use crate::reconciler::status::{compute_status, PassOutcome};
use crate::shim_layer::store::{get_typed, labels_match, list_typed, replace_status_typed, ObjectStore};
use async_trait::async_trait;
use config_compiler::{compile, config_source};
use kube::ResourceExt;
use resource::*;
use std::collections::BTreeMap;
use tracing::{debug, info};

const MANAGED_FLAGS: [&str; 5] = [
    "config.file",
    "storage.path",
    "web.listen-address",
    "cluster.listen-address",
    "cluster.peer",
];

#[async_trait]
impl Intent for VMAlertmanager {
    type Inputs = Vec<VMAlertmanagerConfig>;

    fn validate(&self) -> Result<(), ReconcileError> {
        validate_app(VMALERTMANAGER, &self.spec.app.common, &MANAGED_FLAGS)
    }

    /// Selected configs live in the alertmanager's namespace. An explicit
    /// selector wins over selectAllByDefault.
    async fn gather(&self, store: &dyn ObjectStore) -> Result<Vec<VMAlertmanagerConfig>, ReconcileError> {
        let namespace = self.namespace().unwrap_or_default();
        let selector = match (&self.spec.config_selector, self.spec.select_all_by_default) {
            (Some(selector), _) => selector.clone(),
            (None, true) => BTreeMap::new(),
            (None, false) => return Ok(Vec::new()),
        };
        let configs = list_typed::<VMAlertmanagerConfig>(store, &namespace, &selector).await?;
        debug!(intent = %self.name_any(), selected = configs.len(), "gathered alertmanager configs");
        Ok(configs)
    }

    fn synthesize(&self, inputs: &Vec<VMAlertmanagerConfig>, config: &OperatorConfig) -> Synthesis {
        let compiled = compile(
            self.spec.config_raw_yaml.as_deref(),
            inputs,
            !self.spec.disable_route_continue_enforce,
        );
        let mut graph = ObjectGraph::new();
        graph.push(VMALERTMANAGER, make_config_secret(self, &compiled.yaml));
        graph.push(VMALERTMANAGER, make_vmalertmanager_service(self, config));
        graph.push_stateful(
            VMALERTMANAGER,
            make_vmalertmanager_stateful_set(self, config_checksum(&compiled.yaml), config),
            rollout_policy(self.spec.app.rolling_update.as_ref(), config),
        );
        Synthesis {
            graph,
            parse_errors: compiled.errors,
        }
    }

    async fn publish_input_statuses(
        &self,
        store: &dyn ObjectStore,
        config: &OperatorConfig,
        inputs: &Vec<VMAlertmanagerConfig>,
        synthesis: &Synthesis,
    ) -> Result<(), ReconcileError> {
        let parent = self.name_any();
        for cfg in inputs {
            let source = config_source(cfg);
            let error = synthesis.parse_errors.iter().find(|e| e.source == source);
            write_config_status(store, config, cfg, &parent, error).await?;
        }
        Ok(())
    }
}

/// Whether `alertmanager` compiles `cfg` into its configuration. Only
/// configs of the same namespace are ever considered.
pub fn selects_config(alertmanager: &VMAlertmanager, cfg: &VMAlertmanagerConfig) -> bool {
    match &alertmanager.spec.config_selector {
        Some(selector) => labels_match(cfg.metadata.labels.as_ref(), selector),
        None => alertmanager.spec.select_all_by_default,
    }
}

/// Status of one config as seen by `parent`. Returns None when another
/// alertmanager reported the last error, so a passing check here does not
/// hide it.
pub fn config_status(
    previous: Option<&VMAlertmanagerConfigStatus>,
    generation: i64,
    parent: &str,
    error: Option<&ParseError>,
) -> Option<VMAlertmanagerConfigStatus> {
    let last_parent = previous.and_then(|p| p.last_error_parent_alertmanager_name.as_deref());
    if error.is_none() && last_parent.map_or(false, |p| p != parent) {
        return None;
    }
    let outcome = PassOutcome {
        generation,
        parse_errors: error.cloned().into_iter().collect(),
        ..PassOutcome::default()
    };
    Some(VMAlertmanagerConfigStatus {
        common: compute_status(previous.map(|p| &p.common), &outcome),
        last_error_parent_alertmanager_name: error.map(|_| parent.to_string()),
    })
}

async fn write_config_status(
    store: &dyn ObjectStore,
    config: &OperatorConfig,
    cfg: &VMAlertmanagerConfig,
    parent: &str,
    error: Option<&ParseError>,
) -> Result<(), ReconcileError> {
    let namespace = cfg.namespace().unwrap_or_default();
    let name = cfg.name_any();
    for _ in 0..=config.conflict_retries {
        let mut current = match get_typed::<VMAlertmanagerConfig>(store, &namespace, &name).await? {
            Some(current) => current,
            None => return Ok(()),
        };
        let generation = current.metadata.generation.unwrap_or(0);
        let next = match config_status(current.status.as_ref(), generation, parent, error) {
            Some(next) => next,
            None => return Ok(()),
        };
        if current.status.as_ref() == Some(&next) {
            return Ok(());
        }
        current.status = Some(next);
        match replace_status_typed(store, &current).await {
            Ok(_) => {
                info!(config = %source_key(&namespace, &name), parent, failed = error.is_some(), "updated alertmanager config status");
                return Ok(());
            }
            Err(StoreError::Conflict(_)) => continue,
            Err(err) => return Err(err.into()),
        }
    }
    Err(ReconcileError::Conflict(source_key(&namespace, &name)))
}

fn source_key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
