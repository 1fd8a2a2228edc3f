// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod resource;

use crate::config::OperatorConfig;
use crate::controllers::common::{config_checksum, validate_app};
use crate::crds::VMAgent;
use crate::kubernetes_api_objects::{Kind, ObjectRef};
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::{ObjectGraph, ParseError, Synthesis};
use crate::reconciler::intent::Intent;
use crate::shim_layer::store::ObjectStore;
use async_trait::async_trait;
use kube::ResourceExt;
use resource::*;
use std::collections::BTreeSet;

const MANAGED_FLAGS: [&str; 4] = [
    "promscrape.config",
    "remoteWrite.url",
    "httpListenAddr",
    "remoteWrite.tmpDataPath",
];

#[async_trait]
impl Intent for VMAgent {
    type Inputs = ();

    fn validate(&self) -> Result<(), ReconcileError> {
        validate_app(VMAGENT, &self.spec.common, &MANAGED_FLAGS)?;
        if self.spec.remote_write.is_empty() {
            return Err(ReconcileError::FatalConfig(
                "remoteWrite must name at least one url".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for rw in &self.spec.remote_write {
            if rw.url.trim().is_empty() {
                return Err(ReconcileError::FatalConfig("remoteWrite url must not be empty".to_string()));
            }
            if !seen.insert(rw.url.as_str()) {
                return Err(ReconcileError::FatalConfig(format!("duplicate remoteWrite url {}", rw.url)));
            }
        }
        Ok(())
    }

    async fn gather(&self, _store: &dyn ObjectStore) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// A scrape configuration that does not parse leaves the live ConfigMap
    /// and the pod checksum untouched; everything else is still rendered.
    fn synthesize(&self, _inputs: &(), config: &OperatorConfig) -> Synthesis {
        let mut graph = ObjectGraph::new();
        let mut parse_errors = Vec::new();
        let checksum = match render_scrape_config(self) {
            Ok(content) => {
                let checksum = config_checksum(&content);
                graph.push(VMAGENT, make_config_map(self, content));
                Some(checksum)
            }
            Err(message) => {
                parse_errors.push(ParseError::new("scrapeConfig", message));
                graph.retain(ObjectRef::new(
                    Kind::ConfigMapKind,
                    &self.namespace().unwrap_or_default(),
                    &make_config_map_name(self),
                ));
                None
            }
        };
        if let Some(claim) = make_queue_claim(self) {
            graph.push(VMAGENT, claim);
        }
        graph.push(VMAGENT, make_vmagent_service(self, config));
        graph.push(VMAGENT, make_vmagent_deployment(self, checksum, config));
        Synthesis { graph, parse_errors }
    }
}
