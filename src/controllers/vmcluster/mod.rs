// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod resource;

use crate::config::OperatorConfig;
use crate::controllers::common::{rollout_policy, validate_app};
use crate::crds::VMCluster;
use crate::reconciler::error::ReconcileError;
use crate::reconciler::graph::{ObjectGraph, Synthesis};
use crate::reconciler::intent::Intent;
use crate::shim_layer::store::ObjectStore;
use async_trait::async_trait;
use resource::*;

const MANAGED_FLAGS: [&str; 5] = [
    "storageNode",
    "httpListenAddr",
    "retentionPeriod",
    "storageDataPath",
    "replicationFactor",
];

#[async_trait]
impl Intent for VMCluster {
    type Inputs = ();

    fn validate(&self) -> Result<(), ReconcileError> {
        let spec = &self.spec;
        if spec.retention_period.trim().is_empty() {
            return Err(ReconcileError::FatalConfig("retentionPeriod must not be empty".to_string()));
        }
        if spec.vmstorage.is_none() && (spec.vmselect.is_some() || spec.vminsert.is_some()) {
            return Err(ReconcileError::FatalConfig(
                "vmselect and vminsert require vmstorage to be defined".to_string(),
            ));
        }
        if let Some(rf) = spec.replication_factor {
            if rf < 1 {
                return Err(ReconcileError::FatalConfig(format!(
                    "replicationFactor must be at least 1, got {}",
                    rf
                )));
            }
        }
        if let Some(vmstorage) = &spec.vmstorage {
            validate_app(VMSTORAGE, &vmstorage.common, &MANAGED_FLAGS)?;
        }
        if let Some(vmselect) = &spec.vmselect {
            validate_app(VMSELECT, &vmselect.common, &MANAGED_FLAGS)?;
        }
        if let Some(vminsert) = &spec.vminsert {
            validate_app(VMINSERT, vminsert, &MANAGED_FLAGS)?;
        }
        Ok(())
    }

    async fn gather(&self, _store: &dyn ObjectStore) -> Result<(), ReconcileError> {
        Ok(())
    }

    /// Tiers are emitted storage first, so that readers and writers only
    /// start once the nodes they address exist.
    fn synthesize(&self, _inputs: &(), config: &OperatorConfig) -> Synthesis {
        let mut graph = ObjectGraph::new();
        if let Some(vmstorage) = &self.spec.vmstorage {
            graph.push(VMSTORAGE, make_vmstorage_service(self, vmstorage, config));
            graph.push_stateful(
                VMSTORAGE,
                make_vmstorage_stateful_set(self, vmstorage, config),
                rollout_policy(vmstorage.rolling_update.as_ref(), config),
            );
        }
        if let Some(vmselect) = &self.spec.vmselect {
            graph.push(VMSELECT, make_vmselect_service(self, vmselect, config));
            graph.push_stateful(
                VMSELECT,
                make_vmselect_stateful_set(self, vmselect, config),
                rollout_policy(vmselect.rolling_update.as_ref(), config),
            );
        }
        if let Some(vminsert) = &self.spec.vminsert {
            graph.push(VMINSERT, make_vminsert_service(self, vminsert, config));
            graph.push(VMINSERT, make_vminsert_deployment(self, vminsert, config));
        }
        Synthesis {
            graph,
            parse_errors: Vec::new(),
        }
    }
}
