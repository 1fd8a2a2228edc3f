// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::OperatorConfig;
use crate::crds::HasStatus;
use crate::kubernetes_api_objects::KubeResource;
use crate::reconciler::{error::ReconcileError, graph::Synthesis};
use crate::shim_layer::store::ObjectStore;
use async_trait::async_trait;

/// Intent is implemented by every resource kind the engine reconciles.
///
/// The engine drives an intent through the same steps on every pass:
/// validate the intent, gather the other intents it depends on, synthesize the
/// desired graph, apply it, then publish the outcome. Only `gather` and
/// `publish_input_statuses` may touch the store; `synthesize` is pure.
#[async_trait]
pub trait Intent: KubeResource + HasStatus {
    /// Objects read from the store that synthesis depends on.
    type Inputs: Send + Sync;

    /// Rejects specs that no retry can fix.
    fn validate(&self) -> Result<(), ReconcileError>;

    async fn gather(&self, store: &dyn ObjectStore) -> Result<Self::Inputs, ReconcileError>;

    fn synthesize(&self, inputs: &Self::Inputs, config: &OperatorConfig) -> Synthesis;

    /// Reports per-input outcomes back onto the inputs themselves.
    async fn publish_input_statuses(
        &self,
        _store: &dyn ObjectStore,
        _config: &OperatorConfig,
        _inputs: &Self::Inputs,
        _synthesis: &Synthesis,
    ) -> Result<(), ReconcileError> {
        Ok(())
    }
}
