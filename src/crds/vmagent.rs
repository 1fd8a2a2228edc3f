// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{common::*, status::*};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.victoriametrics.com", version = "v1beta1", kind = "VMAgent")]
#[kube(shortname = "vma", namespaced, status = "IntentStatus")]
#[kube(printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.updateStatus"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VMAgentSpec {
    #[serde(flatten)]
    pub common: CommonAppSpec,
    #[serde(default)]
    pub remote_write: Vec<RemoteWriteSpec>,
    /// Inline scrape configuration, must be a YAML mapping.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_config: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persistent_queue: Option<StorageSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct RemoteWriteSpec {
    pub url: String,
}

impl HasStatus for VMAgent {
    fn status(&self) -> Option<&IntentStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: IntentStatus) {
        self.status = Some(status);
    }
}
