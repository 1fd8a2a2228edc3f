// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{common::*, status::*};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.victoriametrics.com", version = "v1beta1", kind = "VMCluster")]
#[kube(shortname = "vmc", namespaced, status = "IntentStatus")]
#[kube(printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.updateStatus"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VMClusterSpec {
    pub retention_period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replication_factor: Option<i32>,
    /// Default image tag for every tier that does not pin its own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmstorage: Option<StatefulAppSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmselect: Option<StatefulAppSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vminsert: Option<CommonAppSpec>,
}

impl HasStatus for VMCluster {
    fn status(&self) -> Option<&IntentStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: IntentStatus) {
        self.status = Some(status);
    }
}
