// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::crds::{common::*, status::*};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(group = "operator.victoriametrics.com", version = "v1beta1", kind = "VMAlertmanager")]
#[kube(shortname = "vmam", namespaced, status = "IntentStatus")]
#[kube(printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.updateStatus"}"#)]
#[serde(rename_all = "camelCase")]
pub struct VMAlertmanagerSpec {
    #[serde(flatten)]
    pub app: StatefulAppSpec,
    /// Base alertmanager configuration, VMAlertmanagerConfig routes are appended to it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_raw_yaml: Option<String>,
    #[serde(default)]
    pub select_all_by_default: bool,
    /// Match labels for VMAlertmanagerConfig objects in the same namespace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_selector: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub disable_route_continue_enforce: bool,
}

impl HasStatus for VMAlertmanager {
    fn status(&self) -> Option<&IntentStatus> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: IntentStatus) {
        self.status = Some(status);
    }
}
