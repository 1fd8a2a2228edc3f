// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod common;
pub mod status;
pub mod vmagent;
pub mod vmalertmanager;
pub mod vmalertmanagerconfig;
pub mod vmcluster;

pub use common::*;
pub use status::*;
pub use vmagent::*;
pub use vmalertmanager::*;
pub use vmalertmanagerconfig::*;
pub use vmcluster::*;

pub const GROUP: &str = "operator.victoriametrics.com";
