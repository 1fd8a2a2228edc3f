// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod common;
pub mod vmagent;
pub mod vmalertmanager;
pub mod vmcluster;
