// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod config;
pub mod controllers;
pub mod crds;
pub mod kubernetes_api_objects;
pub mod reconciler;
pub mod shim_layer;

#[cfg(test)]
mod unit_tests;
