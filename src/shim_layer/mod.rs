// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod controller_runtime;
pub mod kube_store;
pub mod memory_store;
pub mod store;

pub use controller_runtime::{run_controller, run_operator};
pub use store::ObjectStore;
