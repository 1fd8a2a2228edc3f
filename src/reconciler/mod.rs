// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
pub mod apply;
pub mod engine;
pub mod error;
pub mod graph;
pub mod intent;
pub mod merge;
pub mod resync;
pub mod rollout;
pub mod status;

pub use engine::{reconcile_intent, Context, ReconcileReport};
pub use error::ReconcileError;
pub use intent::Intent;
