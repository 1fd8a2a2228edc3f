// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::config::OperatorConfig;
use kube::runtime::controller::Action;
use std::time::Duration;

const BACKOFF_BASE: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Requeue after a finished pass: the jittered resync interval, or wait for
/// the next change notification when resync is disabled.
pub fn requeue_action(config: &OperatorConfig) -> Action {
    match config.resync_after_duration() {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

/// Retry delay after `failures` consecutive transient failures: 5s doubling
/// per failure, capped at five minutes.
pub fn backoff(failures: u32) -> Duration {
    let exp = failures.saturating_sub(1).min(16);
    std::cmp::min(BACKOFF_BASE.saturating_mul(1u32 << exp), BACKOFF_CAP)
}
