// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use crate::kubernetes_api_objects::StoreError;
use crate::reconciler::graph::ParseError;
use thiserror::Error;

/// ReconcileError classifies everything that can end a reconcile pass.
/// The controller decides between a backoff retry and a plain resync with is_retryable.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReconcileError {
    /// The intent can never be applied as written.
    #[error("invalid spec: {0}")]
    FatalConfig(String),
    /// One config fragment failed to compile; the rest of the intent is applied.
    #[error("{fragment}: {message}")]
    SpecParse { fragment: String, message: String },
    #[error("version conflict on {0} persisted after retries")]
    Conflict(String),
    #[error("store unavailable: {0}")]
    Transient(String),
    /// A replica did not become ready; the rollout resumes on the next pass.
    #[error("{component} rollout paused: {reason}")]
    RolloutStalled { component: String, reason: String },
    #[error("superseded by generation {0}")]
    Superseded(i64),
    #[error("reconcile cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReconcileError::Conflict(_) | ReconcileError::Transient(_) | ReconcileError::Superseded(_)
        )
    }

    /// Transient failures only reach the status after repeated occurrences.
    pub fn is_transient(&self) -> bool {
        matches!(self, ReconcileError::Conflict(_) | ReconcileError::Transient(_))
    }
}

impl From<&ParseError> for ReconcileError {
    fn from(err: &ParseError) -> Self {
        ReconcileError::SpecParse {
            fragment: err.source.clone(),
            message: err.message.clone(),
        }
    }
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(key) => ReconcileError::Conflict(key),
            StoreError::Invalid { key, message } => {
                ReconcileError::FatalConfig(format!("{} rejected by the API server: {}", key, message))
            }
            other => ReconcileError::Transient(other.to_string()),
        }
    }
}
