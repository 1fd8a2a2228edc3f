// Copyright 2022 VMware, Inc.
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// StoreError is what every ObjectStore operation reports.
/// Reasons returned by the API server are folded into the few classes
/// the reconciler distinguishes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("object {0} not found")]
    NotFound(String),
    #[error("object {0} already exists")]
    AlreadyExists(String),
    #[error("version conflict on {0}")]
    Conflict(String),
    #[error("object {key} rejected: {message}")]
    Invalid { key: String, message: String },
    #[error("store unavailable: {0}")]
    Transient(String),
    #[error("failed to convert object: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

/// kube_error_to_store_error translates an error from kube-rs into a StoreError
/// using the reason carried by the API response.
pub fn kube_error_to_store_error(key: &str, error: kube::Error) -> StoreError {
    match error {
        kube::Error::Api(resp) => match resp.reason.as_str() {
            "NotFound" => StoreError::NotFound(key.to_string()),
            "AlreadyExists" => StoreError::AlreadyExists(key.to_string()),
            "Conflict" => StoreError::Conflict(key.to_string()),
            "Invalid" | "BadRequest" | "Forbidden" => StoreError::Invalid {
                key: key.to_string(),
                message: resp.message,
            },
            // InternalError, Timeout, ServerTimeout, TooManyRequests and anything unknown
            _ => StoreError::Transient(format!("{}: {}", resp.reason, resp.message)),
        },
        kube::Error::SerdeError(err) => StoreError::Serialization(err.to_string()),
        other => StoreError::Transient(other.to_string()),
    }
}
