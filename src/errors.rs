// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for kubepipe.
//!
//! This module provides specialized error types for:
//! - Plugin configuration (construction-time failures)
//! - Kubernetes API calls made by the writers and the processor
//! - Message handling inside the pipeline
//! - Reconciliation of watched objects
//! - Startup and shutdown of the watch mechanism
//!
//! Configuration errors prevent a component from starting. Every other error is
//! surfaced to the caller and never retried locally: the watch mechanism owns the
//! requeue policy for the input side, and the pipeline's own error handling owns it
//! for the output side.

use crate::client::ObjectIdentity;
use std::time::Duration;
use thiserror::Error;

/// Errors detected while building a plugin from its configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A watch entry is missing its version or kind
    #[error("Watch entry {index} is missing required field '{field}'")]
    MissingWatchField {
        /// Position of the entry in the `watches` list
        index: usize,
        /// Name of the missing field
        field: &'static str,
    },

    /// A selector requirement uses an operator other than In, NotIn, Exists, DoesNotExist
    #[error("Invalid selector operator '{operator}' for key '{key}'")]
    InvalidSelectorOperator {
        /// The label key of the requirement
        key: String,
        /// The rejected operator
        operator: String,
    },

    /// A selector requirement has values inconsistent with its operator
    #[error("Invalid selector values for key '{key}': {reason}")]
    InvalidSelectorValues {
        /// The label key of the requirement
        key: String,
        /// Explanation of what is invalid
        reason: String,
    },

    /// The processor operator is not one of get, create, update, delete
    #[error("Unknown operator '{0}': expected one of get, create, update, delete")]
    UnknownOperator(String),

    /// `max_in_flight` must be at least one
    #[error("max_in_flight must be at least 1, got {0}")]
    InvalidMaxInFlight(usize),

    /// `max_concurrent_reconciles` must be at least one
    #[error("max_concurrent_reconciles must be at least 1, got {0}")]
    InvalidConcurrency(usize),

    /// No plugin is registered under this name
    #[error("No {kind} plugin registered under the name '{name}'")]
    UnknownPlugin {
        /// Plugin kind (input, output, processor)
        kind: &'static str,
        /// The requested plugin name
        name: String,
    },

    /// The plugin configuration could not be deserialized
    #[error("Invalid configuration for {kind} '{name}': {reason}")]
    InvalidPluginConfig {
        /// Plugin kind (input, output, processor)
        kind: &'static str,
        /// The plugin name
        name: String,
        /// Deserializer message
        reason: String,
    },
}

/// Errors returned by the cluster API client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The Kubernetes client could not be constructed (no kubeconfig, no in-cluster env)
    #[error("Failed to connect to the Kubernetes API: {0}")]
    Connect(#[source] kube::Error),

    /// The API server rejected or failed the request
    #[error(transparent)]
    Api(#[from] kube::Error),
}

impl ClientError {
    /// Returns `true` when the API server reported that the object does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Api(kube::Error::Api(response)) => {
                response.code == 404 || response.reason == "NotFound"
            }
            _ => false,
        }
    }
}

/// Errors produced while a message travels through the pipeline.
///
/// A `PipelineError` is what a terminal stage reports on a transaction's outcome, and
/// what the processor attaches to a part when it flags it.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The part payload is not a valid Kubernetes object document
    #[error("Failed to decode object from message part: {0}")]
    Decode(#[source] serde_json::Error),

    /// The object could not be written back into the message part
    #[error("Failed to encode object into message part: {0}")]
    Encode(#[source] serde_json::Error),

    /// Neither the part metadata nor the object carry enough identity to address it
    #[error("Cannot determine object identity: missing {0}")]
    MissingIdentity(&'static str),

    /// A Kubernetes API call failed
    #[error("Failed to {operation} {identity}: {source}")]
    Client {
        /// The attempted operation (create, update, delete, update_status, get)
        operation: &'static str,
        /// The addressed object
        identity: ObjectIdentity,
        /// Underlying client error
        #[source]
        source: ClientError,
    },

    /// A pipeline stage refused the message
    #[error("Message rejected: {0}")]
    Rejected(String),
}

/// Errors returned from a single reconciliation to the watch mechanism.
///
/// Every variant is requeue-worthy; the watch mechanism applies its backoff policy.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// The object could not be looked up for a reason other than not-found
    #[error("Failed to fetch {kind} {namespace}/{name}: {reason}")]
    Fetch {
        /// Kind of the object
        kind: String,
        /// Namespace of the object (empty for cluster-scoped objects)
        namespace: String,
        /// Name of the object
        name: String,
        /// Lookup failure
        reason: String,
    },

    /// The fetched object could not be serialized into a message
    #[error("Failed to serialize {kind} {namespace}/{name}: {source}")]
    Encode {
        /// Kind of the object
        kind: String,
        /// Namespace of the object (empty for cluster-scoped objects)
        namespace: String,
        /// Name of the object
        name: String,
        /// Serialization failure
        #[source]
        source: serde_json::Error,
    },

    /// The pipeline reported a failure for the message
    #[error("Pipeline failed to process message: {0}")]
    Pipeline(#[from] PipelineError),

    /// The pipeline dropped the transaction without reporting an outcome
    #[error("Transaction was dropped by the pipeline without an outcome")]
    Abandoned,
}

/// Errors raised by the watch mechanism itself.
#[derive(Error, Debug)]
pub enum WatchError {
    /// The Kubernetes client could not be constructed
    #[error("Failed to connect to the Kubernetes API: {0}")]
    Connect(#[source] kube::Error),
}

/// Errors returned while shutting a plugin down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloseError {
    /// The component did not finish closing in time
    #[error("Timed out after {0:?} waiting for close")]
    Timeout(Duration),

    /// The run loop stopped on its own because of an error
    #[error("Stopped with an error: {0}")]
    Failed(String),
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
