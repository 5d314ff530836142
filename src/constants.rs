// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for kubepipe.
//!
//! This module contains the metadata keys, plugin names and numeric defaults used
//! throughout the codebase. Constants are organized by category for easy maintenance.

// ============================================================================
// Plugin Names
// ============================================================================

/// Registered name of the watch input, the object writer and the ad-hoc processor
pub const PLUGIN_KUBERNETES: &str = "kubernetes";

/// Registered name of the status-subresource writer
pub const PLUGIN_KUBERNETES_STATUS: &str = "kubernetes_status";

// ============================================================================
// Message Metadata Keys
// ============================================================================

/// API group of the object carried by a message part
pub const META_GROUP: &str = "group";

/// API version of the object carried by a message part
pub const META_VERSION: &str = "version";

/// Kind of the object carried by a message part
pub const META_KIND: &str = "kind";

/// Namespace of the object carried by a message part (empty for cluster-scoped objects)
pub const META_NAMESPACE: &str = "namespace";

/// Name of the object carried by a message part
pub const META_NAME: &str = "name";

/// Present and non-empty when the object no longer exists in the cluster
pub const META_DELETED: &str = "deleted";

/// Value written to [`META_DELETED`] by the watch input
pub const META_DELETED_VALUE: &str = "true";

/// Requeue hint set by pipeline logic, as a Go-style duration string (e.g. `30s`)
pub const META_REQUEUE_AFTER: &str = "requeue_after";

/// Payload carried by a message when the watched object was deleted
pub const DELETED_PLACEHOLDER: &[u8] = b"{}";

// ============================================================================
// Plugin Defaults
// ============================================================================

/// Default number of messages a writer processes concurrently
pub const DEFAULT_MAX_IN_FLIGHT: usize = 1;

/// Default number of reconciliations the watch mechanism runs concurrently
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: usize = 1;

/// Capacity of the transaction channel between the input and the pipeline
pub const TRANSACTION_CHANNEL_CAPACITY: usize = 1;

/// Capacity of the channel between pipeline stages
pub const STAGE_CHANNEL_CAPACITY: usize = 1;

/// Default time allowed for a stream to shut down, as a duration string
pub const DEFAULT_SHUTDOWN_TIMEOUT: &str = "30s";

// ============================================================================
// Watch Mechanism Backoff Constants
// ============================================================================

/// Initial requeue delay after a failed reconciliation (100ms)
pub const ERROR_BACKOFF_INITIAL_MILLIS: u64 = 100;

/// Maximum requeue delay after repeated failed reconciliations (30 seconds)
pub const ERROR_BACKOFF_MAX_SECS: u64 = 30;

/// Backoff multiplier (exponential growth factor)
pub const ERROR_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Randomization factor to prevent thundering herd (±10%)
pub const ERROR_BACKOFF_RANDOMIZATION_FACTOR: f64 = 0.1;

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
