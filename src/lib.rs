// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Kubepipe - Kubernetes plugins for message pipelines
//!
//! Kubepipe bridges a transaction-based message pipeline and the Kubernetes API.
//! Object change events become pipeline messages, and pipeline messages become
//! creates, updates, deletes and status updates against the cluster.
//!
//! ## Overview
//!
//! The crate provides four plugins:
//!
//! - the `kubernetes` input, which watches resource kinds and turns every change
//!   into a transaction, translating the pipeline's outcome into a requeue decision
//! - the `kubernetes` output, which creates, updates or deletes whole objects
//! - the `kubernetes_status` output, which writes the status subresource
//! - the `kubernetes` processor, which performs get, create, update or delete calls
//!   in the middle of a pipeline
//!
//! ## Modules
//!
//! - [`watch`] - Watchers, object caches and the reconcile scheduler
//! - [`input`] - Reconciliation adapter and the `kubernetes` input
//! - [`output`] - Object and status writers
//! - [`processor`] - Ad-hoc object processor
//! - [`client`] - Kubernetes API client abstraction
//! - [`transaction`] - Messages paired with single-use outcome channels
//! - [`registry`] - Plugin constructors and configuration schemas
//! - [`pipeline`] - Stream runner wiring an input, processors and an output
//!
//! ## Example
//!
//! ```rust,no_run
//! use kubepipe::pipeline::{Stream, StreamConfig};
//! use kubepipe::registry::Registry;
//! use std::path::Path;
//! use std::time::Duration;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = StreamConfig::from_file(Path::new("stream.yaml"))?;
//! let stream = Stream::build(&config, &Registry::with_builtin())?;
//! stream.start()?;
//!
//! tokio::signal::ctrl_c().await?;
//! stream.close(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod constants;
pub mod duration;
pub mod errors;
pub mod input;
pub mod lifecycle;
pub mod message;
pub mod metrics;
pub mod output;
pub mod pipeline;
pub mod plugin;
pub mod processor;
pub mod registry;
pub mod retry;
pub mod selector;
pub mod transaction;
pub mod watch;

#[cfg(test)]
mod testing;
