// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `kubernetes` and `kubernetes_status` outputs: commit messages to the cluster.
//!
//! Each message part holds one object. In [`WriteMode::Object`] a part is applied as:
//!
//! - **delete** when the part carries the `deleted` marker (an object that is already
//!   gone counts as deleted)
//! - **update** (full replace) when the decoded object has a `metadata.uid`
//! - **create** otherwise
//!
//! In [`WriteMode::Status`] every part is written to the status subresource,
//! whatever its marker or UID.
//!
//! Parts are written in order and the first failure aborts the rest of the message;
//! the message's transaction is then answered with that failure. Up to
//! `max_in_flight` messages are written concurrently, so with more than one in flight
//! transactions may be answered out of order.

use crate::client::{decode_object, has_identity, KubeObjectClient, ObjectClient, ObjectIdentity};
use crate::config::OutputConfig;
use crate::constants::META_DELETED;
use crate::errors::{CloseError, ConfigError, PipelineError};
use crate::lifecycle::{Lifecycle, State};
use crate::message::{Message, Part};
use crate::metrics;
use crate::plugin::Output;
use crate::transaction::TransactionReceiver;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

/// Which API the writer targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Create, update or delete the whole object
    Object,
    /// Update the status subresource only
    Status,
}

/// Writer plugin behind both the `kubernetes` and `kubernetes_status` outputs.
pub struct KubernetesWriter {
    mode: WriteMode,
    max_in_flight: usize,
    client: Arc<dyn ObjectClient>,
    lifecycle: Arc<Lifecycle>,
}

impl KubernetesWriter {
    /// Create a writer that connects to the cluster on its first write.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(mode: WriteMode, config: &OutputConfig) -> Result<Self, ConfigError> {
        Self::with_client(mode, config, Arc::new(KubeObjectClient::new()))
    }

    /// Create a writer using the given client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn with_client(
        mode: WriteMode,
        config: &OutputConfig,
        client: Arc<dyn ObjectClient>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            mode,
            max_in_flight: config.max_in_flight,
            client,
            lifecycle: Arc::new(Lifecycle::new()),
        })
    }

    #[must_use]
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Write every part of `message`, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the failure of the first part that could not be written.
    pub async fn write(&self, message: &Message) -> Result<(), PipelineError> {
        write_message(self.client.as_ref(), self.mode, message).await
    }
}

async fn write_message(
    client: &dyn ObjectClient,
    mode: WriteMode,
    message: &Message,
) -> Result<(), PipelineError> {
    for (index, part) in message.iter().enumerate() {
        if let Err(e) = write_part(client, mode, part).await {
            error!(part = index, error = %e, "Failed to write message part, aborting message");
            return Err(e);
        }
    }
    Ok(())
}

async fn write_part(
    client: &dyn ObjectClient,
    mode: WriteMode,
    part: &Part,
) -> Result<(), PipelineError> {
    let object = decode_object(part.payload())?;
    // The branch depends only on the marker and the UID; an incomplete identity is
    // left for the API call to reject.
    let identity = ObjectIdentity::from_part(part, &object);

    let (operation, result) = match mode {
        WriteMode::Status => (
            "update_status",
            client.update_status(&identity, &object).await.map(drop),
        ),
        WriteMode::Object if part.non_empty_metadata(META_DELETED).is_some() => {
            let result = match client.delete(&identity).await {
                Err(e) if e.is_not_found() => {
                    debug!(object = %identity, "Object already gone");
                    Ok(())
                }
                other => other,
            };
            ("delete", result)
        }
        WriteMode::Object if has_identity(&object) => {
            ("update", client.update(&identity, &object).await.map(drop))
        }
        WriteMode::Object => ("create", client.create(&identity, &object).await.map(drop)),
    };

    metrics::record_write(operation, result.is_ok());
    match result {
        Ok(()) => {
            debug!(object = %identity, operation, "Wrote object");
            Ok(())
        }
        Err(source) => Err(PipelineError::Client {
            operation,
            identity,
            source,
        }),
    }
}

#[async_trait]
impl Output for KubernetesWriter {
    fn consume(&self, mut transactions: TransactionReceiver) -> bool {
        if !self.lifecycle.start() {
            return false;
        }

        let mode = self.mode;
        let max_in_flight = self.max_in_flight;
        let client = self.client.clone();
        let lifecycle = self.lifecycle.clone();

        tokio::spawn(async move {
            info!(mode = ?mode, max_in_flight, "Starting kubernetes writer");
            let mut close = lifecycle.signal();
            let mut writes = JoinSet::new();

            loop {
                tokio::select! {
                    biased;
                    () = close.closing() => break,
                    Some(joined) = writes.join_next(), if !writes.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "Write task failed");
                        }
                    }
                    received = transactions.recv(), if writes.len() < max_in_flight => {
                        let Some(transaction) = received else {
                            debug!("Transaction channel ended");
                            break;
                        };
                        let client = client.clone();
                        writes.spawn(async move {
                            let (message, responder) = transaction.into_parts();
                            let result = write_message(client.as_ref(), mode, &message).await;
                            responder.respond(&message, result);
                        });
                    }
                }
            }

            while writes.join_next().await.is_some() {}
            lifecycle.mark_closed();
            info!(mode = ?mode, "Kubernetes writer closed");
        });
        true
    }

    fn close_async(&self) {
        self.lifecycle.close();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), CloseError> {
        self.lifecycle.wait_for_close(timeout).await
    }
}

#[cfg(test)]
#[path = "output_tests.rs"]
mod output_tests;
