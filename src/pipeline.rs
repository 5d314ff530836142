// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! A minimal stream runner: one input, an ordered list of processors, one output.
//!
//! Transactions flow from the input through every processor to the output. The
//! responder travels with the message, so the outcome reported by the output (or by
//! the processing stage itself) still reaches the producer of the transaction:
//!
//! - a processor error fails the transaction
//! - a message filtered out by a processor (zero messages returned) is acknowledged
//! - messages split by a processor are joined back into one message, in order
//!
//! # Example
//!
//! ```rust
//! use kubepipe::pipeline::StreamConfig;
//!
//! let config = StreamConfig::from_yaml_str(r#"
//! input:
//!   type: kubernetes
//!   config:
//!     watches:
//!       - version: v1
//!         kind: ConfigMap
//! pipeline:
//!   processors:
//!     - type: kubernetes
//!       config:
//!         operator: get
//! output:
//!   type: kubernetes_status
//! "#).unwrap();
//!
//! assert_eq!(config.pipeline.processors.len(), 1);
//! assert_eq!(config.output.name, "kubernetes_status");
//! ```

use crate::constants::STAGE_CHANNEL_CAPACITY;
use crate::errors::{ConfigError, PipelineError};
use crate::message::Message;
use crate::plugin::{Input, Output, Processor};
use crate::registry::Registry;
use crate::transaction::{self, Transaction, TransactionReceiver, TransactionSender};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A plugin reference in a stream configuration file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PluginSpec {
    /// Registered plugin name
    #[serde(rename = "type")]
    pub name: String,

    /// Plugin configuration, handed to the plugin's constructor
    #[serde(default = "empty_config")]
    pub config: serde_yaml::Value,
}

/// The processing section of a stream configuration file.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    #[serde(default)]
    pub processors: Vec<PluginSpec>,
}

/// A stream configuration file.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct StreamConfig {
    pub input: PluginSpec,

    #[serde(default)]
    pub pipeline: PipelineSection,

    pub output: PluginSpec,
}

fn empty_config() -> serde_yaml::Value {
    serde_yaml::Value::Null
}

impl StreamConfig {
    /// Load a stream configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid stream
    /// configuration.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read stream config {}", path.display()))?;
        Self::from_yaml_str(&text)
            .with_context(|| format!("Invalid stream config {}", path.display()))
    }

    /// Parse a stream configuration from YAML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid stream configuration.
    pub fn from_yaml_str(text: &str) -> Result<Self> {
        serde_yaml::from_str(text).context("Failed to parse stream config")
    }
}

/// An assembled stream.
pub struct Stream {
    input: Arc<dyn Input>,
    processors: Vec<Arc<dyn Processor>>,
    output: Arc<dyn Output>,
}

impl Stream {
    #[must_use]
    pub fn new(
        input: Arc<dyn Input>,
        processors: Vec<Arc<dyn Processor>>,
        output: Arc<dyn Output>,
    ) -> Self {
        Self {
            input,
            processors,
            output,
        }
    }

    /// Build every plugin named in `config` from `registry`.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] raised while building a plugin.
    pub fn build(config: &StreamConfig, registry: &Registry) -> Result<Self, ConfigError> {
        let input = registry.build_input(&config.input.name, config.input.config.clone())?;
        let processors = config
            .pipeline
            .processors
            .iter()
            .map(|spec| registry.build_processor(&spec.name, spec.config.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let output = registry.build_output(&config.output.name, config.output.config.clone())?;
        Ok(Self::new(input, processors, output))
    }

    /// Wire the plugins together and start the input.
    ///
    /// The output is consuming before the input produces its first transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream was already started or one of its plugins was
    /// closed.
    pub fn start(&self) -> Result<()> {
        let upstream = self
            .input
            .take_transactions()
            .context("Input transactions were already taken")?;

        let downstream = if self.processors.is_empty() {
            upstream
        } else {
            let (tx, rx) = transaction::channel(STAGE_CHANNEL_CAPACITY);
            tokio::spawn(run_processors(self.processors.clone(), upstream, tx));
            rx
        };

        if !self.output.consume(downstream) {
            bail!("Output is already consuming or closed");
        }
        if !self.input.start() {
            bail!("Input is already started or closed");
        }
        info!(processors = self.processors.len(), "Stream started");
        Ok(())
    }

    /// Resolve once the input has stopped, whether it was closed or stopped on its own.
    ///
    /// An input that stops without being closed (for example because it could not
    /// reach the cluster) leaves the stream with nothing to do.
    ///
    /// # Errors
    ///
    /// Returns an error if the input stopped because of a failure.
    pub async fn wait_input_stopped(&self) -> Result<()> {
        self.input
            .wait_stopped()
            .await
            .context("Input stopped with an error")
    }

    /// Close the stream, input first.
    ///
    /// Once the input has closed its transaction channel ends, which drains the
    /// processing stage and then the output. If the input does not close within
    /// `timeout` the output is closed directly.
    ///
    /// # Errors
    ///
    /// Returns an error if either end did not close within `timeout`.
    pub async fn close(&self, timeout: Duration) -> Result<()> {
        self.input.close_async();
        let input_closed = self.input.wait_for_close(timeout).await;
        if let Err(e) = &input_closed {
            warn!(error = %e, "Input did not close in time, closing output");
            self.output.close_async();
        }

        let output_closed = self.output.wait_for_close(timeout).await;
        if output_closed.is_err() {
            self.output.close_async();
        }

        input_closed.context("Input did not close")?;
        output_closed.context("Output did not close")?;
        info!("Stream closed");
        Ok(())
    }
}

/// Run every transaction from `upstream` through `processors` and forward the
/// result to `downstream`.
async fn run_processors(
    processors: Vec<Arc<dyn Processor>>,
    mut upstream: TransactionReceiver,
    downstream: TransactionSender,
) {
    while let Some(transaction) = upstream.recv().await {
        let (message, responder) = transaction.into_parts();
        match apply(&processors, message.clone()).await {
            Ok(Some(processed)) => {
                if downstream
                    .send(Transaction::from_parts(processed, responder))
                    .await
                    .is_err()
                {
                    debug!("Output stopped consuming, ending processing stage");
                    break;
                }
            }
            Ok(None) => {
                debug!("Message filtered out by a processor");
                responder.ack(&message);
            }
            Err(e) => {
                warn!(error = %e, "Processor failed message");
                responder.nack(&message, e);
            }
        }
    }
    debug!("Processing stage ended");
}

/// Apply `processors` in order. `None` means every message was filtered out.
async fn apply(
    processors: &[Arc<dyn Processor>],
    message: Message,
) -> Result<Option<Message>, PipelineError> {
    let mut batch = vec![message];
    for processor in processors {
        let mut next = Vec::with_capacity(batch.len());
        for message in batch {
            next.extend(processor.process(message).await?);
        }
        if next.is_empty() {
            return Ok(None);
        }
        batch = next;
    }

    if batch.len() == 1 {
        return Ok(batch.pop());
    }
    Ok(Some(Message::new(
        batch.into_iter().flat_map(Message::into_parts).collect(),
    )))
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod pipeline_tests;
