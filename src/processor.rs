// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `kubernetes` processor: one cluster API call per message part, in-line.
//!
//! For every targeted part the processor decodes the object, performs the configured
//! operation and, for `get`, `create` and `update`, replaces the part's payload with
//! the object returned by the API server. A part whose operation fails is flagged
//! with the error and left otherwise untouched; the remaining parts are still
//! processed and the message always continues down the pipeline.

use crate::client::{decode_object, encode_object, KubeObjectClient, ObjectClient, ObjectIdentity};
use crate::config::ProcessorConfig;
use crate::errors::{ConfigError, PipelineError};
use crate::message::{Message, Part};
use crate::metrics;
use crate::plugin::Processor;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info_span, warn, Instrument};

/// Operation performed by the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operator {
    Get,
    Create,
    Update,
    Delete,
}

impl Operator {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "get" => Ok(Self::Get),
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(ConfigError::UnknownOperator(other.to_string())),
        }
    }
}

/// The `kubernetes` processor plugin.
pub struct KubernetesProcessor {
    operator: Operator,
    parts: Vec<isize>,
    client: Arc<dyn ObjectClient>,
}

impl KubernetesProcessor {
    /// Create a processor that connects to the cluster on its first operation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownOperator`] if the operator is not one of
    /// `get`, `create`, `update`, `delete`.
    pub fn new(config: &ProcessorConfig) -> Result<Self, ConfigError> {
        Self::with_client(config, Arc::new(KubeObjectClient::new()))
    }

    /// Create a processor using the given client.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownOperator`] if the operator is unknown.
    pub fn with_client(
        config: &ProcessorConfig,
        client: Arc<dyn ObjectClient>,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            operator: config.operator.parse()?,
            parts: config.parts.clone(),
            client,
        })
    }

    #[must_use]
    pub fn operator(&self) -> Operator {
        self.operator
    }

    /// Indexes of the parts of `message` to process, in configuration order.
    fn targets(&self, message: &Message) -> Vec<usize> {
        if self.parts.is_empty() {
            return (0..message.len()).collect();
        }
        let mut targets = Vec::with_capacity(self.parts.len());
        for index in self.parts.iter().filter_map(|&i| message.resolve_index(i)) {
            if !targets.contains(&index) {
                targets.push(index);
            }
        }
        targets
    }

    async fn process_part(&self, part: &mut Part) -> Result<(), PipelineError> {
        let object = decode_object(part.payload())?;
        let identity = ObjectIdentity::resolve(part, &object)?;

        let result = match self.operator {
            Operator::Get => self.client.get(&identity).await.map(Some),
            Operator::Create => self.client.create(&identity, &object).await.map(Some),
            Operator::Update => self.client.update(&identity, &object).await.map(Some),
            Operator::Delete => self.client.delete(&identity).await.map(|()| None),
        };

        let returned = result.map_err(|source| PipelineError::Client {
            operation: self.operator.as_str(),
            identity: identity.clone(),
            source,
        })?;

        if let Some(object) = returned {
            part.set_payload(encode_object(&object)?);
        }
        debug!(object = %identity, "Processed part");
        Ok(())
    }
}

#[async_trait]
impl Processor for KubernetesProcessor {
    async fn process(&self, mut message: Message) -> Result<Vec<Message>, PipelineError> {
        for index in self.targets(&message) {
            let Some(part) = message.get_mut(index) else {
                continue;
            };

            let span = info_span!("kubernetes_processor", part = index, operator = %self.operator);
            let result = self.process_part(part).instrument(span).await;
            metrics::record_processor_operation(self.operator.as_str(), result.is_ok());

            if let Err(e) = result {
                warn!(part = index, operator = %self.operator, error = %e, "Processor operation failed");
                part.flag_error(e);
            }
        }
        Ok(vec![message])
    }
}

#[cfg(test)]
#[path = "processor_tests.rs"]
mod processor_tests;
