// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Plugin registry: named constructors for inputs, processors and outputs.
//!
//! Each plugin is registered under a name together with the configuration type it
//! is built from. The registry deserializes the raw YAML configuration into that
//! type (a missing configuration is treated as an empty mapping) and publishes the
//! JSON schema of every configuration type.
//!
//! # Example
//!
//! ```rust
//! use kubepipe::registry::{PluginKind, Registry};
//!
//! let registry = Registry::with_builtin();
//! assert!(registry.contains(PluginKind::Output, "kubernetes_status"));
//! ```

use crate::config::{InputConfig, OutputConfig, ProcessorConfig};
use crate::constants::{PLUGIN_KUBERNETES, PLUGIN_KUBERNETES_STATUS};
use crate::errors::ConfigError;
use crate::input::KubernetesInput;
use crate::output::{KubernetesWriter, WriteMode};
use crate::plugin::{Input, Output, Processor};
use crate::processor::KubernetesProcessor;
use schemars::{JsonSchema, Schema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// The three kinds of plugin a stream is assembled from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PluginKind {
    Input,
    Processor,
    Output,
}

impl PluginKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Processor => "processor",
            Self::Output => "output",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Constructor<T> =
    Arc<dyn Fn(serde_yaml::Value) -> Result<Arc<T>, ConfigError> + Send + Sync>;

struct Entry<T: ?Sized> {
    build: Constructor<T>,
    schema: Schema,
}

/// Configuration schemas of every registered plugin, grouped by kind.
#[derive(Debug, Default, Serialize)]
pub struct PluginSchemas {
    pub inputs: BTreeMap<String, Schema>,
    pub processors: BTreeMap<String, Schema>,
    pub outputs: BTreeMap<String, Schema>,
}

/// Named plugin constructors.
#[derive(Default)]
pub struct Registry {
    inputs: BTreeMap<String, Entry<dyn Input>>,
    processors: BTreeMap<String, Entry<dyn Processor>>,
    outputs: BTreeMap<String, Entry<dyn Output>>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the Kubernetes plugins: the `kubernetes` input, processor
    /// and output, and the `kubernetes_status` output.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register_input(PLUGIN_KUBERNETES, |config: InputConfig| {
            KubernetesInput::new(config)
        });
        registry.register_processor(PLUGIN_KUBERNETES, |config: ProcessorConfig| {
            KubernetesProcessor::new(&config)
        });
        registry.register_output(PLUGIN_KUBERNETES, |config: OutputConfig| {
            KubernetesWriter::new(WriteMode::Object, &config)
        });
        registry.register_output(PLUGIN_KUBERNETES_STATUS, |config: OutputConfig| {
            KubernetesWriter::new(WriteMode::Status, &config)
        });
        registry
    }

    /// Register an input built from configuration type `C`.
    pub fn register_input<C, I, F>(&mut self, name: &str, build: F)
    where
        C: DeserializeOwned + JsonSchema + 'static,
        I: Input + 'static,
        F: Fn(C) -> Result<I, ConfigError> + Send + Sync + 'static,
    {
        let build = constructor(PluginKind::Input, name, move |config: C| {
            build(config).map(|input| Arc::new(input) as Arc<dyn Input>)
        });
        self.inputs.insert(
            name.to_string(),
            Entry {
                build,
                schema: schemars::schema_for!(C),
            },
        );
    }

    /// Register a processor built from configuration type `C`.
    pub fn register_processor<C, P, F>(&mut self, name: &str, build: F)
    where
        C: DeserializeOwned + JsonSchema + 'static,
        P: Processor + 'static,
        F: Fn(C) -> Result<P, ConfigError> + Send + Sync + 'static,
    {
        let build = constructor(PluginKind::Processor, name, move |config: C| {
            build(config).map(|processor| Arc::new(processor) as Arc<dyn Processor>)
        });
        self.processors.insert(
            name.to_string(),
            Entry {
                build,
                schema: schemars::schema_for!(C),
            },
        );
    }

    /// Register an output built from configuration type `C`.
    pub fn register_output<C, O, F>(&mut self, name: &str, build: F)
    where
        C: DeserializeOwned + JsonSchema + 'static,
        O: Output + 'static,
        F: Fn(C) -> Result<O, ConfigError> + Send + Sync + 'static,
    {
        let build = constructor(PluginKind::Output, name, move |config: C| {
            build(config).map(|output| Arc::new(output) as Arc<dyn Output>)
        });
        self.outputs.insert(
            name.to_string(),
            Entry {
                build,
                schema: schemars::schema_for!(C),
            },
        );
    }

    #[must_use]
    pub fn contains(&self, kind: PluginKind, name: &str) -> bool {
        match kind {
            PluginKind::Input => self.inputs.contains_key(name),
            PluginKind::Processor => self.processors.contains_key(name),
            PluginKind::Output => self.outputs.contains_key(name),
        }
    }

    /// Build the input registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPlugin`] if nothing is registered under `name`,
    /// or the constructor's error if `config` is invalid.
    pub fn build_input(
        &self,
        name: &str,
        config: serde_yaml::Value,
    ) -> Result<Arc<dyn Input>, ConfigError> {
        build(&self.inputs, PluginKind::Input, name, config)
    }

    /// Build the processor registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPlugin`] if nothing is registered under `name`,
    /// or the constructor's error if `config` is invalid.
    pub fn build_processor(
        &self,
        name: &str,
        config: serde_yaml::Value,
    ) -> Result<Arc<dyn Processor>, ConfigError> {
        build(&self.processors, PluginKind::Processor, name, config)
    }

    /// Build the output registered as `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownPlugin`] if nothing is registered under `name`,
    /// or the constructor's error if `config` is invalid.
    pub fn build_output(
        &self,
        name: &str,
        config: serde_yaml::Value,
    ) -> Result<Arc<dyn Output>, ConfigError> {
        build(&self.outputs, PluginKind::Output, name, config)
    }

    /// Configuration schemas of every registered plugin.
    #[must_use]
    pub fn schemas(&self) -> PluginSchemas {
        fn collect<T: ?Sized>(entries: &BTreeMap<String, Entry<T>>) -> BTreeMap<String, Schema> {
            entries
                .iter()
                .map(|(name, entry)| (name.clone(), entry.schema.clone()))
                .collect()
        }

        PluginSchemas {
            inputs: collect(&self.inputs),
            processors: collect(&self.processors),
            outputs: collect(&self.outputs),
        }
    }
}

/// Wrap a typed constructor into one taking raw YAML.
fn constructor<C, T, F>(kind: PluginKind, name: &str, build: F) -> Constructor<T>
where
    C: DeserializeOwned + 'static,
    T: ?Sized + 'static,
    F: Fn(C) -> Result<Arc<T>, ConfigError> + Send + Sync + 'static,
{
    let name = name.to_string();
    Arc::new(move |raw: serde_yaml::Value| build(decode_config(kind, &name, raw)?))
}

fn decode_config<C: DeserializeOwned>(
    kind: PluginKind,
    name: &str,
    raw: serde_yaml::Value,
) -> Result<C, ConfigError> {
    let raw = if raw.is_null() {
        serde_yaml::Value::Mapping(serde_yaml::Mapping::new())
    } else {
        raw
    };
    serde_yaml::from_value(raw).map_err(|e| ConfigError::InvalidPluginConfig {
        kind: kind.as_str(),
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn build<T: ?Sized>(
    entries: &BTreeMap<String, Entry<T>>,
    kind: PluginKind,
    name: &str,
    config: serde_yaml::Value,
) -> Result<Arc<T>, ConfigError> {
    let entry = entries.get(name).ok_or_else(|| ConfigError::UnknownPlugin {
        kind: kind.as_str(),
        name: name.to_string(),
    })?;
    debug!(kind = %kind, name, "Building plugin");
    (entry.build)(config)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod registry_tests;
