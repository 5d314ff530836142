// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Configuration types for the Kubernetes plugins.
//!
//! Every plugin is configured from a YAML mapping. The types in this module derive
//! `serde` for deserialization and `schemars` for the configuration schema the
//! registry publishes for each plugin.
//!
//! # Example
//!
//! ```rust
//! use kubepipe::config::InputConfig;
//!
//! let yaml = r#"
//! watches:
//!   - group: apps
//!     version: v1
//!     kind: Deployment
//!     namespaces: [default]
//!     selector:
//!       matchLabels:
//!         app: web
//! "#;
//!
//! let config: InputConfig = serde_yaml::from_str(yaml).unwrap();
//! assert_eq!(config.watches[0].kind, "Deployment");
//! config.validate().unwrap();
//! ```

use crate::constants::{DEFAULT_MAX_CONCURRENT_RECONCILES, DEFAULT_MAX_IN_FLIGHT};
use crate::errors::ConfigError;
use kube::core::GroupVersionKind;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label selector to match Kubernetes resources.
///
/// A label selector is a label query over a set of resources. The result of matchLabels and
/// matchExpressions are `ANDed`. An empty label selector matches all objects.
#[derive(Clone, Debug, Serialize, Deserialize, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LabelSelector {
    /// Map of {key,value} pairs. A single {key,value} in the matchLabels map is equivalent
    /// to an element of matchExpressions, whose key field is "key", the operator is "In",
    /// and the values array contains only "value". All requirements must be satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,

    /// List of label selector requirements. All requirements must be satisfied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_expressions: Option<Vec<LabelSelectorRequirement>>,
}

/// A label selector requirement is a selector that contains values, a key, and an operator
/// that relates the key and values.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LabelSelectorRequirement {
    /// The label key that the selector applies to.
    pub key: String,

    /// Operator represents a key's relationship to a set of values.
    /// Valid operators are In, `NotIn`, Exists and `DoesNotExist`.
    pub operator: String,

    /// An array of string values. If the operator is In or `NotIn`,
    /// the values array must be non-empty. If the operator is Exists or `DoesNotExist`,
    /// the values array must be empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

/// One watched resource kind.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct WatchSpec {
    /// API group of the resource; empty for the core group.
    #[serde(default)]
    pub group: String,

    /// API version of the resource (e.g. `v1`).
    pub version: String,

    /// Kind of the resource (e.g. `ConfigMap`).
    pub kind: String,

    /// Namespaces to watch. Empty means all namespaces.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    /// Only objects matching this selector are reconciled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

impl WatchSpec {
    /// The group/version/kind triple identifying the watched resource type.
    #[must_use]
    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.group, &self.version, &self.kind)
    }
}

/// Configuration of the `kubernetes` input.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    /// Resource kinds to watch.
    pub watches: Vec<WatchSpec>,

    /// Maximum number of objects reconciled at the same time.
    #[serde(default = "default_max_concurrent_reconciles")]
    pub max_concurrent_reconciles: usize,
}

impl InputConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a watch entry is missing its version or kind, if a
    /// selector is malformed, or if `max_concurrent_reconciles` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_reconciles == 0 {
            return Err(ConfigError::InvalidConcurrency(0));
        }

        for (index, watch) in self.watches.iter().enumerate() {
            if watch.version.trim().is_empty() {
                return Err(ConfigError::MissingWatchField {
                    index,
                    field: "version",
                });
            }
            if watch.kind.trim().is_empty() {
                return Err(ConfigError::MissingWatchField {
                    index,
                    field: "kind",
                });
            }
            if let Some(selector) = &watch.selector {
                crate::selector::validate_selector(selector)?;
            }
        }

        Ok(())
    }
}

/// Configuration of the `kubernetes` and `kubernetes_status` outputs.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Maximum number of messages written concurrently.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }
}

impl OutputConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidMaxInFlight`] if `max_in_flight` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidMaxInFlight(self.max_in_flight));
        }
        Ok(())
    }
}

/// Configuration of the `kubernetes` processor.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProcessorConfig {
    /// Operation to perform: one of `get`, `create`, `update`, `delete`.
    pub operator: String,

    /// Indexes of the message parts to process. Negative indexes count from the end
    /// (`-1` is the last part). Empty means every part.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<isize>,
}

fn default_max_in_flight() -> usize {
    DEFAULT_MAX_IN_FLIGHT
}

fn default_max_concurrent_reconciles() -> usize {
    DEFAULT_MAX_CONCURRENT_RECONCILES
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
