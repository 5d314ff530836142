// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Label selector matching utilities for watched objects.
//!
//! Selectors are immutable once the input is constructed, so matching is a pure
//! function of the selector and an object's labels. The same selector is also
//! rendered to the Kubernetes label-selector string syntax so the API server can
//! filter watch streams before events reach the process.
//!
//! # Example
//!
//! ```rust
//! use kubepipe::config::LabelSelector;
//! use kubepipe::selector::{matches_selector, to_selector_string};
//! use std::collections::BTreeMap;
//!
//! let selector = LabelSelector {
//!     match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
//!     match_expressions: None,
//! };
//!
//! let labels = BTreeMap::from([("app".to_string(), "web".to_string())]);
//! assert!(matches_selector(&selector, &labels));
//! assert_eq!(to_selector_string(&selector), "app=web");
//! ```

use crate::config::{LabelSelector, LabelSelectorRequirement};
use crate::errors::ConfigError;
use std::collections::BTreeMap;

/// Selector operator "In"
pub const OPERATOR_IN: &str = "In";

/// Selector operator "`NotIn`"
pub const OPERATOR_NOT_IN: &str = "NotIn";

/// Selector operator "Exists"
pub const OPERATOR_EXISTS: &str = "Exists";

/// Selector operator "`DoesNotExist`"
pub const OPERATOR_DOES_NOT_EXIST: &str = "DoesNotExist";

/// Check that every requirement of a selector is well formed.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidSelectorOperator`] for an unknown operator, and
/// [`ConfigError::InvalidSelectorValues`] when the values do not fit the operator
/// (In/NotIn need at least one value, Exists/DoesNotExist take none).
pub fn validate_selector(selector: &LabelSelector) -> Result<(), ConfigError> {
    for requirement in selector.match_expressions.iter().flatten() {
        let values_len = requirement.values.as_ref().map_or(0, Vec::len);
        match requirement.operator.as_str() {
            OPERATOR_IN | OPERATOR_NOT_IN => {
                if values_len == 0 {
                    return Err(ConfigError::InvalidSelectorValues {
                        key: requirement.key.clone(),
                        reason: format!(
                            "operator {} requires at least one value",
                            requirement.operator
                        ),
                    });
                }
            }
            OPERATOR_EXISTS | OPERATOR_DOES_NOT_EXIST => {
                if values_len != 0 {
                    return Err(ConfigError::InvalidSelectorValues {
                        key: requirement.key.clone(),
                        reason: format!("operator {} takes no values", requirement.operator),
                    });
                }
            }
            other => {
                return Err(ConfigError::InvalidSelectorOperator {
                    key: requirement.key.clone(),
                    operator: other.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Check whether a set of labels satisfies a selector.
///
/// `matchLabels` and `matchExpressions` are `ANDed`; an empty selector matches everything.
/// Requirements with an unknown operator never match (they are rejected by
/// [`validate_selector`] at construction time).
#[must_use]
pub fn matches_selector(selector: &LabelSelector, labels: &BTreeMap<String, String>) -> bool {
    let labels_match = selector.match_labels.as_ref().is_none_or(|match_labels| {
        match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    });

    labels_match
        && selector
            .match_expressions
            .iter()
            .flatten()
            .all(|requirement| matches_requirement(requirement, labels))
}

fn matches_requirement(
    requirement: &LabelSelectorRequirement,
    labels: &BTreeMap<String, String>,
) -> bool {
    let values = requirement.values.as_deref().unwrap_or_default();
    let label = labels.get(&requirement.key);

    match requirement.operator.as_str() {
        OPERATOR_IN => label.is_some_and(|value| values.contains(value)),
        OPERATOR_NOT_IN => label.is_none_or(|value| !values.contains(value)),
        OPERATOR_EXISTS => label.is_some(),
        OPERATOR_DOES_NOT_EXIST => label.is_none(),
        _ => false,
    }
}

/// Render a selector in the Kubernetes label-selector string syntax.
///
/// Returns an empty string for an empty selector.
#[must_use]
pub fn to_selector_string(selector: &LabelSelector) -> String {
    let mut terms: Vec<String> = selector
        .match_labels
        .iter()
        .flatten()
        .map(|(key, value)| format!("{key}={value}"))
        .collect();

    for requirement in selector.match_expressions.iter().flatten() {
        let values = requirement
            .values
            .as_deref()
            .unwrap_or_default()
            .join(",");
        let term = match requirement.operator.as_str() {
            OPERATOR_IN => format!("{} in ({values})", requirement.key),
            OPERATOR_NOT_IN => format!("{} notin ({values})", requirement.key),
            OPERATOR_EXISTS => requirement.key.clone(),
            OPERATOR_DOES_NOT_EXIST => format!("!{}", requirement.key),
            _ => continue,
        };
        terms.push(term);
    }

    terms.join(",")
}

/// Check whether an event for an object in `namespace` with `labels` passes a watch's filters.
///
/// The namespace allow-list and the selector are conjunctive. An empty allow-list admits
/// every namespace, including cluster-scoped objects.
#[must_use]
pub fn admits(
    namespaces: &[String],
    selector: Option<&LabelSelector>,
    namespace: Option<&str>,
    labels: &BTreeMap<String, String>,
) -> bool {
    let namespace_ok = namespaces.is_empty()
        || namespace.is_some_and(|ns| namespaces.iter().any(|allowed| allowed == ns));

    namespace_ok && selector.is_none_or(|selector| matches_selector(selector, labels))
}

#[cfg(test)]
#[path = "selector_tests.rs"]
mod selector_tests;
