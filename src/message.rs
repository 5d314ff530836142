// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Messages exchanged with the pipeline.
//!
//! A [`Message`] is an ordered batch of [`Part`]s. Each part carries a byte payload,
//! a string-keyed metadata map, and an optional error flag that processors set when
//! they fail on that part without aborting the rest of the message.

use std::collections::BTreeMap;

/// Metadata attached to a message part.
pub type Metadata = BTreeMap<String, String>;

/// One element of a message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Part {
    payload: Vec<u8>,
    metadata: Metadata,
    error: Option<String>,
}

impl Part {
    /// Create a part with the given payload and no metadata.
    #[must_use]
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Metadata::new(),
            error: None,
        }
    }

    /// Builder-style metadata setter.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Replace the payload.
    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// Metadata value for `key`, if set.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Metadata value for `key`, treating an empty value as unset.
    #[must_use]
    pub fn non_empty_metadata(&self, key: &str) -> Option<&str> {
        self.metadata_value(key).filter(|value| !value.is_empty())
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn remove_metadata(&mut self, key: &str) -> Option<String> {
        self.metadata.remove(key)
    }

    #[must_use]
    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Mark the part as failed. Downstream stages can route on [`Part::error`].
    pub fn flag_error(&mut self, error: impl ToString) {
        self.error = Some(error.to_string());
    }

    /// The error this part was flagged with, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }
}

/// An ordered batch of parts travelling through the pipeline as one unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    parts: Vec<Part>,
}

impl Message {
    #[must_use]
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    /// A message containing a single part.
    #[must_use]
    pub fn single(part: Part) -> Self {
        Self { parts: vec![part] }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Part> {
        self.parts.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Part> {
        self.parts.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Part> {
        self.parts.iter_mut()
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    #[must_use]
    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Resolve a possibly negative part index (`-1` is the last part).
    ///
    /// Returns `None` when the index falls outside the message.
    #[must_use]
    pub fn resolve_index(&self, index: isize) -> Option<usize> {
        let len = self.parts.len();
        let resolved = if index < 0 {
            len.checked_sub(index.unsigned_abs())?
        } else {
            index.unsigned_abs()
        };
        (resolved < len).then_some(resolved)
    }

    /// Metadata of the first part, or empty metadata for an empty message.
    #[must_use]
    pub fn first_metadata(&self) -> Metadata {
        self.parts
            .first()
            .map(|part| part.metadata.clone())
            .unwrap_or_default()
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Part;
    type IntoIter = std::slice::Iter<'a, Part>;

    fn into_iter(self) -> Self::IntoIter {
        self.parts.iter()
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod message_tests;
