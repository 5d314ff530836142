// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Exponential backoff for failed reconciliations.
//!
//! The watch mechanism requeues an object whose reconciliation failed after a delay
//! that doubles with every consecutive failure, capped at a maximum, with jitter to
//! keep many failing objects from retrying in lockstep. A successful reconciliation
//! forgets the object's backoff state.

use crate::constants::{
    ERROR_BACKOFF_INITIAL_MILLIS, ERROR_BACKOFF_MAX_SECS, ERROR_BACKOFF_MULTIPLIER,
    ERROR_BACKOFF_RANDOMIZATION_FACTOR,
};
use rand::Rng;
use std::time::Duration;

/// Simple exponential backoff implementation.
///
/// Provides exponential backoff with randomization (jitter) to prevent thundering herd.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    /// Current interval duration
    pub current_interval: Duration,
    /// Initial interval duration
    pub initial_interval: Duration,
    /// Maximum interval duration
    pub max_interval: Duration,
    /// Backoff multiplier (typically 2.0 for doubling)
    pub multiplier: f64,
    /// Randomization factor (e.g., 0.1 for ±10%)
    pub randomization_factor: f64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with specified parameters.
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f64,
        randomization_factor: f64,
    ) -> Self {
        Self {
            current_interval: initial_interval,
            initial_interval,
            max_interval,
            multiplier,
            randomization_factor,
        }
    }

    /// Get the next backoff interval.
    pub fn next_backoff(&mut self) -> Duration {
        let interval = self.current_interval;
        let jittered = self.apply_jitter(interval);

        let next = interval.as_secs_f64() * self.multiplier;
        self.current_interval = Duration::from_secs_f64(next).min(self.max_interval);

        jittered
    }

    /// Start over from the initial interval.
    pub fn reset(&mut self) {
        self.current_interval = self.initial_interval;
    }

    /// Apply randomization (jitter) to an interval.
    fn apply_jitter(&self, interval: Duration) -> Duration {
        if self.randomization_factor == 0.0 {
            return interval;
        }

        let secs = interval.as_secs_f64();
        let delta = secs * self.randomization_factor;
        let min = secs - delta;
        let max = secs + delta;

        let jittered = rand::rng().random_range(min..=max);

        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Backoff applied by the watch mechanism to objects whose reconciliation failed.
///
/// # Configuration
///
/// - **Initial interval**: 100ms
/// - **Max interval**: 30 seconds
/// - **Multiplier**: 2.0 (exponential growth)
/// - **Randomization**: ±10% (prevents thundering herd)
///
/// There is no overall deadline: a failing object keeps being retried every 30 seconds
/// until it reconciles or is deleted.
#[must_use]
pub fn error_backoff() -> ExponentialBackoff {
    ExponentialBackoff::new(
        Duration::from_millis(ERROR_BACKOFF_INITIAL_MILLIS),
        Duration::from_secs(ERROR_BACKOFF_MAX_SECS),
        ERROR_BACKOFF_MULTIPLIER,
        ERROR_BACKOFF_RANDOMIZATION_FACTOR,
    )
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod retry_tests;
