// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Lifecycle state shared by a plugin and the tasks it spawns.
//!
//! A plugin moves through `Idle → Running → Closing → Closed`. The transition to
//! `Closing` is the close signal: every [`CloseSignal`] handed out by the plugin wakes
//! up, which cancels channel sends and outcome waits in flight. Closing is idempotent;
//! any number of concurrent `close` calls collapse into one transition.

use crate::errors::CloseError;
use std::sync::{Mutex, Once, PoisonError};
use std::time::Duration;
use tokio::sync::watch;

/// Lifecycle state of a plugin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Constructed, not started
    Idle,
    /// Run loop active
    Running,
    /// Close requested, run loop winding down
    Closing,
    /// Run loop exited and channels closed
    Closed,
}

/// Owner side of a plugin's lifecycle.
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<State>,
    close_once: Once,
    /// Why the run loop stopped, when it stopped on an error
    failure: Mutex<Option<String>>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(State::Idle);
        Self {
            state,
            close_once: Once::new(),
            failure: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Move from `Idle` to `Running`. Returns `false` if the plugin was already started
    /// or is closing.
    pub fn start(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == State::Idle {
                *state = State::Running;
                true
            } else {
                false
            }
        })
    }

    /// Request close. Only the first call has an effect.
    ///
    /// A plugin that was never started has nothing to wind down and goes straight to
    /// `Closed`.
    pub fn close(&self) {
        self.close_once.call_once(|| {
            self.state.send_if_modified(|state| match *state {
                State::Idle => {
                    *state = State::Closed;
                    true
                }
                State::Running => {
                    *state = State::Closing;
                    true
                }
                State::Closing | State::Closed => false,
            });
        });
    }

    /// Record that the run loop has exited.
    pub fn mark_closed(&self) {
        self.state.send_replace(State::Closed);
    }

    /// Record that the run loop has exited because of `error`.
    pub fn mark_failed(&self, error: impl ToString) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(error.to_string());
        self.mark_closed();
    }

    /// A receiver that resolves once close has been requested.
    #[must_use]
    pub fn signal(&self) -> CloseSignal {
        CloseSignal {
            state: self.state.subscribe(),
        }
    }

    /// Wait until the plugin reaches `Closed`.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError::Timeout`] if the run loop does not exit within `timeout`.
    pub async fn wait_for_close(&self, timeout: Duration) -> Result<(), CloseError> {
        let mut state = self.state.subscribe();
        let result =
            match tokio::time::timeout(timeout, state.wait_for(|s| *s == State::Closed)).await {
                Ok(_) => Ok(()),
                Err(_) => Err(CloseError::Timeout(timeout)),
            };
        result
    }

    /// Wait, without a deadline, until the plugin reaches `Closed` for any reason.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError::Failed`] if the run loop exited because of an error.
    pub async fn wait_stopped(&self) -> Result<(), CloseError> {
        let mut state = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close while waiting
        let _ = state.wait_for(|s| *s == State::Closed).await;
        match self
            .failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        {
            Some(reason) => Err(CloseError::Failed(reason)),
            None => Ok(()),
        }
    }
}

/// Receiver side of the close signal.
#[derive(Clone, Debug)]
pub struct CloseSignal {
    state: watch::Receiver<State>,
}

impl CloseSignal {
    /// Resolves once close has been requested (or the owner is gone).
    pub async fn closing(&mut self) {
        // A dropped owner means nobody will ever run the plugin again
        let _ = self.state.wait_for(|s| *s >= State::Closing).await;
    }

    #[must_use]
    pub fn is_closing(&self) -> bool {
        *self.state.borrow() >= State::Closing
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod lifecycle_tests;
