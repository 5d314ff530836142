// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! The `kubernetes` input: bridges watch callbacks to pipeline transactions.
//!
//! For every object the watch mechanism asks to reconcile, the input:
//!
//! 1. Looks the object up in the local cache. A missing object is a deletion, not an
//!    error.
//! 2. Builds a single-part message: the object as JSON (or `{}` when deleted) with
//!    `group`, `version`, `kind`, `namespace`, `name` metadata, plus `deleted` when the
//!    object is gone.
//! 3. Sends it as a transaction and waits for the outcome. Both waits end quietly
//!    when the input is closed; the event is picked up again on the next resync.
//! 4. Turns the outcome into an [`Action`]: a failure is returned to the watch
//!    mechanism for backoff, and a `requeue_after` hint on the message schedules
//!    another reconciliation.
//!
//! The input performs no retries of its own.

use crate::config::InputConfig;
use crate::constants::{
    DELETED_PLACEHOLDER, META_DELETED, META_DELETED_VALUE, META_GROUP, META_KIND, META_NAME,
    META_NAMESPACE, META_REQUEUE_AFTER, META_VERSION, TRANSACTION_CHANNEL_CAPACITY,
};
use crate::duration::parse_duration;
use crate::errors::{CloseError, ConfigError, ReconcileError};
use crate::lifecycle::{CloseSignal, Lifecycle, State};
use crate::message::{Message, Metadata, Part};
use crate::metrics;
use crate::plugin::Input;
use crate::transaction::{self, Transaction, TransactionReceiver, TransactionSender};
use crate::watch::{Action, ChangeSource, ReconcileRequest, Reconciler, WatchManager};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Everything the run loop needs that only exists until it is started.
struct Pending {
    source: Box<dyn ChangeSource>,
    transactions: TransactionSender,
}

/// The `kubernetes` input plugin.
pub struct KubernetesInput {
    lifecycle: Arc<Lifecycle>,
    pending: Mutex<Option<Pending>>,
    receiver: Mutex<Option<TransactionReceiver>>,
}

impl KubernetesInput {
    /// Create an input watching the resources listed in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration is invalid.
    pub fn new(config: InputConfig) -> Result<Self, ConfigError> {
        Ok(Self::with_source(Box::new(WatchManager::new(config)?)))
    }

    /// Create an input driven by an arbitrary change source.
    #[must_use]
    pub fn with_source(source: Box<dyn ChangeSource>) -> Self {
        let (transactions, receiver) = transaction::channel(TRANSACTION_CHANNEL_CAPACITY);
        Self {
            lifecycle: Arc::new(Lifecycle::new()),
            pending: Mutex::new(Some(Pending {
                source,
                transactions,
            })),
            receiver: Mutex::new(Some(receiver)),
        }
    }

    #[must_use]
    pub fn state(&self) -> State {
        self.lifecycle.state()
    }
}

#[async_trait]
impl Input for KubernetesInput {
    fn take_transactions(&self) -> Option<TransactionReceiver> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Spawn the watch mechanism's run loop.
    ///
    /// The input reaches `Closed` once the run loop returns; at that point every
    /// sender of the transaction channel has been dropped, so the consumer sees the
    /// channel end.
    fn start(&self) -> bool {
        let Some(Pending {
            source,
            transactions,
        }) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        if !self.lifecycle.start() {
            // Closed before it ever ran
            return false;
        }

        let lifecycle = self.lifecycle.clone();
        tokio::spawn(async move {
            info!("Starting kubernetes input");
            let reconciler = Arc::new(TransactionReconciler::new(transactions, lifecycle.signal()));
            match source.run(reconciler, lifecycle.signal()).await {
                Ok(()) => {
                    lifecycle.mark_closed();
                    info!("Kubernetes input closed");
                }
                Err(e) => {
                    error!(error = %e, "Watch mechanism stopped with an error");
                    lifecycle.mark_failed(e);
                }
            }
        });
        true
    }

    fn close_async(&self) {
        self.lifecycle.close();
        // Never started: dropping the sender ends the transaction channel
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    async fn wait_for_close(&self, timeout: Duration) -> Result<(), CloseError> {
        self.lifecycle.wait_for_close(timeout).await
    }

    async fn wait_stopped(&self) -> Result<(), CloseError> {
        self.lifecycle.wait_stopped().await
    }
}

/// [`Reconciler`] that drives each request through the pipeline as a transaction.
pub struct TransactionReconciler {
    transactions: TransactionSender,
    close: CloseSignal,
}

impl TransactionReconciler {
    #[must_use]
    pub fn new(transactions: TransactionSender, close: CloseSignal) -> Self {
        Self {
            transactions,
            close,
        }
    }
}

#[async_trait]
impl Reconciler for TransactionReconciler {
    async fn reconcile(&self, request: ReconcileRequest) -> Result<Action, ReconcileError> {
        let started = Instant::now();
        let kind = request.kind().to_string();
        let namespace = request.namespace.clone().unwrap_or_default();

        debug!(kind = %kind, namespace = %namespace, name = %request.name, "Reconciling object");

        let part = match envelope(&request) {
            Ok(part) => part,
            Err(e) => {
                error!(kind = %kind, namespace = %namespace, name = %request.name, error = %e, "Failed to prepare object for the pipeline");
                metrics::record_reconciliation_error(&kind, started.elapsed());
                return Err(e);
            }
        };
        let deleted = part.metadata_value(META_DELETED).is_some();

        let (transaction, outcome) = Transaction::new(Message::single(part));
        let mut close = self.close.clone();

        tokio::select! {
            biased;
            () = close.closing() => {
                debug!(kind = %kind, name = %request.name, "Input closing, dropping event before send");
                return Ok(Action::await_change());
            }
            sent = self.transactions.send(transaction) => {
                if sent.is_err() {
                    debug!(kind = %kind, name = %request.name, "Transaction channel closed, dropping event");
                    return Ok(Action::await_change());
                }
            }
        }

        let outcome = tokio::select! {
            biased;
            () = close.closing() => {
                debug!(kind = %kind, name = %request.name, "Input closing, no longer waiting for outcome");
                return Ok(Action::await_change());
            }
            outcome = outcome => outcome,
        };

        let Ok(outcome) = outcome else {
            warn!(kind = %kind, namespace = %namespace, name = %request.name, "Pipeline dropped the transaction without an outcome");
            metrics::record_reconciliation_error(&kind, started.elapsed());
            return Err(ReconcileError::Abandoned);
        };

        if let Err(e) = outcome.result {
            warn!(kind = %kind, namespace = %namespace, name = %request.name, error = %e, "Pipeline failed to process object");
            metrics::record_reconciliation_error(&kind, started.elapsed());
            return Err(ReconcileError::Pipeline(e));
        }

        if deleted {
            metrics::record_reconciliation_deleted(&kind, started.elapsed());
        } else {
            metrics::record_reconciliation_success(&kind, started.elapsed());
        }

        Ok(match requeue_hint(&outcome.metadata) {
            Some(delay) => {
                debug!(kind = %kind, name = %request.name, delay = ?delay, "Pipeline requested requeue");
                Action::requeue(delay)
            }
            None => Action::await_change(),
        })
    }
}

/// Build the message part describing the current state of the requested object.
///
/// # Errors
///
/// Returns [`ReconcileError::Fetch`] if the cache lookup fails and
/// [`ReconcileError::Encode`] if the object cannot be serialized.
pub fn envelope(request: &ReconcileRequest) -> Result<Part, ReconcileError> {
    let spec = &request.target.spec;
    let namespace = request.namespace.clone().unwrap_or_default();

    let object = request.fetch().map_err(|e| ReconcileError::Fetch {
        kind: spec.kind.clone(),
        namespace: namespace.clone(),
        name: request.name.clone(),
        reason: e.to_string(),
    })?;

    let payload = match &object {
        Some(object) => serde_json::to_vec(object).map_err(|source| ReconcileError::Encode {
            kind: spec.kind.clone(),
            namespace: namespace.clone(),
            name: request.name.clone(),
            source,
        })?,
        None => DELETED_PLACEHOLDER.to_vec(),
    };

    let mut part = Part::new(payload)
        .with_metadata(META_GROUP, spec.group.as_str())
        .with_metadata(META_VERSION, spec.version.as_str())
        .with_metadata(META_KIND, spec.kind.as_str())
        .with_metadata(META_NAMESPACE, namespace)
        .with_metadata(META_NAME, request.name.as_str());
    if object.is_none() {
        part.set_metadata(META_DELETED, META_DELETED_VALUE);
    }
    Ok(part)
}

/// Read the `requeue_after` hint from outcome metadata.
///
/// Malformed hints are logged and ignored; a zero duration means no requeue.
#[must_use]
pub fn requeue_hint(metadata: &Metadata) -> Option<Duration> {
    let hint = metadata
        .get(META_REQUEUE_AFTER)
        .filter(|value| !value.is_empty())?;
    match parse_duration(hint) {
        Ok(delay) if delay.is_zero() => None,
        Ok(delay) => Some(delay),
        Err(e) => {
            warn!(value = %hint, error = %e, "Ignoring malformed requeue_after hint");
            None
        }
    }
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod input_tests;
