// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Plugin contracts between kubepipe's components and the pipeline.
//!
//! An [`Input`] produces [`Transaction`](crate::transaction::Transaction)s, a
//! [`Processor`] transforms messages in-line, and an [`Output`] consumes transactions
//! and answers each one exactly once.

use crate::errors::{CloseError, PipelineError};
use crate::message::Message;
use crate::transaction::TransactionReceiver;
use async_trait::async_trait;
use std::time::Duration;

/// Source of transactions.
#[async_trait]
pub trait Input: Send + Sync {
    /// Hand out the receiving end of the transaction channel. Only the first call
    /// returns `Some`.
    fn take_transactions(&self) -> Option<TransactionReceiver>;

    /// Start producing transactions. Returns `false` if already started or closed.
    fn start(&self) -> bool;

    /// Request shutdown without waiting for it. Safe to call any number of times.
    fn close_async(&self);

    /// Wait for the input to finish shutting down.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError::Timeout`] if shutdown takes longer than `timeout`.
    async fn wait_for_close(&self, timeout: Duration) -> Result<(), CloseError>;

    /// Resolve once the input has stopped, whether it was closed or stopped on its own.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError::Failed`] if the input stopped because of an error.
    async fn wait_stopped(&self) -> Result<(), CloseError>;
}

/// In-line message transform.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process one message into zero or more messages.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] if the message as a whole cannot be processed.
    /// Failures scoped to a single part are flagged on that part instead.
    async fn process(&self, message: Message) -> Result<Vec<Message>, PipelineError>;
}

/// Terminal consumer of transactions.
#[async_trait]
pub trait Output: Send + Sync {
    /// Start consuming `transactions`. Returns `false` if already consuming or closed.
    fn consume(&self, transactions: TransactionReceiver) -> bool;

    /// Request shutdown without waiting for it. Safe to call any number of times.
    fn close_async(&self);

    /// Wait for the output to finish shutting down.
    ///
    /// # Errors
    ///
    /// Returns [`CloseError::Timeout`] if shutdown takes longer than `timeout`.
    async fn wait_for_close(&self, timeout: Duration) -> Result<(), CloseError>;
}
