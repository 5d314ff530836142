// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Transactions: a message paired with a single-use outcome channel.
//!
//! The producer of a transaction (the watch input) blocks until exactly one
//! [`Outcome`] arrives on the transaction's channel. The [`Responder`] half is
//! consumed by value when answering, so a second outcome cannot be sent. A responder
//! that is dropped without answering closes the channel; the producer observes that
//! as an abandoned transaction rather than waiting forever.

use crate::errors::PipelineError;
use crate::message::{Message, Metadata};
use tokio::sync::{mpsc, oneshot};

/// Sending half of the transaction channel.
pub type TransactionSender = mpsc::Sender<Transaction>;

/// Receiving half of the transaction channel.
pub type TransactionReceiver = mpsc::Receiver<Transaction>;

/// The result of a message's journey through the pipeline.
#[derive(Debug)]
pub struct Outcome {
    /// Metadata of the message's first part when the terminal stage responded.
    pub metadata: Metadata,
    /// `Ok` if the message was committed, the failure otherwise.
    pub result: Result<(), PipelineError>,
}

impl Outcome {
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.result.is_ok()
    }
}

/// Answers a transaction exactly once.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Outcome>,
}

impl Responder {
    /// Report success for `message`.
    pub fn ack(self, message: &Message) {
        self.respond(message, Ok(()));
    }

    /// Report failure for `message`.
    pub fn nack(self, message: &Message, error: PipelineError) {
        self.respond(message, Err(error));
    }

    /// Report `result` for `message`.
    ///
    /// A producer that stopped waiting (because it is closing) is not an error.
    pub fn respond(self, message: &Message, result: Result<(), PipelineError>) {
        let outcome = Outcome {
            metadata: message.first_metadata(),
            result,
        };
        if self.tx.send(outcome).is_err() {
            tracing::debug!("Transaction producer stopped waiting before the outcome arrived");
        }
    }
}

/// A message in flight together with the means to answer for it.
#[derive(Debug)]
pub struct Transaction {
    /// The message being processed.
    pub payload: Message,
    responder: Responder,
}

impl Transaction {
    /// Create a transaction and the receiver its outcome will arrive on.
    #[must_use]
    pub fn new(payload: Message) -> (Self, oneshot::Receiver<Outcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                responder: Responder { tx },
            },
            rx,
        )
    }

    /// Rebuild a transaction from a (possibly rewritten) message and an existing responder.
    #[must_use]
    pub fn from_parts(payload: Message, responder: Responder) -> Self {
        Self { payload, responder }
    }

    /// Split the transaction into its message and responder.
    #[must_use]
    pub fn into_parts(self) -> (Message, Responder) {
        (self.payload, self.responder)
    }

    /// Acknowledge the transaction's own message.
    pub fn ack(self) {
        let (message, responder) = self.into_parts();
        responder.ack(&message);
    }

    /// Fail the transaction's own message.
    pub fn nack(self, error: PipelineError) {
        let (message, responder) = self.into_parts();
        responder.nack(&message, error);
    }
}

/// Create the bounded channel connecting an input to the pipeline.
#[must_use]
pub fn channel(capacity: usize) -> (TransactionSender, TransactionReceiver) {
    mpsc::channel(capacity.max(1))
}

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod transaction_tests;
