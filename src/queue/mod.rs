//! FIFO queue access.

use std::time::Duration;

use crate::{error::Error, log::BoxFuture, message::Sender};

pub mod sqs;

pub use sqs::SqsQueue;

/// A message handed to the queue by the producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// FIFO group key; ordering is only guaranteed within a group
    pub group: String,
    pub body: String,
    pub sender: Sender,
    pub deduplication_id: String,
}

pub trait MessageQueue: Send + Sync + 'static {
    /// Enqueues a message and returns the queue-assigned message id.
    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> BoxFuture<'a, Result<String, Error>>;

    /// Changes how long a received message stays invisible to other consumers.
    fn change_visibility<'a>(
        &'a self,
        receipt_handle: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), Error>>;
}

impl<T: MessageQueue + ?Sized> MessageQueue for std::sync::Arc<T> {
    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> BoxFuture<'a, Result<String, Error>> {
        (**self).send(message)
    }

    fn change_visibility<'a>(
        &'a self,
        receipt_handle: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), Error>> {
        (**self).change_visibility(receipt_handle, timeout)
    }
}
