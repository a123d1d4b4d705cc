//! Drives the consumer from a live queue.
//!
//! Mirrors what a queue event-source mapping does: receive a batch, hand it
//! to the consumer, delete every record that was not reported as failed.
//! Failed records are left alone so their visibility timeout expires and the
//! queue redelivers them.

use std::collections::HashSet;

use crate::{
    consumer::Consumer, error::Error, event::QueueRecord, log::MessageLog, queue::SqsQueue,
};

pub struct Poller<L> {
    consumer: Consumer<L, SqsQueue>,
    queue: SqsQueue,
    batch_size: i32,
    wait_time_seconds: i32,
}

#[bon::bon]
impl<L: MessageLog> Poller<L> {
    #[builder]
    pub fn new(
        consumer: Consumer<L, SqsQueue>,
        queue: SqsQueue,
        #[builder(default = crate::config::MAX_BATCH_SIZE)] batch_size: i32,
        #[builder(default = 20)] wait_time_seconds: i32,
    ) -> Self {
        Self {
            consumer,
            queue,
            batch_size,
            wait_time_seconds,
        }
    }

    /// Polls until Ctrl-C is received.
    pub async fn run(&self) -> Result<(), Error> {
        tracing::info!(
            queue = self.queue.queue_url(),
            policy = %self.consumer.policy(),
            "Polling queue"
        );

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down poller");
                    return Ok(());
                }
                result = self.poll_once() => {
                    if let Err(e) = result {
                        tracing::error!("Error receiving batch: {e}");
                    }
                }
            }
        }
    }

    /// Receives and processes a single batch, returning how many records
    /// were removed from the queue.
    pub async fn poll_once(&self) -> Result<usize, Error> {
        let records = self
            .queue
            .receive(self.batch_size, self.wait_time_seconds)
            .await?;

        if records.is_empty() {
            return Ok(0);
        }

        let failed = match self.consumer.process_batch(&records).await {
            Ok(failed) => failed,
            Err(e) if e.is_validation() => {
                tracing::warn!(records = records.len(), "Rejected malformed batch: {e}");
                return Ok(0);
            }
            Err(e) => {
                // The whole batch becomes visible again once its timeout expires.
                tracing::error!(records = records.len(), "Batch failed: {e}");
                return Ok(0);
            }
        };

        let completed = completed_records(&records, &failed);
        for record in &completed {
            self.queue.delete(&record.receipt_handle).await?;
        }

        tracing::debug!(
            deleted = completed.len(),
            retried = failed.len(),
            "Batch settled"
        );

        Ok(completed.len())
    }
}

/// Records the queue should delete: everything not reported as failed.
fn completed_records<'a>(records: &'a [QueueRecord], failed: &[String]) -> Vec<&'a QueueRecord> {
    let failed: HashSet<&str> = failed.iter().map(String::as_str).collect();

    records
        .iter()
        .filter(|record| !failed.contains(record.id.as_str()))
        .collect()
}
