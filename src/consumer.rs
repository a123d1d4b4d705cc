//! Batch consumer.
//!
//! Processes one delivered batch sequentially and answers with the ids of
//! the records the queue should redeliver. Everything not listed is treated
//! by the queue as processed and deleted.

use std::{sync::Arc, time::Duration};

use crate::{
    config::DEFAULT_PROCESSING_DELAY,
    error::Error,
    event::{BatchResponse, QueueRecord, SqsEvent, SENDER_ATTRIBUTE},
    log::MessageLog,
    message::{Message, Sender, Status},
    policy::{FailurePolicy, Outcome},
    queue::MessageQueue,
};

pub struct Consumer<L, Q> {
    log: Arc<L>,
    queue: Arc<Q>,
    policy: FailurePolicy,
    processing_delay: Duration,
}

#[bon::bon]
impl<L, Q> Consumer<L, Q>
where
    L: MessageLog,
    Q: MessageQueue,
{
    #[builder]
    pub fn new(
        log: Arc<L>,
        queue: Arc<Q>,
        #[builder(default)] policy: FailurePolicy,
        #[builder(default = DEFAULT_PROCESSING_DELAY)] processing_delay: Duration,
    ) -> Self {
        Self {
            log,
            queue,
            policy,
            processing_delay,
        }
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    /// Processes a batch and returns the ids of records to redeliver, in
    /// batch order.
    ///
    /// A returned error means nothing in the batch should be considered
    /// processed.
    pub async fn process_batch(&self, records: &[QueueRecord]) -> Result<Vec<String>, Error> {
        if !self.processing_delay.is_zero() {
            tokio::time::sleep(self.processing_delay).await;
        }

        tracing::debug!(
            policy = %self.policy,
            received = ?records.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            "Processing batch"
        );

        if self.policy == FailurePolicy::HardFailure {
            return Err(Error::HardFailure {
                record_ids: records.iter().map(|r| r.id.clone()).collect(),
            });
        }

        let mut failed = Vec::new();

        for (position, record) in records.iter().enumerate() {
            match self.policy.outcome(position, record) {
                Outcome::Ack => self.acknowledge(record).await?,
                Outcome::Retry => {
                    if self.policy.resets_visibility() {
                        self.queue
                            .change_visibility(&record.receipt_handle, Duration::ZERO)
                            .await?;
                    }
                    failed.push(record.id.clone());
                }
                Outcome::Drop => {
                    tracing::warn!(
                        id = %record.id,
                        group = %record.group_key,
                        receive_count = record.receive_count,
                        "Dropping record"
                    );
                }
            }
        }

        tracing::debug!(?failed, "Batch processed");

        Ok(failed)
    }

    /// Runs a delivered batch event end to end.
    pub async fn handle_event(&self, event: SqsEvent) -> Result<BatchResponse, Error> {
        let records = event.into_records()?;
        let failed = self.process_batch(&records).await?;
        Ok(failed.into_iter().collect())
    }

    async fn acknowledge(&self, record: &QueueRecord) -> Result<(), Error> {
        let sender = record.attribute(SENDER_ATTRIBUTE)?;
        let sender = sender.parse::<Sender>().map_err(|_| {
            Error::malformed_record(&record.id, format!("unknown sender {sender:?}"))
        })?;

        let entry = Message::new(
            &record.group_key,
            &record.id,
            &record.body,
            sender,
            Status::Received,
        )?;

        self.log.put(&entry).await
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Mutex};

    use super::*;
    use crate::{
        log::{BoxFuture, MemoryLog},
        queue::OutgoingMessage,
    };

    #[derive(Default)]
    struct VisibilityRecorder {
        resets: Mutex<Vec<(String, Duration)>>,
        fail: bool,
    }

    impl MessageQueue for VisibilityRecorder {
        fn send<'a>(&'a self, _: &'a OutgoingMessage) -> BoxFuture<'a, Result<String, Error>> {
            Box::pin(async { Err(Error::queue(eyre::eyre!("not a producer queue"))) })
        }

        fn change_visibility<'a>(
            &'a self,
            receipt_handle: &'a str,
            timeout: Duration,
        ) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async move {
                if self.fail {
                    return Err(Error::queue(eyre::eyre!("visibility call rejected")));
                }
                self.resets
                    .lock()
                    .unwrap()
                    .push((receipt_handle.to_owned(), timeout));
                Ok(())
            })
        }
    }

    fn record(id: &str, receive_count: u32) -> QueueRecord {
        QueueRecord {
            id: id.to_owned(),
            receipt_handle: format!("handle-{id}"),
            group_key: "room".to_owned(),
            receive_count,
            body: format!("body of {id}"),
            attributes: HashMap::from([(SENDER_ATTRIBUTE.to_owned(), "USER".to_owned())]),
        }
    }

    fn batch(size: usize) -> Vec<QueueRecord> {
        (0..size).map(|i| record(&format!("r{i}"), 1)).collect()
    }

    fn consumer(
        policy: FailurePolicy,
    ) -> (
        Consumer<MemoryLog, VisibilityRecorder>,
        Arc<MemoryLog>,
        Arc<VisibilityRecorder>,
    ) {
        let log = Arc::new(MemoryLog::new());
        let queue = Arc::new(VisibilityRecorder::default());
        let consumer = Consumer::builder()
            .log(log.clone())
            .queue(queue.clone())
            .policy(policy)
            .processing_delay(Duration::ZERO)
            .build();
        (consumer, log, queue)
    }

    async fn received_ids(log: &MemoryLog) -> Vec<String> {
        log.query_by_group("room")
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.status == Status::Received)
            .map(|m| m.message_id)
            .collect()
    }

    #[tokio::test]
    async fn test_always_succeed_acks_everything() {
        let (consumer, log, _) = consumer(FailurePolicy::AlwaysSucceed);

        let failed = consumer.process_batch(&batch(5)).await.unwrap();

        assert!(failed.is_empty());
        assert_eq!(log.len(), 5);
        let entries = log.query_by_group("room").await.unwrap();
        assert!(entries.iter().all(|m| m.status == Status::Received));
        assert!(entries.iter().all(|m| m.sender == Sender::User));
    }

    #[tokio::test]
    async fn test_hard_failure_writes_nothing() {
        let (consumer, log, _) = consumer(FailurePolicy::HardFailure);

        let err = consumer.process_batch(&batch(3)).await.unwrap_err();

        match err {
            Error::HardFailure { record_ids } => assert_eq!(record_ids, vec!["r0", "r1", "r2"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_retries_odd_positions() {
        let (consumer, log, queue) = consumer(FailurePolicy::PartialFailure);

        let failed = consumer.process_batch(&batch(4)).await.unwrap();

        assert_eq!(failed, vec!["r1", "r3"]);
        let mut received = received_ids(&log).await;
        received.sort();
        assert_eq!(received, vec!["r0", "r2"]);
        assert!(queue.resets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_after_attempts() {
        let (consumer, log, _) = consumer(FailurePolicy::DropAfterAttempts(3));

        let failed = consumer
            .process_batch(&[record("third", 3), record("first", 1), record("fourth", 4)])
            .await
            .unwrap();

        assert_eq!(failed, vec!["first", "fourth"]);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_dlq_policy_retries_regardless_of_attempts() {
        let (consumer, log, _) = consumer(FailurePolicy::DlqAfterAttempts(2));

        let failed = consumer
            .process_batch(&[record("a", 1), record("b", 2), record("c", 5)])
            .await
            .unwrap();

        assert_eq!(failed, vec!["a", "b", "c"]);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn test_immediate_redeliver_resets_visibility() {
        let (consumer, log, queue) = consumer(FailurePolicy::ImmediateRedeliver);

        let failed = consumer.process_batch(&batch(2)).await.unwrap();

        assert_eq!(failed, vec!["r0", "r1"]);
        assert!(log.is_empty());
        assert_eq!(
            *queue.resets.lock().unwrap(),
            vec![
                ("handle-r0".to_owned(), Duration::ZERO),
                ("handle-r1".to_owned(), Duration::ZERO)
            ]
        );
    }

    #[tokio::test]
    async fn test_visibility_failure_aborts_batch() {
        let log = Arc::new(MemoryLog::new());
        let queue = Arc::new(VisibilityRecorder {
            fail: true,
            ..Default::default()
        });
        let consumer = Consumer::builder()
            .log(log)
            .queue(queue)
            .policy(FailurePolicy::ImmediateRedeliver)
            .processing_delay(Duration::ZERO)
            .build();

        assert!(matches!(
            consumer.process_batch(&batch(2)).await,
            Err(Error::Queue { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_sender_is_malformed() {
        let (consumer, log, _) = consumer(FailurePolicy::AlwaysSucceed);

        let mut bad = record("r1", 1);
        bad.attributes.clear();

        let err = consumer
            .process_batch(&[record("r0", 1), bad])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::MalformedRecord { ref record_id, .. } if record_id == "r1"));
        // Records before the malformed one were already written.
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_sender_is_malformed() {
        let (consumer, _, _) = consumer(FailurePolicy::AlwaysSucceed);

        let mut bad = record("r0", 1);
        bad.attributes
            .insert(SENDER_ATTRIBUTE.to_owned(), "ROBOT".to_owned());

        assert!(matches!(
            consumer.process_batch(&[bad]).await,
            Err(Error::MalformedRecord { .. })
        ));
    }

    #[tokio::test]
    async fn test_redelivered_record_overwrites_its_entry() {
        let (consumer, log, _) = consumer(FailurePolicy::AlwaysSucceed);

        consumer.process_batch(&[record("r0", 1)]).await.unwrap();
        consumer.process_batch(&[record("r0", 2)]).await.unwrap();

        assert_eq!(received_ids(&log).await, vec!["r0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_delay_elapses_once_per_batch() {
        let consumer = Consumer::builder()
            .log(Arc::new(MemoryLog::new()))
            .queue(Arc::new(VisibilityRecorder::default()))
            .processing_delay(Duration::from_secs(2))
            .build();

        let start = tokio::time::Instant::now();
        consumer.process_batch(&batch(10)).await.unwrap();
        let elapsed = start.elapsed();

        assert!(elapsed >= Duration::from_secs(2), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "{elapsed:?}");
    }

    #[tokio::test]
    async fn test_handle_event_reports_failures() {
        let (consumer, _, _) = consumer(FailurePolicy::PartialFailure);

        let event: SqsEvent = serde_json::from_value(serde_json::json!({
            "Records": [
                {
                    "messageId": "m-0",
                    "receiptHandle": "h-0",
                    "body": "0: abc",
                    "attributes": { "ApproximateReceiveCount": "1", "MessageGroupId": "room" },
                    "messageAttributes": { "Sender": { "stringValue": "USER", "dataType": "String" } }
                },
                {
                    "messageId": "m-1",
                    "receiptHandle": "h-1",
                    "body": "1: def",
                    "attributes": { "ApproximateReceiveCount": "1", "MessageGroupId": "room" },
                    "messageAttributes": { "Sender": { "stringValue": "BOT", "dataType": "String" } }
                }
            ]
        }))
        .unwrap();

        let response = consumer.handle_event(event).await.unwrap();

        assert_eq!(response, BatchResponse::from_iter(["m-1".to_owned()]));
    }
}
