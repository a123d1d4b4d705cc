//! Ordered message production.
//!
//! Every group gets its own task that enqueues messages one after another, so
//! the queue sees each group's messages in index order. Groups run
//! concurrently and never cancel each other: a failing group stops on its
//! first error while the others carry on.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
};

use tokio::task::JoinSet;

use crate::{
    error::{Error, GroupFailure},
    log::MessageLog,
    message::{Message, Sender, Status},
    queue::{MessageQueue, OutgoingMessage},
    token::generate_token,
};

/// Result of a producer run.
#[derive(Debug, Default)]
pub struct SendReport {
    /// Queue-assigned ids per group, in send order
    pub sent: BTreeMap<String, Vec<String>>,
    pub failures: Vec<GroupFailure>,
}

impl SendReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Splits the report into the ids that were sent and a combined error
    /// covering every failed group.
    pub fn into_result(self) -> (BTreeMap<String, Vec<String>>, Result<(), Error>) {
        let result = if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::GroupsFailed {
                failures: self.failures,
            })
        };
        (self.sent, result)
    }
}

struct GroupRun {
    group: String,
    sent: Vec<String>,
    error: Option<Error>,
}

pub struct Producer<L, Q> {
    log: Arc<L>,
    queue: Arc<Q>,
}

impl<L, Q> Clone for Producer<L, Q> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            queue: Arc::clone(&self.queue),
        }
    }
}

impl<L, Q> Producer<L, Q>
where
    L: MessageLog,
    Q: MessageQueue,
{
    pub fn new(log: Arc<L>, queue: Arc<Q>) -> Self {
        Self { log, queue }
    }

    /// Sends `per_group_count` messages to every group.
    ///
    /// Invalid input fails before anything is enqueued. Infrastructure errors
    /// are scoped to their group and reported in [`SendReport::failures`]
    /// next to every id that did make it through.
    pub async fn send<I, S>(&self, groups: I, per_group_count: i64) -> Result<SendReport, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let groups: BTreeSet<String> = groups.into_iter().map(Into::into).collect();

        if per_group_count <= 0 {
            return Err(Error::invalid_parameter(format!(
                "per-group count must be greater than 0, got {per_group_count}"
            )));
        }
        if groups.is_empty() {
            return Err(Error::invalid_parameter("at least one group is required"));
        }
        if groups.iter().any(String::is_empty) {
            return Err(Error::invalid_parameter("group names must not be empty"));
        }

        let count = usize::try_from(per_group_count)
            .map_err(|_| Error::invalid_parameter("per-group count is too large"))?;

        tracing::info!(groups = groups.len(), per_group = count, "Sending messages");

        let mut tasks = JoinSet::new();
        let mut task_groups = HashMap::new();

        for group in groups {
            let producer = self.clone();
            let handle = tasks.spawn({
                let group = group.clone();
                async move { producer.send_group(group, count).await }
            });
            task_groups.insert(handle.id(), group);
        }

        let mut report = SendReport::default();

        while let Some(joined) = tasks.join_next_with_id().await {
            let run = match joined {
                Ok((_, run)) => run,
                Err(e) => {
                    let group = task_groups.remove(&e.id()).unwrap_or_default();
                    GroupRun {
                        group,
                        sent: Vec::new(),
                        error: Some(eyre::eyre!("group task aborted: {e}").into()),
                    }
                }
            };

            if let Some(error) = run.error {
                tracing::warn!(group = %run.group, sent = run.sent.len(), "Group failed: {error}");
                report.failures.push(GroupFailure {
                    group: run.group.clone(),
                    completed: run.sent.len(),
                    error,
                });
            }
            report.sent.insert(run.group, run.sent);
        }

        report.failures.sort_by(|a, b| a.group.cmp(&b.group));

        Ok(report)
    }

    async fn send_group(&self, group: String, count: usize) -> GroupRun {
        let mut sent = Vec::with_capacity(count);

        for index in 0..count {
            match self.send_one(&group, index).await {
                Ok(message_id) => sent.push(message_id),
                Err(error) => {
                    return GroupRun {
                        group,
                        sent,
                        error: Some(error),
                    }
                }
            }
        }

        tracing::debug!(group = %group, sent = sent.len(), "Group complete");

        GroupRun {
            group,
            sent,
            error: None,
        }
    }

    async fn send_one(&self, group: &str, index: usize) -> Result<String, Error> {
        let token = generate_token::<16>(rand::thread_rng())?;
        let outgoing = OutgoingMessage {
            group: group.to_owned(),
            body: format!("{index}: {token}"),
            sender: Sender::for_index(index),
            deduplication_id: token,
        };

        let message_id = self.queue.send(&outgoing).await?;

        let entry = Message::new(
            group,
            &message_id,
            outgoing.body,
            outgoing.sender,
            Status::Sent,
        )?;
        self.log.put(&entry).await?;

        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use super::*;
    use crate::log::{BoxFuture, MemoryLog, Page, PageCursor};

    /// Records every enqueued message and hands out sequential ids.
    #[derive(Default)]
    struct RecordingQueue {
        next_id: AtomicUsize,
        sent: Mutex<Vec<OutgoingMessage>>,
        fail_groups: Vec<String>,
    }

    impl MessageQueue for RecordingQueue {
        fn send<'a>(
            &'a self,
            message: &'a OutgoingMessage,
        ) -> BoxFuture<'a, Result<String, Error>> {
            Box::pin(async move {
                if self.fail_groups.contains(&message.group) {
                    return Err(Error::queue(eyre::eyre!("queue unavailable")));
                }
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                self.sent.lock().unwrap().push(message.clone());
                Ok(format!("{}-{id}", message.group))
            })
        }

        fn change_visibility<'a>(
            &'a self,
            _: &'a str,
            _: Duration,
        ) -> BoxFuture<'a, Result<(), Error>> {
            Box::pin(async { Ok(()) })
        }
    }

    /// Memory log that fails the nth write (1-based) of one group.
    struct FlakyLog {
        inner: MemoryLog,
        group: String,
        fail_on: usize,
        writes: Mutex<HashMap<String, usize>>,
    }

    impl MessageLog for FlakyLog {
        fn put<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>> {
            let attempt = {
                let mut writes = self.writes.lock().unwrap();
                let count = writes.entry(message.group.clone()).or_default();
                *count += 1;
                *count
            };

            if message.group == self.group && attempt == self.fail_on {
                return Box::pin(async {
                    Err(Error::Store {
                        source: sqlx::Error::PoolTimedOut,
                    })
                });
            }
            self.inner.put(message)
        }

        fn query_page<'a>(
            &'a self,
            group: &'a str,
            after: Option<PageCursor>,
            limit: u32,
        ) -> BoxFuture<'a, Result<Page, Error>> {
            self.inner.query_page(group, after, limit)
        }
    }

    #[tokio::test]
    async fn test_sends_n_distinct_ids_with_alternating_senders() {
        let log = Arc::new(MemoryLog::new());
        let queue = Arc::new(RecordingQueue::default());
        let producer = Producer::new(log.clone(), queue.clone());

        let report = producer.send(["room-a"], 5).await.unwrap();
        assert!(report.is_complete());

        let ids = &report.sent["room-a"];
        assert_eq!(ids.len(), 5);
        assert_eq!(ids.iter().collect::<BTreeSet<_>>().len(), 5);

        let sent = queue.sent.lock().unwrap();
        let senders: Vec<_> = sent.iter().map(|m| m.sender).collect();
        assert_eq!(
            senders,
            vec![
                Sender::User,
                Sender::Bot,
                Sender::User,
                Sender::Bot,
                Sender::User
            ]
        );
        for (index, message) in sent.iter().enumerate() {
            assert_eq!(message.group, "room-a");
            assert!(message.body.starts_with(&format!("{index}: ")));
            assert!(message.body.ends_with(&message.deduplication_id));
        }

        let logged = log.query_by_group("room-a").await.unwrap();
        assert_eq!(logged.len(), 5);
        assert!(logged.iter().all(|m| m.status == Status::Sent));
        let mut logged_ids: Vec<_> = logged.into_iter().map(|m| m.message_id).collect();
        logged_ids.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(logged_ids, expected);
    }

    #[tokio::test]
    async fn test_validation_happens_before_any_work() {
        let queue = Arc::new(RecordingQueue::default());
        let producer = Producer::new(Arc::new(MemoryLog::new()), queue.clone());

        assert!(matches!(
            producer.send(["room"], 0).await,
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            producer.send(["room"], -3).await,
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            producer.send(Vec::<String>::new(), 3).await,
            Err(Error::InvalidParameter { .. })
        ));
        assert!(matches!(
            producer.send(["room", ""], 3).await,
            Err(Error::InvalidParameter { .. })
        ));
        assert!(queue.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_group_keeps_partial_results() {
        let log = Arc::new(FlakyLog {
            inner: MemoryLog::new(),
            group: "room-b".to_owned(),
            fail_on: 2,
            writes: Mutex::new(HashMap::new()),
        });
        let queue = Arc::new(RecordingQueue::default());
        let producer = Producer::new(log, queue);

        let report = producer.send(["room-a", "room-b"], 4).await.unwrap();

        assert_eq!(report.sent["room-a"].len(), 4);
        assert_eq!(report.sent["room-b"].len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].group, "room-b");
        assert_eq!(report.failures[0].completed, 1);

        let (sent, result) = report.into_result();
        assert_eq!(sent.len(), 2);
        let message = result.unwrap_err().to_string();
        assert!(message.contains("room-b"), "{message}");
        assert!(!message.contains("room-a"), "{message}");
    }

    #[tokio::test]
    async fn test_every_failed_group_is_reported() {
        let queue = Arc::new(RecordingQueue {
            fail_groups: vec!["room-b".to_owned(), "room-c".to_owned()],
            ..Default::default()
        });
        let producer = Producer::new(Arc::new(MemoryLog::new()), queue);

        let report = producer
            .send(["room-a", "room-b", "room-c"], 2)
            .await
            .unwrap();

        let failed: Vec<_> = report.failures.iter().map(|f| f.group.as_str()).collect();
        assert_eq!(failed, vec!["room-b", "room-c"]);
        assert_eq!(report.sent["room-a"].len(), 2);
        assert!(report.sent["room-b"].is_empty());
        assert!(report.sent["room-c"].is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_groups_are_sent_once() {
        let queue = Arc::new(RecordingQueue::default());
        let producer = Producer::new(Arc::new(MemoryLog::new()), queue.clone());

        let report = producer.send(["room", "room"], 3).await.unwrap();

        assert_eq!(report.sent.len(), 1);
        assert_eq!(queue.sent.lock().unwrap().len(), 3);
    }
}
