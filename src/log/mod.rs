//! Durable message log.
//!
//! The log is an upsert-style key-value store with a secondary index by
//! group. Entries are keyed by `(group, message_id, status)` and read back
//! per group in ascending `created_at` order, one page at a time.

use std::{future::Future, pin::Pin};

use crate::{error::Error, message::Message};

pub mod memory;
pub mod sqlite;

pub use memory::MemoryLog;
pub use sqlite::SqliteLog;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Position after the last entry of a page.
///
/// `seq` breaks ties between entries written within the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at: String,
    pub seq: i64,
}

/// One page of a group query.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Message>,
    /// Set when more entries may follow
    pub next: Option<PageCursor>,
}

/// Storage backend for sent/received message entries.
pub trait MessageLog: Send + Sync + 'static {
    /// Writes an entry, overwriting any entry with the same
    /// `(group, message_id, status)`.
    ///
    /// A different status for the same id is stored as a separate entry.
    fn put<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>>;

    /// Reads up to `limit` entries of `group` that follow `after`.
    fn query_page<'a>(
        &'a self,
        group: &'a str,
        after: Option<PageCursor>,
        limit: u32,
    ) -> BoxFuture<'a, Result<Page, Error>>;

    /// Number of entries requested per page by [`MessageLog::query_by_group`].
    fn page_size(&self) -> u32 {
        DEFAULT_PAGE_SIZE
    }

    /// Reads every entry of `group`, ordered by `created_at` ascending.
    ///
    /// Pages are fetched until the backend reports no further cursor.
    fn query_by_group<'a>(&'a self, group: &'a str) -> BoxFuture<'a, Result<Vec<Message>, Error>> {
        Box::pin(async move {
            let limit = self.page_size().max(1);
            let mut messages = Vec::new();
            let mut cursor = None;
            let mut pages = 0usize;

            loop {
                let page = self.query_page(group, cursor, limit).await?;
                pages += 1;
                messages.extend(page.items);

                match page.next {
                    Some(next) => cursor = Some(next),
                    None => break,
                }
            }

            tracing::debug!(group, pages, entries = messages.len(), "Queried group");

            Ok(messages)
        })
    }
}

impl<T: MessageLog + ?Sized> MessageLog for std::sync::Arc<T> {
    fn put<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>> {
        (**self).put(message)
    }

    fn query_page<'a>(
        &'a self,
        group: &'a str,
        after: Option<PageCursor>,
        limit: u32,
    ) -> BoxFuture<'a, Result<Page, Error>> {
        (**self).query_page(group, after, limit)
    }

    fn page_size(&self) -> u32 {
        (**self).page_size()
    }
}
