//! In-memory message log.
//!
//! Applies the same upsert and ordering rules as the SQLite log without any
//! persistence. Useful for dry runs and tests.

use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use crate::{
    error::Error,
    message::{Message, Status},
};

use super::{BoxFuture, MessageLog, Page, PageCursor};

type EntryKey = (String, String, Status);

#[derive(Clone)]
struct Entry {
    seq: i64,
    message: Message,
}

impl Entry {
    fn cursor(&self) -> PageCursor {
        PageCursor {
            created_at: self.message.created_at_text(),
            seq: self.seq,
        }
    }
}

/// Thread-safe in-memory message log.
#[derive(Clone, Default)]
pub struct MemoryLog {
    entries: Arc<papaya::HashMap<EntryKey, Entry>>,
    next_seq: Arc<AtomicI64>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn upsert(&self, message: &Message) {
        let key = (
            message.group.clone(),
            message.message_id.clone(),
            message.status,
        );
        let entries = self.entries.pin();

        // An overwrite keeps its original position among same-millisecond writes.
        let seq = entries
            .get(&key)
            .map(|entry| entry.seq)
            .unwrap_or_else(|| self.next_seq.fetch_add(1, Ordering::Relaxed) + 1);

        entries.insert(
            key,
            Entry {
                seq,
                message: message.clone(),
            },
        );
    }

    fn page(&self, group: &str, after: Option<&PageCursor>, limit: u32) -> Page {
        let mut matching: Vec<(PageCursor, Message)> = self
            .entries
            .pin()
            .iter()
            .filter(|((entry_group, _, _), _)| entry_group == group)
            .map(|(_, entry)| (entry.cursor(), entry.message.clone()))
            .filter(|(cursor, _)| after.map_or(true, |after| cursor_after(cursor, after)))
            .collect();

        matching.sort_by(|(a, _), (b, _)| (&a.created_at, a.seq).cmp(&(&b.created_at, b.seq)));
        matching.truncate(limit as usize);

        let next = if matching.len() as u32 >= limit {
            matching.last().map(|(cursor, _)| cursor.clone())
        } else {
            None
        };

        Page {
            items: matching.into_iter().map(|(_, message)| message).collect(),
            next,
        }
    }
}

fn cursor_after(cursor: &PageCursor, after: &PageCursor) -> bool {
    (&cursor.created_at, cursor.seq) > (&after.created_at, after.seq)
}

impl MessageLog for MemoryLog {
    fn put<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>> {
        self.upsert(message);
        Box::pin(std::future::ready(Ok(())))
    }

    fn query_page<'a>(
        &'a self,
        group: &'a str,
        after: Option<PageCursor>,
        limit: u32,
    ) -> BoxFuture<'a, Result<Page, Error>> {
        let page = self.page(group, after.as_ref(), limit.max(1));
        Box::pin(std::future::ready(Ok(page)))
    }
}
