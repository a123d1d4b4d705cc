use sqlx::{
    sqlite::{SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use tokio_stream::StreamExt;

use crate::{
    config::Config,
    error::Error,
    message::{Message, MessageRow},
};

use super::{BoxFuture, MessageLog, Page, PageCursor, DEFAULT_PAGE_SIZE};

/// Message log stored in a SQLite database.
#[derive(Clone)]
pub struct SqliteLog {
    pool: SqlitePool,
    page_size: u32,
}

impl SqliteLog {
    pub async fn connect(config: &Config) -> Result<Self, Error> {
        let opts = SqliteConnectOptions::new()
            .filename(config.db_path())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .optimize_on_close(true, None)
            .auto_vacuum(SqliteAutoVacuum::Full);

        let pool = SqlitePoolOptions::new().connect_with(opts).await?;

        Ok(Self::from_pool(pool)
            .await?
            .with_page_size(config.page_size()))
    }

    /// Wraps an existing pool, creating the schema if needed.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, Error> {
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self {
            pool,
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

impl MessageLog for SqliteLog {
    fn put<'a>(&'a self, message: &'a Message) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            sqlx::query(
                "
                INSERT INTO messages (group_id, message_id, content, sender, status, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (group_id, message_id, status) DO UPDATE SET
                    content = excluded.content,
                    sender = excluded.sender,
                    created_at = excluded.created_at
                ",
            )
            .bind(&message.group)
            .bind(&message.message_id)
            .bind(&message.content)
            .bind(message.sender)
            .bind(message.status)
            .bind(message.created_at_text())
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }

    fn query_page<'a>(
        &'a self,
        group: &'a str,
        after: Option<PageCursor>,
        limit: u32,
    ) -> BoxFuture<'a, Result<Page, Error>> {
        Box::pin(async move {
            let query = match &after {
                None => sqlx::query_as::<_, MessageRow>(
                    "
                    SELECT seq, group_id, message_id, content, sender, status, created_at
                    FROM messages
                    WHERE group_id = $1
                    ORDER BY created_at, seq
                    LIMIT $2
                    ",
                )
                .bind(group)
                .bind(limit as i64),
                Some(cursor) => sqlx::query_as::<_, MessageRow>(
                    "
                    SELECT seq, group_id, message_id, content, sender, status, created_at
                    FROM messages
                    WHERE group_id = $1 AND (created_at, seq) > ($2, $3)
                    ORDER BY created_at, seq
                    LIMIT $4
                    ",
                )
                .bind(group)
                .bind(&cursor.created_at)
                .bind(cursor.seq)
                .bind(limit as i64),
            };

            let mut stream = query.fetch(&self.pool);

            let mut items = Vec::new();
            let mut last = None;

            while let Some(row) = stream.next().await.transpose()? {
                last = Some(PageCursor {
                    created_at: row.created_at.clone(),
                    seq: row.seq,
                });
                items.push(Message::try_from(row)?);
            }

            let next = if items.len() as u32 >= limit {
                last
            } else {
                None
            };

            Ok(Page { items, next })
        })
    }

    fn page_size(&self) -> u32 {
        self.page_size
    }
}
