//! Message types persisted to the message log.
//!
//! A message is written twice over its lifetime: once by the producer with
//! status [`Status::Sent`] when it is enqueued, and once by the consumer with
//! status [`Status::Received`] when it has been processed. The two writes are
//! distinct log entries, which lets the verifier observe both sides
//! independently.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use strum::{Display, EnumString};

use crate::error::Error;

/// Storage format of `created_at`: fixed width, so lexical order equals
/// chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Who authored a message. Alternates with the production index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, sqlx::Type,
)]
#[sqlx(type_name = "text")]
pub enum Sender {
    #[serde(rename = "USER")]
    #[sqlx(rename = "USER")]
    #[strum(serialize = "USER")]
    User,
    #[serde(rename = "BOT")]
    #[sqlx(rename = "BOT")]
    #[strum(serialize = "BOT")]
    Bot,
}

impl Sender {
    /// Even positions (0-based) are written by the user, odd ones by the bot.
    pub fn for_index(index: usize) -> Self {
        if index % 2 == 0 {
            Self::User
        } else {
            Self::Bot
        }
    }
}

/// Which side of the pipeline wrote a log entry.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    sqlx::Type,
)]
#[sqlx(type_name = "text")]
pub enum Status {
    /// Written by the producer once the queue accepted the message
    #[serde(rename = "SENT")]
    #[sqlx(rename = "SENT")]
    #[strum(serialize = "SENT")]
    Sent,
    /// Written by the consumer once it acknowledged the message
    #[serde(rename = "RECEIVED")]
    #[sqlx(rename = "RECEIVED")]
    #[strum(serialize = "RECEIVED")]
    Received,
}

/// Store key of a message. Unique per [`Status`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKey {
    pub group: String,
    pub message_id: String,
}

/// A single entry of the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Ordering key; every message of a group must be observed in send order
    pub group: String,
    /// Queue-assigned id, unique within the group
    pub message_id: String,
    pub content: String,
    pub sender: Sender,
    pub status: Status,
    /// Wall-clock time of the write, millisecond precision
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Builds a message stamped with the current time.
    pub fn new(
        group: impl Into<String>,
        message_id: impl Into<String>,
        content: impl Into<String>,
        sender: Sender,
        status: Status,
    ) -> Result<Self, Error> {
        Self::with_timestamp(group, message_id, content, sender, status, Utc::now())
    }

    pub fn with_timestamp(
        group: impl Into<String>,
        message_id: impl Into<String>,
        content: impl Into<String>,
        sender: Sender,
        status: Status,
        created_at: DateTime<Utc>,
    ) -> Result<Self, Error> {
        let group = group.into();
        let message_id = message_id.into();

        if group.is_empty() {
            return Err(Error::invalid_parameter("message group must not be empty"));
        }
        if message_id.is_empty() {
            return Err(Error::invalid_parameter("message id must not be empty"));
        }

        Ok(Self {
            group,
            message_id,
            content: content.into(),
            sender,
            status,
            created_at: truncate_to_millis(created_at),
        })
    }

    pub fn key(&self) -> MessageKey {
        MessageKey {
            group: self.group.clone(),
            message_id: self.message_id.clone(),
        }
    }

    pub fn created_at_text(&self) -> String {
        self.created_at.format(TIMESTAMP_FORMAT).to_string()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.group, self.sender, self.content)
    }
}

fn truncate_to_millis(ts: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts.timestamp_millis()).unwrap_or(ts)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, Error> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::invalid_parameter(format!("created_at {text:?}: {e}")))
}

/// Row representation of a [`Message`] in the SQLite log.
#[derive(Debug, FromRow)]
pub struct MessageRow {
    pub seq: i64,
    pub group_id: String,
    pub message_id: String,
    pub content: String,
    pub sender: String,
    pub status: String,
    pub created_at: String,
}

impl TryFrom<MessageRow> for Message {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let sender = row
            .sender
            .parse::<Sender>()
            .map_err(|_| Error::invalid_parameter(format!("unknown sender {:?}", row.sender)))?;
        let status = row
            .status
            .parse::<Status>()
            .map_err(|_| Error::invalid_parameter(format!("unknown status {:?}", row.status)))?;
        let created_at = parse_timestamp(&row.created_at)?;

        Message::with_timestamp(
            row.group_id,
            row.message_id,
            row.content,
            sender,
            status,
            created_at,
        )
    }
}
