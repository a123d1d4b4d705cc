use std::fmt;

use snafu::Snafu;

/// A single group's failure inside a producer run.
#[derive(Debug)]
pub struct GroupFailure {
    pub group: String,
    /// Number of messages that were enqueued and logged before the failure.
    pub completed: usize,
    pub error: Error,
}

impl fmt::Display for GroupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "group {} failed after {} message(s): {}",
            self.group, self.completed, self.error
        )
    }
}

fn join_failures(failures: &[GroupFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter { message: String },

    #[snafu(display("Malformed record {record_id}: {message}"))]
    MalformedRecord { record_id: String, message: String },

    #[snafu(display("Hard failure requested for batch {record_ids:?}"))]
    HardFailure { record_ids: Vec<String> },

    #[snafu(display("Error returned from message log"))]
    Store {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    Migration {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("Queue request failed: {source}"))]
    Queue {
        #[snafu(source(false))]
        source: eyre::Report,
    },

    #[snafu(display("Error (de)serializing payload"))]
    Serde {
        #[snafu(source)]
        source: serde_json::Error,
    },

    #[snafu(display("{} group(s) failed: {}", failures.len(), join_failures(failures)))]
    GroupsFailed { failures: Vec<GroupFailure> },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(eyre::Report, Some)))]
        source: Option<eyre::Report>,
    },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Store { source }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::Migration { source }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Serde { source }
    }
}

impl From<eyre::Report> for Error {
    fn from(e: eyre::Report) -> Self {
        Self::Whatever {
            message: e.to_string(),
            source: Some(e),
        }
    }
}

impl Error {
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    pub fn malformed_record(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedRecord {
            record_id: record_id.into(),
            message: message.into(),
        }
    }

    pub fn queue(e: impl Into<eyre::Report>) -> Self {
        Self::Queue { source: e.into() }
    }

    /// Whether the error was caused by bad input rather than infrastructure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameter { .. } | Self::MalformedRecord { .. }
        )
    }
}
