//! Simulated consumer failure behaviour.
//!
//! A [`FailurePolicy`] decides, per queue record, whether the consumer
//! acknowledges it, asks for it to be redelivered, or drops it. It is chosen
//! once when the consumer is built.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{error::Error, event::QueueRecord};

/// What the consumer does with a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Processed: write a RECEIVED entry, let the queue delete the record
    Ack,
    /// Report as failed so the queue redelivers it
    Retry,
    /// Treat as processed without writing anything
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FailurePolicy {
    #[default]
    AlwaysSucceed,
    /// Fail the whole invocation before touching any record
    HardFailure,
    /// Acknowledge even positions, retry odd positions
    PartialFailure,
    /// Drop a record on exactly its `K`th delivery, retry it otherwise
    DropAfterAttempts(u32),
    /// Retry everything; the queue's redrive policy moves records to the
    /// dead-letter queue after `K` deliveries
    DlqAfterAttempts(u32),
    /// Retry everything and reset each record's visibility timeout to zero
    ImmediateRedeliver,
}

impl FailurePolicy {
    /// Outcome for the record at `position` within its batch.
    ///
    /// [`FailurePolicy::HardFailure`] never reaches a per-record decision;
    /// it is reported here as a retry.
    pub fn outcome(&self, position: usize, record: &QueueRecord) -> Outcome {
        match *self {
            Self::AlwaysSucceed => Outcome::Ack,
            Self::PartialFailure if position % 2 == 0 => Outcome::Ack,
            Self::DropAfterAttempts(k) if record.receive_count == k => Outcome::Drop,
            Self::HardFailure
            | Self::PartialFailure
            | Self::DropAfterAttempts(_)
            | Self::DlqAfterAttempts(_)
            | Self::ImmediateRedeliver => Outcome::Retry,
        }
    }

    /// Whether retried records get their visibility timeout reset.
    pub fn resets_visibility(&self) -> bool {
        matches!(self, Self::ImmediateRedeliver)
    }
}

fn parse_attempts(name: &str, prefix: &str) -> Option<Result<u32, Error>> {
    let count = name.strip_prefix(prefix)?.strip_suffix("_ATTEMPTS")?;

    Some(match count.parse::<u32>() {
        Ok(0) | Err(_) => Err(Error::invalid_parameter(format!(
            "attempt count in {name:?} must be a positive integer"
        ))),
        Ok(k) => Ok(k),
    })
}

impl FromStr for FailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_uppercase();

        match name.as_str() {
            "ALWAYS_SUCCEED" => return Ok(Self::AlwaysSucceed),
            "HARD_FAILURE" | "THROW" => return Ok(Self::HardFailure),
            "PARTIAL_FAILURE" => return Ok(Self::PartialFailure),
            "IMMEDIATE_REDELIVER" | "IMMEDIATE_REPROCESSING" => {
                return Ok(Self::ImmediateRedeliver)
            }
            _ => {}
        }

        if let Some(k) = parse_attempts(&name, "DROP_AFTER_") {
            return k.map(Self::DropAfterAttempts);
        }
        if let Some(k) = parse_attempts(&name, "DLQ_AFTER_") {
            return k.map(Self::DlqAfterAttempts);
        }

        Err(Error::invalid_parameter(format!(
            "unknown failure policy {s:?}"
        )))
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlwaysSucceed => f.write_str("ALWAYS_SUCCEED"),
            Self::HardFailure => f.write_str("HARD_FAILURE"),
            Self::PartialFailure => f.write_str("PARTIAL_FAILURE"),
            Self::DropAfterAttempts(k) => write!(f, "DROP_AFTER_{k}_ATTEMPTS"),
            Self::DlqAfterAttempts(k) => write!(f, "DLQ_AFTER_{k}_ATTEMPTS"),
            Self::ImmediateRedeliver => f.write_str("IMMEDIATE_REDELIVER"),
        }
    }
}

impl TryFrom<String> for FailurePolicy {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FailurePolicy> for String {
    fn from(policy: FailurePolicy) -> Self {
        policy.to_string()
    }
}
