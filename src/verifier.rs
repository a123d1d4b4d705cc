//! Order verification.
//!
//! Compares the order in which a group's messages were logged as sent with
//! the order in which they were logged as received.

use std::sync::Arc;

use itertools::{Itertools, MinMaxResult};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    log::MessageLog,
    message::{Message, Status},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    pub sent_ids: Vec<String>,
    pub received_ids: Vec<String>,
    /// Exact ordered equality of the two id sequences
    pub matches: bool,
}

pub struct Verifier<L> {
    log: Arc<L>,
}

impl<L: MessageLog> Verifier<L> {
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }

    /// Reads every entry of `group` and compares sent against received ids.
    ///
    /// Ids are taken in the order the log returns them. Nothing is
    /// deduplicated, so a record received twice shows up twice and the
    /// group no longer matches.
    pub async fn verify(&self, group: &str) -> Result<Verification, Error> {
        let entries = self.log.query_by_group(group).await?;

        let (sent, received): (Vec<&Message>, Vec<&Message>) = entries
            .iter()
            .partition(|m| m.status == Status::Sent);

        let sent_ids: Vec<String> = sent.iter().map(|m| m.message_id.clone()).collect();
        let received_ids: Vec<String> = received.iter().map(|m| m.message_id.clone()).collect();

        // Only used to report the time span; the comparison keeps log order.
        match entries.iter().map(|m| m.created_at).minmax() {
            MinMaxResult::NoElements => {}
            MinMaxResult::OneElement(at) => {
                tracing::debug!(group, %at, "Single entry in group");
            }
            MinMaxResult::MinMax(first, last) => {
                tracing::debug!(group, %first, %last, "Group time window");
            }
        }

        let matches = sent_ids == received_ids;

        tracing::info!(
            group,
            sent = sent_ids.len(),
            received = received_ids.len(),
            matches,
            "Verified group"
        );

        Ok(Verification {
            sent_ids,
            received_ids,
            matches,
        })
    }
}
