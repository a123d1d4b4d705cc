//! Invocation payloads.
//!
//! The batch event and batch response follow the JSON shape a queue event
//! source delivers to a batch consumer, so captured events can be replayed
//! through `ordercheck consume` unchanged.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::Error;

pub const SENDER_ATTRIBUTE: &str = "Sender";
pub const RECEIVE_COUNT_ATTRIBUTE: &str = "ApproximateReceiveCount";
pub const GROUP_ID_ATTRIBUTE: &str = "MessageGroupId";

/// A queue record as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub id: String,
    pub receipt_handle: String,
    pub group_key: String,
    /// Deliveries so far, including the current one
    pub receive_count: u32,
    pub body: String,
    /// String-valued message attributes
    pub attributes: HashMap<String, String>,
}

impl QueueRecord {
    pub fn attribute(&self, name: &str) -> Result<&str, Error> {
        self.attributes
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::malformed_record(&self.id, format!("missing attribute {name}")))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageAttributeValue {
    #[serde(default)]
    pub string_value: Option<String>,
    #[serde(default)]
    pub data_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SqsEventRecord {
    pub message_id: String,
    #[serde(default)]
    pub receipt_handle: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub message_attributes: HashMap<String, MessageAttributeValue>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SqsEvent {
    #[serde(rename = "Records")]
    pub records: Vec<SqsEventRecord>,
}

impl TryFrom<SqsEventRecord> for QueueRecord {
    type Error = Error;

    fn try_from(record: SqsEventRecord) -> Result<Self, Self::Error> {
        let id = record.message_id;

        let group_key = record
            .attributes
            .get(GROUP_ID_ATTRIBUTE)
            .filter(|group| !group.is_empty())
            .cloned()
            .ok_or_else(|| Error::malformed_record(&id, "missing MessageGroupId"))?;

        let receive_count = record
            .attributes
            .get(RECEIVE_COUNT_ATTRIBUTE)
            .ok_or_else(|| Error::malformed_record(&id, "missing ApproximateReceiveCount"))?
            .parse::<u32>()
            .map_err(|e| Error::malformed_record(&id, format!("ApproximateReceiveCount: {e}")))?;

        let attributes = record
            .message_attributes
            .into_iter()
            .filter_map(|(name, value)| value.string_value.map(|v| (name, v)))
            .collect();

        Ok(Self {
            id,
            receipt_handle: record.receipt_handle,
            group_key,
            receive_count,
            body: record.body,
            attributes,
        })
    }
}

impl SqsEvent {
    pub fn into_records(self) -> Result<Vec<QueueRecord>, Error> {
        self.records.into_iter().map(QueueRecord::try_from).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemFailure {
    pub item_identifier: String,
}

/// Partial batch acknowledgment: only the failed records are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub batch_item_failures: Vec<BatchItemFailure>,
}

impl FromIterator<String> for BatchResponse {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            batch_item_failures: iter
                .into_iter()
                .map(|item_identifier| BatchItemFailure { item_identifier })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    #[serde(alias = "MessageCountByRoom")]
    pub per_group_count: i64,
    #[serde(alias = "ChatRoomIds")]
    pub groups: Vec<String>,
}

pub type SendResponse = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(alias = "ChatRoomId")]
    pub group: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENT: &str = r#"{
        "Records": [
            {
                "messageId": "m-1",
                "receiptHandle": "AQEB-1",
                "body": "0: 3xyz",
                "attributes": {
                    "ApproximateReceiveCount": "2",
                    "MessageGroupId": "room-a",
                    "SentTimestamp": "1700000000000"
                },
                "messageAttributes": {
                    "Sender": { "stringValue": "USER", "dataType": "String" }
                },
                "eventSource": "aws:sqs"
            }
        ]
    }"#;

    #[test]
    fn test_parse_batch_event() {
        let event: SqsEvent = serde_json::from_str(EVENT).unwrap();
        let records = event.into_records().unwrap();

        assert_eq!(
            records,
            vec![QueueRecord {
                id: "m-1".to_owned(),
                receipt_handle: "AQEB-1".to_owned(),
                group_key: "room-a".to_owned(),
                receive_count: 2,
                body: "0: 3xyz".to_owned(),
                attributes: HashMap::from([("Sender".to_owned(), "USER".to_owned())]),
            }]
        );
    }

    #[test]
    fn test_record_without_group_is_malformed() {
        let record = SqsEventRecord {
            message_id: "m-1".to_owned(),
            receipt_handle: String::new(),
            body: String::new(),
            attributes: HashMap::from([(RECEIVE_COUNT_ATTRIBUTE.to_owned(), "1".to_owned())]),
            message_attributes: HashMap::new(),
        };

        assert!(matches!(
            QueueRecord::try_from(record),
            Err(Error::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_record_with_bad_receive_count_is_malformed() {
        let record = SqsEventRecord {
            message_id: "m-1".to_owned(),
            receipt_handle: String::new(),
            body: String::new(),
            attributes: HashMap::from([
                (RECEIVE_COUNT_ATTRIBUTE.to_owned(), "three".to_owned()),
                (GROUP_ID_ATTRIBUTE.to_owned(), "room".to_owned()),
            ]),
            message_attributes: HashMap::new(),
        };

        assert!(matches!(
            QueueRecord::try_from(record),
            Err(Error::MalformedRecord { .. })
        ));
    }

    #[test]
    fn test_batch_response_shape() {
        let response: BatchResponse = vec!["m-2".to_owned(), "m-4".to_owned()]
            .into_iter()
            .collect();

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({
                "batchItemFailures": [
                    { "itemIdentifier": "m-2" },
                    { "itemIdentifier": "m-4" }
                ]
            })
        );
    }

    #[test]
    fn test_requests_accept_legacy_names() {
        let send: SendRequest =
            serde_json::from_str(r#"{"MessageCountByRoom": 3, "ChatRoomIds": ["a", "b"]}"#)
                .unwrap();
        assert_eq!(send.per_group_count, 3);
        assert_eq!(send.groups, vec!["a", "b"]);

        let verify: VerifyRequest = serde_json::from_str(r#"{"ChatRoomId": "a"}"#).unwrap();
        assert_eq!(verify.group, "a");
    }
}
