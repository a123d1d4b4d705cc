//! Amazon SQS (or any SQS-compatible endpoint) implementation of
//! [`MessageQueue`].

use std::time::Duration;

use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::types::{
    Message as SdkMessage, MessageAttributeValue as SdkAttributeValue, MessageSystemAttributeName,
};

use crate::{
    config::Config,
    error::Error,
    event::{MessageAttributeValue, QueueRecord, SqsEventRecord, SENDER_ATTRIBUTE},
    log::BoxFuture,
};

use super::{MessageQueue, OutgoingMessage};

/// Longest visibility timeout SQS accepts, in seconds.
const MAX_VISIBILITY_TIMEOUT: u64 = 43_200;

/// A single FIFO queue reached through the AWS SDK.
#[derive(Clone, Debug)]
pub struct SqsQueue {
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn new(client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    /// Builds a client from the ambient AWS configuration, applying the
    /// region and endpoint overrides from `config`.
    pub async fn from_config(config: &Config) -> eyre::Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_sqs::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint.as_str());
        }

        let client = aws_sdk_sqs::Client::from_conf(builder.build());

        Ok(Self::new(client, config.queue_url()?.as_str()))
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }

    /// Long-polls for up to `max_messages` records.
    pub async fn receive(
        &self,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<QueueRecord>, Error> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages)
            .wait_time_seconds(wait_time_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_system_attribute_names(MessageSystemAttributeName::MessageGroupId)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(Error::queue)?;

        output
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|message| QueueRecord::try_from(into_event_record(message)))
            .collect()
    }

    pub async fn delete(&self, receipt_handle: &str) -> Result<(), Error> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(Error::queue)?;

        Ok(())
    }
}

fn into_event_record(message: SdkMessage) -> SqsEventRecord {
    SqsEventRecord {
        message_id: message.message_id.unwrap_or_default(),
        receipt_handle: message.receipt_handle.unwrap_or_default(),
        body: message.body.unwrap_or_default(),
        attributes: message
            .attributes
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name.as_str().to_owned(), value))
            .collect(),
        message_attributes: message
            .message_attributes
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| {
                (
                    name,
                    MessageAttributeValue {
                        string_value: value.string_value,
                        data_type: value.data_type,
                    },
                )
            })
            .collect(),
    }
}

fn body_digest(body: &str) -> String {
    hex::encode(md5::compute(body).as_ref())
}

impl MessageQueue for SqsQueue {
    fn send<'a>(&'a self, message: &'a OutgoingMessage) -> BoxFuture<'a, Result<String, Error>> {
        Box::pin(async move {
            let sender = SdkAttributeValue::builder()
                .data_type("String")
                .string_value(message.sender.to_string())
                .build()
                .map_err(Error::queue)?;

            let output = self
                .client
                .send_message()
                .queue_url(&self.queue_url)
                .message_body(&message.body)
                .message_group_id(&message.group)
                .message_deduplication_id(&message.deduplication_id)
                .message_attributes(SENDER_ATTRIBUTE, sender)
                .send()
                .await
                .map_err(Error::queue)?;

            if let Some(digest) = output.md5_of_message_body() {
                let expected = body_digest(&message.body);
                if digest != expected {
                    return Err(Error::queue(eyre::eyre!(
                        "MD5 of message body mismatch: expected {expected}, got {digest}"
                    )));
                }
            }

            output
                .message_id
                .ok_or_else(|| Error::queue(eyre::eyre!("No message id in SendMessage response")))
        })
    }

    fn change_visibility<'a>(
        &'a self,
        receipt_handle: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.client
                .change_message_visibility()
                .queue_url(&self.queue_url)
                .receipt_handle(receipt_handle)
                .visibility_timeout(timeout.as_secs().min(MAX_VISIBILITY_TIMEOUT) as i32)
                .send()
                .await
                .map_err(Error::queue)?;

            Ok(())
        })
    }
}
