//! Message envelopes
//!
//! A [`TransportMessage`] is what travels through queues: string headers and
//! an opaque body. A [`Message`] is the same envelope after the body has been
//! parsed as JSON.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Header names
pub mod headers {
    /// Unique id of the message
    pub const MESSAGE_ID: &str = "rbs-msg-id";
    /// Type name used to pick handlers
    pub const MESSAGE_TYPE: &str = "rbs-msg-type";
    /// RFC 3339 time the message was sent
    pub const SENT_TIME: &str = "rbs-sent-time";
    /// Accumulated error details of failed deliveries
    pub const ERROR_DETAILS: &str = "rbs-error-details";
    /// Queue the message was received from before being forwarded
    pub const SOURCE_QUEUE: &str = "rbs-source-queue";
}

/// Header map
pub type Headers = BTreeMap<String, String>;

/// Message as carried by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    /// Headers
    pub headers: Headers,
    /// Serialized body
    pub body: Vec<u8>,
}

impl TransportMessage {
    /// Create a message from headers and body
    pub fn new(headers: Headers, body: Vec<u8>) -> Self {
        TransportMessage { headers, body }
    }

    /// Value of the message id header
    pub fn message_id(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_ID).map(String::as_str)
    }

    /// Value of the message type header
    pub fn message_type(&self) -> Option<&str> {
        self.headers.get(headers::MESSAGE_TYPE).map(String::as_str)
    }
}

/// Deserialized message
#[derive(Debug, Clone)]
pub struct Message {
    /// Headers copied from the transport message
    pub headers: Headers,
    /// Type name from the type header
    pub message_type: String,
    /// Parsed JSON body
    pub body: serde_json::Value,
}

impl Message {
    /// Decode the body as `M`
    pub fn decode<M: DeserializeOwned>(&self) -> Result<M, serde_json::Error> {
        serde_json::from_value(self.body.clone())
    }
}

/// Type name a message of type `M` is sent under
pub fn type_name_of<M>() -> &'static str {
    std::any::type_name::<M>()
}

/// Serialize `message` into a transport message with fresh id and sent time
pub fn serialize<M: Serialize>(
    message: &M,
    mut extra: Headers,
) -> Result<TransportMessage, serde_json::Error> {
    let body = serde_json::to_vec(message)?;
    extra
        .entry(headers::MESSAGE_ID.to_string())
        .or_insert_with(|| Uuid::new_v4().to_string());
    extra.insert(headers::MESSAGE_TYPE.to_string(), type_name_of::<M>().to_string());
    extra.insert(headers::SENT_TIME.to_string(), Utc::now().to_rfc3339());
    Ok(TransportMessage::new(extra, body))
}

/// Parse a transport message body as JSON
pub fn deserialize(message: &TransportMessage) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::from_slice(&message.body)
}

/// A message whose delivery failed too many times
///
/// Handlers registered with
/// [`HandlerActivator::handle_failed`](crate::HandlerActivator::handle_failed)
/// receive this when second-level retries are enabled.
#[derive(Debug, Clone)]
pub struct Failed<M> {
    /// The original message
    pub message: M,
    /// Error details of every failed delivery, oldest first
    pub error_details: String,
    /// Headers of the original message
    pub headers: Headers,
}
