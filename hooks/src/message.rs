//! Messages, their properties, and the processing callback.

use futures::future::BoxFuture;

use std::collections::BTreeMap;

use crate::{Extensions, OperationError};

/// String-keyed headers traveling with a message.
///
/// Headers are the only message metadata that crosses process boundaries verbatim,
/// which makes them the carrier for distributed-tracing context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a header, returning the previous value if the key was present.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }

    /// Returns the header value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Iterates over header names in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Iterates over header entries in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Returns the number of headers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Checks whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Options and properties for a single publish call.
#[derive(Debug, Default)]
pub struct PublishProperties {
    /// When set, the publish targets an exchange and this is the routing key;
    /// the `queue` argument of the publish then names the exchange.
    pub routing_key: Option<String>,
    /// MIME type of the serialized payload.
    pub content_type: Option<String>,
    /// Correlation identifier joining an RPC request to its reply.
    /// Generated by the client for RPC publishes if not supplied.
    pub correlation_id: Option<String>,
    /// Reply queue for RPC publishes.
    pub reply_to: Option<String>,
    /// Application-level message identifier.
    pub message_id: Option<String>,
    /// Whether this publish expects an RPC reply.
    pub rpc: bool,
    /// Headers sent with the message.
    pub headers: Headers,
    extensions: Extensions,
}

impl PublishProperties {
    /// Creates empty publish properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the extension map scoped to this publish operation.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

/// Properties of a delivered message.
#[derive(Debug, Default)]
pub struct MessageProperties {
    /// MIME type of the message body.
    pub content_type: Option<String>,
    /// Correlation identifier joining an RPC request to its reply.
    pub correlation_id: Option<String>,
    /// Reply queue requested by the producer; presence marks an RPC request.
    pub reply_to: Option<String>,
    /// Application-level message identifier.
    pub message_id: Option<String>,
    /// Headers received with the message.
    pub headers: Headers,
    extensions: Extensions,
}

impl MessageProperties {
    /// Creates empty message properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the extension map scoped to this delivery.
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }
}

/// Routing fields of a delivery.
#[derive(Debug, Clone, Default)]
pub struct DeliveryFields {
    /// Exchange the message was published to; empty for the default exchange.
    pub exchange: String,
    /// Routing key the message was delivered with.
    pub routing_key: String,
    /// Whether the broker redelivered the message after an earlier rejection.
    pub redelivered: bool,
}

/// A message delivered to a consumer.
#[derive(Debug)]
pub struct Message {
    /// Routing fields of the delivery.
    pub fields: DeliveryFields,
    /// Properties received with the message.
    pub properties: MessageProperties,
    /// Raw serialized body.
    pub body: Vec<u8>,
}

/// Future returned by a [`ProcessCallback`].
pub type ProcessFuture = BoxFuture<'static, Result<serde_json::Value, OperationError>>;

/// Per-delivery message-processing callback.
///
/// The client wraps the subscriber's handler into one `ProcessCallback` per delivery
/// and invokes it with the deserialized content. The `Ok` value becomes the RPC reply
/// payload when the message carries a `reply_to` queue.
pub type ProcessCallback = Box<dyn FnOnce(serde_json::Value) -> ProcessFuture + Send>;
