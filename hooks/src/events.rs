//! Payloads delivered to hook handlers.
//!
//! Before-hooks receive mutable payloads so that handlers can amend outgoing
//! metadata (e.g., inject tracing headers) or replace the processing callback;
//! after-hooks receive the same data read-only together with the operation outcome.
//! Handlers must tolerate every optional field being absent.

use std::{error, fmt, sync::Arc};

use crate::{
    ConnectConfig, Connection, Message, MessageProperties, ProcessCallback, PublishProperties,
};

/// Error of a client operation, as surfaced through after-hook payloads.
///
/// Shared so that the same error can be observed by any number of handlers and
/// re-exposed to the caller unchanged.
pub type OperationError = Arc<dyn error::Error + Send + Sync>;

/// Payload of the after-connect hook.
#[derive(Debug)]
pub struct ConnectEvent<'a> {
    /// Configuration the connect was attempted with.
    pub config: &'a ConnectConfig,
    /// Outcome of the connect attempt.
    pub outcome: ConnectOutcome<'a>,
}

/// Outcome of a connect attempt.
#[derive(Debug)]
pub enum ConnectOutcome<'a> {
    /// The connection was established.
    Connected {
        /// The live connection.
        connection: &'a Connection,
    },
    /// The connect attempt failed.
    Failed {
        /// The connect error.
        error: &'a OperationError,
    },
}

/// Payload of the before-publish hook, invoked once per network attempt.
#[derive(Debug)]
pub struct PublishEvent<'a> {
    /// Connection the publish goes out on.
    pub connection: &'a Connection,
    /// Queue to publish to, or the exchange when
    /// [`routing_key`](PublishProperties::routing_key) is set.
    pub queue: &'a str,
    /// The message value before serialization.
    pub message: &'a serde_json::Value,
    /// The serialized message bytes as they go on the wire.
    pub payload: &'a [u8],
    /// Publish properties; mutable so handlers can amend outgoing headers.
    pub properties: &'a mut PublishProperties,
    /// Retry ordinal of this attempt, starting at 0.
    pub current_retry: u32,
}

/// Payload of the after-publish hook, invoked once per network attempt.
#[derive(Debug)]
pub struct AfterPublishEvent<'a> {
    /// Connection the publish went out on.
    pub connection: &'a Connection,
    /// Queue (or exchange) the publish targeted.
    pub queue: &'a str,
    /// The message value before serialization.
    pub message: &'a serde_json::Value,
    /// The serialized message bytes.
    pub payload: &'a [u8],
    /// Publish properties as sent.
    pub properties: &'a PublishProperties,
    /// Retry ordinal of the attempt that just finished, starting at 0.
    pub current_retry: u32,
    /// Outcome of the attempt.
    pub outcome: PublishOutcome<'a>,
}

/// Outcome of one publish attempt.
#[derive(Debug)]
pub enum PublishOutcome<'a> {
    /// The attempt succeeded; the logical send is complete.
    Success,
    /// The attempt failed.
    Failure {
        /// The publish error.
        error: &'a OperationError,
        /// Whether the client will retry the send.
        should_retry: bool,
    },
}

/// Payload of the before-process hook, invoked once per delivery.
#[derive(Debug)]
pub struct ConsumeEvent<'a> {
    /// Connection the message arrived on.
    pub connection: &'a Connection,
    /// Queue the message was consumed from.
    pub queue: &'a str,
    /// The pending processing action.
    pub action: ConsumeAction<'a>,
}

/// The processing action of one delivery: the message, its deserialized content,
/// and the callback about to be invoked with it.
pub struct ConsumeAction<'a> {
    /// The delivered message.
    pub message: &'a Message,
    /// Deserialized message content; [`serde_json::Value::Null`] when the body
    /// could not be interpreted.
    pub content: &'a serde_json::Value,
    callback: &'a mut Option<ProcessCallback>,
}

impl<'a> ConsumeAction<'a> {
    /// Creates the action for one delivery.
    ///
    /// `callback` must hold the callback the client is about to invoke; handlers may
    /// replace it via [`map_callback`](Self::map_callback).
    pub fn new(
        message: &'a Message,
        content: &'a serde_json::Value,
        callback: &'a mut Option<ProcessCallback>,
    ) -> Self {
        Self {
            message,
            content,
            callback,
        }
    }

    /// Replaces the processing callback with a wrapped version of itself.
    ///
    /// This is the seam instrumentation uses to run the callback inside a tracing
    /// context. No-op if the callback was already taken.
    pub fn map_callback(&mut self, wrap: impl FnOnce(ProcessCallback) -> ProcessCallback) {
        if let Some(original) = self.callback.take() {
            *self.callback = Some(wrap(original));
        }
    }
}

impl fmt::Debug for ConsumeAction<'_> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ConsumeAction")
            .field("message", &self.message)
            .field("callback_present", &self.callback.is_some())
            .finish_non_exhaustive()
    }
}

/// Payload of the after-process hook, invoked after the callback and the
/// acknowledge/reject action have run.
#[derive(Debug)]
pub struct AfterConsumeEvent<'a> {
    /// Connection the message arrived on.
    pub connection: &'a Connection,
    /// Queue the message was consumed from.
    pub queue: &'a str,
    /// The delivered message.
    pub message: &'a Message,
    /// Deserialized message content.
    pub content: &'a serde_json::Value,
    /// Error raised by the processing callback, if any.
    pub error: Option<&'a OperationError>,
    /// Error of the reject that followed a processing error, if any.
    /// Only ever set together with [`error`](Self::error).
    pub reject_error: Option<&'a OperationError>,
    /// Error of the acknowledge after successful processing, if any.
    /// Never set together with [`error`](Self::error).
    pub ack_error: Option<&'a OperationError>,
}

/// Payload of the before-rpc-reply hook, invoked when a consumed message requested
/// a reply and the callback produced one.
#[derive(Debug)]
pub struct RpcReplyEvent<'a> {
    /// Connection the reply goes out on.
    pub connection: &'a Connection,
    /// Queue the original message was consumed from.
    pub queue: &'a str,
    /// Properties of the message being replied to.
    pub receive_properties: &'a MessageProperties,
    /// Properties of the reply; mutable so handlers can amend outgoing headers.
    pub reply_properties: &'a mut PublishProperties,
    /// The reply value before serialization.
    pub reply: &'a serde_json::Value,
    /// The serialized reply bytes.
    pub serialized_reply: &'a [u8],
}

/// Payload of the after-rpc-reply hook.
#[derive(Debug)]
pub struct AfterRpcReplyEvent<'a> {
    /// Connection the reply went out on.
    pub connection: &'a Connection,
    /// Queue the original message was consumed from.
    pub queue: &'a str,
    /// Properties of the message that was replied to.
    pub receive_properties: &'a MessageProperties,
    /// Properties the reply was sent with.
    pub reply_properties: &'a PublishProperties,
    /// The reply value before serialization.
    pub reply: &'a serde_json::Value,
    /// The serialized reply bytes.
    pub serialized_reply: &'a [u8],
    /// Outcome of the reply publish.
    pub outcome: RpcReplyOutcome<'a>,
}

/// Outcome of an RPC reply publish.
#[derive(Debug)]
pub enum RpcReplyOutcome<'a> {
    /// The reply was handed to the channel.
    Completed {
        /// Whether the channel accepted the write immediately.
        written: bool,
    },
    /// Publishing the reply failed.
    Failed {
        /// The publish error.
        error: &'a OperationError,
    },
}
