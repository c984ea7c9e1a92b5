//! Span state stashed on client objects between paired hooks.
//!
//! Each type below lives in the [`Extensions`](warren_hooks::Extensions) typemap
//! of the client object whose lifetime matches the span: connection-level
//! attributes on the connection, publish spans on the outgoing message
//! properties, receive and reply contexts on the properties of the message
//! being processed. The client object itself is the correlation key, so
//! concurrent operations cannot observe each other's spans.

use opentelemetry::{Context, KeyValue};

use std::sync::Arc;

/// Attribute set computed once per connection and shared by every span on it.
#[derive(Clone)]
pub(crate) struct ConnectionAttributes(pub(crate) Arc<Vec<KeyValue>>);

/// Spans of one logical send.
///
/// The send span stays open across connection retries; the attempt span covers
/// a single network attempt and is absent between a failed attempt and the next
/// before-publish hook.
#[derive(Clone)]
pub(crate) struct PublishSpans {
    pub(crate) send: Context,
    pub(crate) attempt: Option<Context>,
}

/// Context of the receive span of the delivery being processed.
#[derive(Clone)]
pub(crate) struct ReceiveContext(pub(crate) Context);

/// Context of the span of an in-flight RPC reply publish.
#[derive(Clone)]
pub(crate) struct RpcReplyContext(pub(crate) Context);
