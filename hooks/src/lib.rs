//! Lifecycle hooks of the warren AMQP client.
//!
//! This crate defines the hook contract between the client and pluggable observers
//! such as tracing instrumentation:
//!
//! - [`Hooks`] is the registry the client carries; observers register closures on it
//!   and the client emits events at the corresponding lifecycle points.
//! - Event payloads ([`ConnectEvent`], [`PublishEvent`], [`ConsumeEvent`], ...) expose
//!   the client state at each point. Before-events are mutable, which lets observers
//!   amend outgoing [message headers](Headers) or [wrap the processing
//!   callback](ConsumeAction::map_callback); after-events additionally carry the
//!   operation outcome.
//! - [`Extensions`] is a typemap available on connections and message properties,
//!   letting observers correlate a before-event with the matching after-event without
//!   keeping state of their own keyed by client objects.
//!
//! # Hook points
//!
//! | Registry | Before | After |
//! |----------|--------|-------|
//! | [`Hooks::connection`] | each connect attempt | connect succeeded or failed |
//! | [`Hooks::producer`] | each publish attempt | attempt succeeded or failed |
//! | [`Hooks::consumer`] | processing a delivery | delivery acked or rejected |
//! | [`Hooks::consumer`] | publishing an RPC reply | reply publish finished |
//!
//! For one consumed delivery the consumer emits in a fixed order: before-process,
//! then (for RPC requests whose callback succeeded) before-rpc-reply and
//! after-rpc-reply, then after-process once the delivery was acked or rejected.
//! Publish hooks fire once per network attempt; a send that is retried after
//! connection errors emits several before/after pairs with increasing
//! [`PublishEvent::current_retry`].
//!
//! # Examples
//!
//! ```
//! use warren_hooks::{ConnectConfig, Hooks};
//! use std::sync::{Arc, Mutex};
//!
//! let mut hooks = Hooks::new();
//! // Record the URI of every connect attempt.
//! let attempts = Arc::new(Mutex::new(vec![]));
//! let sink = Arc::clone(&attempts);
//! hooks.connection.on_before_connect(move |config| {
//!     sink.lock().unwrap().push(config.uri.clone());
//! });
//! // Tag outgoing messages with the attempt number.
//! hooks.producer.on_before_publish(|event| {
//!     let attempt = event.current_retry.to_string();
//!     event.properties.headers.insert("x-attempt", attempt);
//! });
//!
//! // The client side emits events at the corresponding lifecycle points.
//! let config = ConnectConfig::default();
//! hooks.connection.emit_before_connect(&config);
//! assert_eq!(*attempts.lock().unwrap(), [config.uri]);
//! ```

// Documentation settings.
#![doc(html_root_url = "https://docs.rs/warren-hooks/0.1.0")]
// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

mod connection;
mod events;
mod extensions;
mod message;
mod registry;

pub use crate::{
    connection::{ConnectConfig, Connection, ServerProperties},
    events::{
        AfterConsumeEvent, AfterPublishEvent, AfterRpcReplyEvent, ConnectEvent, ConnectOutcome,
        ConsumeAction, ConsumeEvent, OperationError, PublishEvent, PublishOutcome, RpcReplyEvent,
        RpcReplyOutcome,
    },
    extensions::Extensions,
    message::{
        DeliveryFields, Headers, Message, MessageProperties, ProcessCallback, ProcessFuture,
        PublishProperties,
    },
    registry::{ConnectionHooks, ConsumerHooks, Hooks, ProducerHooks},
};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
