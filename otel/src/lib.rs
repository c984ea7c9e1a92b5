//! OpenTelemetry trace instrumentation for the warren AMQP client.
//!
//! Installing [`WarrenInstrumentation`] on the client's hook registry creates
//! a span for every messaging operation and correlates them across process
//! boundaries:
//!
//! - Publishing a message records a CLIENT-kind *send* span covering the whole
//!   logical send, plus a PRODUCER-kind *attempt* span per network attempt.
//!   Connection retries stay inside the one send span instead of producing
//!   unrelated span trees.
//! - Consuming a message records a CONSUMER-kind *receive* span, parented to
//!   the trace context carried by the message headers. The consume callback
//!   runs with the receive span active.
//! - Replying to an RPC request records a PRODUCER-kind *reply* span as a
//!   child of the receive span; the requester picks up the receive context
//!   from the reply headers.
//!
//! Span attributes follow the [OpenTelemetry messaging conventions] for
//! RabbitMQ. Trace context travels through message headers using the
//! globally installed [text map propagator], or one supplied via
//! [`WarrenInstrumentation::with_propagator()`].
//!
//! The instrumentation never disturbs the client: a panic in a handler or in
//! a configured customization hook is caught and logged.
//!
//! [OpenTelemetry messaging conventions]: https://opentelemetry.io/docs/specs/semconv/messaging/rabbitmq/
//! [text map propagator]: opentelemetry::propagation::TextMapPropagator
//!
//! # Examples
//!
//! ```
//! use opentelemetry::KeyValue;
//! use warren_hooks::Hooks;
//! use warren_otel::{Config, WarrenInstrumentation};
//!
//! // Attach an app-specific attribute to every publish attempt span.
//! let config = Config::new().with_publish_hook(|span, event| {
//!     span.set_attribute(KeyValue::new("app.queue", event.queue.to_owned()));
//! });
//! let instrumentation = WarrenInstrumentation::new(config);
//!
//! let mut hooks = Hooks::new();
//! instrumentation.install(&mut hooks)?;
//! // Hand `hooks` to the client; connects, publishes and deliveries
//! // now produce correlated spans.
//! # Ok::<_, warren_otel::InstallError>(())
//! ```

// Documentation settings.
#![doc(html_root_url = "https://docs.rs/warren-otel/0.1.0")]
// Linter settings.
#![warn(missing_debug_implementations, missing_docs, bare_trait_objects)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::module_name_repetitions)]

pub mod attributes;
mod config;
mod correlation;
mod handlers;
mod instrumentation;
mod propagation;

pub use crate::{
    config::Config,
    instrumentation::{InstallError, WarrenInstrumentation},
    propagation::{HeaderExtractor, HeaderInjector},
};

#[cfg(doctest)]
doc_comment::doctest!("../README.md");
