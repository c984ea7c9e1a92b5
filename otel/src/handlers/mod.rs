//! Hook handlers translating client lifecycle events into span operations.
//!
//! Each handler is a method on [`HandlerState`]; the instrumentation registers
//! thin closures over a shared state instance. Paired before / after handlers
//! communicate exclusively through the extension stashes described in
//! [`crate::correlation`], so a missing stash (e.g. when the client was
//! connected before installation) degrades to a no-op instead of an error.

mod connection;
mod consumer;
mod producer;

use opentelemetry::{
    global::{self, BoxedTracer},
    propagation::TextMapPropagator,
    Context, KeyValue,
};

use std::sync::Arc;

use crate::{
    config::Config,
    correlation::ConnectionAttributes,
    propagation::{HeaderExtractor, HeaderInjector},
};
use warren_hooks::{Connection, Headers};

/// State shared by all handlers registered by one instrumentation instance.
pub(crate) struct HandlerState {
    tracer: BoxedTracer,
    propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
    config: Arc<Config>,
}

impl HandlerState {
    pub(crate) fn new(
        tracer: BoxedTracer,
        propagator: Option<Arc<dyn TextMapPropagator + Send + Sync>>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            tracer,
            propagator,
            config,
        }
    }

    fn tracer(&self) -> &BoxedTracer {
        &self.tracer
    }

    /// Writes the trace context of `cx` into outgoing message headers.
    fn inject_context(&self, cx: &Context, headers: &mut Headers) {
        let mut injector = HeaderInjector(headers);
        if let Some(propagator) = &self.propagator {
            propagator.inject_context(cx, &mut injector);
        } else {
            global::get_text_map_propagator(|propagator| {
                propagator.inject_context(cx, &mut injector);
            });
        }
    }

    /// Reads the trace context carried by inbound message headers.
    ///
    /// Messages published by uninstrumented producers have no context headers;
    /// the propagator then yields an empty root context.
    fn extract_context(&self, headers: &Headers) -> Context {
        let extractor = HeaderExtractor(headers);
        if let Some(propagator) = &self.propagator {
            propagator.extract(&extractor)
        } else {
            global::get_text_map_propagator(|propagator| propagator.extract(&extractor))
        }
    }

    /// Returns the attribute set stashed on `connection` at connect time.
    fn connection_attributes(&self, connection: &Connection) -> Vec<KeyValue> {
        connection
            .extensions()
            .get::<ConnectionAttributes>()
            .map(|attributes| attributes.0.as_ref().clone())
            .unwrap_or_default()
    }
}

fn body_size(len: usize) -> i64 {
    i64::try_from(len).unwrap_or(i64::MAX)
}
