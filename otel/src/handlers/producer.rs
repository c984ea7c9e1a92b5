//! Publish span handling.
//!
//! One logical send is covered by a CLIENT-kind send span plus one
//! PRODUCER-kind attempt span per network attempt. The send span stays open
//! across connection retries and ends with the final outcome; attempt spans
//! end as soon as their attempt reports back. Outgoing headers carry the
//! attempt context, so the receive span on the consumer side attaches to the
//! attempt that actually delivered the message.

use opentelemetry::{
    trace::{SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};

use super::{body_size, HandlerState};
use crate::{
    attributes::{
        DEFAULT_EXCHANGE_NAME, MESSAGING_BODY_SIZE, MESSAGING_CONVERSATION_ID,
        MESSAGING_DESTINATION_NAME, MESSAGING_MESSAGE_ID, MESSAGING_OPERATION,
        MESSAGING_RECONNECT_RETRY_NUMBER, MESSAGING_ROUTING_KEY, MESSAGING_RPC,
    },
    correlation::PublishSpans,
};
use warren_hooks::{AfterPublishEvent, PublishEvent, PublishOutcome};

impl HandlerState {
    pub(crate) fn on_before_publish(&self, event: &mut PublishEvent<'_>) {
        let (exchange, routing_key) = destination(event);
        let exchange = exchange.to_owned();
        let routing_key = routing_key.to_owned();
        let mut name = format!("{exchange} -> {routing_key} publish");
        if event.properties.rpc {
            name.push_str(" rpc");
        }

        let send_cx = match event.properties.extensions().get::<PublishSpans>() {
            Some(spans) => spans.send,
            None => self.start_send_span(name.clone(), &exchange, &routing_key, event),
        };
        if event.current_retry > 0 {
            send_cx.span().add_event(
                "publish connection retry",
                vec![KeyValue::new(
                    MESSAGING_RECONNECT_RETRY_NUMBER,
                    i64::from(event.current_retry),
                )],
            );
        }

        let attempt = self
            .tracer()
            .span_builder(format!("{name} attempt"))
            .with_kind(SpanKind::Producer)
            .with_attributes(vec![
                KeyValue::new(MESSAGING_OPERATION, "publish"),
                KeyValue::new(MESSAGING_DESTINATION_NAME, exchange),
                KeyValue::new(MESSAGING_ROUTING_KEY, routing_key),
                KeyValue::new(
                    MESSAGING_RECONNECT_RETRY_NUMBER,
                    i64::from(event.current_retry),
                ),
            ])
            .start_with_context(self.tracer(), &send_cx);
        let attempt_cx = send_cx.with_span(attempt);

        self.inject_context(&attempt_cx, &mut event.properties.headers);
        self.config.notify_publish(&attempt_cx.span(), event);
        event.properties.extensions().insert(PublishSpans {
            send: send_cx,
            attempt: Some(attempt_cx),
        });
    }

    pub(crate) fn on_after_publish(&self, event: &AfterPublishEvent<'_>) {
        let Some(spans) = event.properties.extensions().remove::<PublishSpans>() else {
            return;
        };

        if let Some(attempt_cx) = &spans.attempt {
            let attempt = attempt_cx.span();
            if let PublishOutcome::Failure { error, .. } = &event.outcome {
                attempt.record_error(error.as_ref());
            }
            attempt.end();
        }

        if let PublishOutcome::Failure {
            should_retry: true, ..
        } = &event.outcome
        {
            // The send span stays open until the final attempt reports back.
            event.properties.extensions().insert(PublishSpans {
                send: spans.send,
                attempt: None,
            });
            return;
        }

        let send = spans.send.span();
        // Span attributes append without key dedup, so the retry ordinal is
        // written once, when the final attempt reports back.
        if event.current_retry > 0 {
            send.set_attribute(KeyValue::new(
                MESSAGING_RECONNECT_RETRY_NUMBER,
                i64::from(event.current_retry),
            ));
        }
        if let PublishOutcome::Failure { .. } = &event.outcome {
            send.set_status(Status::error(format!(
                "send failed after {} connection retry attempts",
                event.current_retry
            )));
        }
        send.end();
    }

    /// Starts the CLIENT-kind span covering the whole logical send.
    fn start_send_span(
        &self,
        name: String,
        exchange: &str,
        routing_key: &str,
        event: &PublishEvent<'_>,
    ) -> Context {
        let mut attributes = self.connection_attributes(event.connection);
        attributes.extend([
            KeyValue::new(MESSAGING_OPERATION, "publish"),
            KeyValue::new(MESSAGING_DESTINATION_NAME, exchange.to_owned()),
            KeyValue::new(MESSAGING_ROUTING_KEY, routing_key.to_owned()),
            KeyValue::new(MESSAGING_RPC, event.properties.rpc),
            KeyValue::new(MESSAGING_BODY_SIZE, body_size(event.payload.len())),
        ]);
        if let Some(id) = &event.properties.message_id {
            attributes.push(KeyValue::new(MESSAGING_MESSAGE_ID, id.clone()));
        }
        if let Some(id) = &event.properties.correlation_id {
            attributes.push(KeyValue::new(MESSAGING_CONVERSATION_ID, id.clone()));
        }

        let span = self
            .tracer()
            .span_builder(name)
            .with_kind(SpanKind::Client)
            .with_attributes(attributes)
            .start(self.tracer());
        Context::current_with_span(span)
    }
}

/// Resolves the `(exchange, routing key)` pair of a publish.
///
/// Without an explicit routing key the client publishes to the default
/// exchange with the queue name as the routing key.
fn destination<'a>(event: &'a PublishEvent<'_>) -> (&'a str, &'a str) {
    match &event.properties.routing_key {
        Some(routing_key) => (event.queue, routing_key.as_str()),
        None => (DEFAULT_EXCHANGE_NAME, event.queue),
    }
}
