//! Receive and RPC reply span handling.

use opentelemetry::{
    trace::{FutureExt, SpanKind, Status, TraceContextExt, Tracer},
    Context, KeyValue,
};

use super::{body_size, HandlerState};
use crate::{
    attributes::{
        DEFAULT_EXCHANGE_NAME, MESSAGING_BODY_SIZE, MESSAGING_CONVERSATION_ID,
        MESSAGING_DESTINATION_NAME, MESSAGING_DESTINATION_TEMPORARY, MESSAGING_MESSAGE_ID,
        MESSAGING_OPERATION, MESSAGING_ROUTING_KEY, MESSAGING_RPC, RPC_REPLY_DESTINATION_NAME,
    },
    correlation::{ReceiveContext, RpcReplyContext},
};
use warren_hooks::{
    AfterConsumeEvent, AfterRpcReplyEvent, ConsumeEvent, ProcessFuture, RpcReplyEvent,
    RpcReplyOutcome,
};

impl HandlerState {
    pub(crate) fn on_before_process(&self, event: &mut ConsumeEvent<'_>) {
        let message = event.action.message;
        let properties = &message.properties;
        let parent_cx = self.extract_context(&properties.headers);

        let exchange = if message.fields.exchange.is_empty() {
            DEFAULT_EXCHANGE_NAME.to_owned()
        } else {
            message.fields.exchange.clone()
        };
        let mut attributes = self.connection_attributes(event.connection);
        attributes.extend([
            KeyValue::new(MESSAGING_OPERATION, "receive"),
            KeyValue::new(MESSAGING_DESTINATION_NAME, exchange),
            KeyValue::new(MESSAGING_ROUTING_KEY, event.queue.to_owned()),
            KeyValue::new(MESSAGING_BODY_SIZE, body_size(message.body.len())),
            KeyValue::new(MESSAGING_RPC, properties.reply_to.is_some()),
        ]);
        if let Some(id) = &properties.message_id {
            attributes.push(KeyValue::new(MESSAGING_MESSAGE_ID, id.clone()));
        }
        if let Some(id) = &properties.correlation_id {
            attributes.push(KeyValue::new(MESSAGING_CONVERSATION_ID, id.clone()));
        }

        let span = self
            .tracer()
            .span_builder(format!("{} receive", event.queue))
            .with_kind(SpanKind::Consumer)
            .with_attributes(attributes)
            .start_with_context(self.tracer(), &parent_cx);
        let cx = parent_cx.with_span(span);

        self.config.notify_consume(&cx.span(), event);
        properties.extensions().insert(ReceiveContext(cx.clone()));
        // The user callback runs with the receive span active, so spans it
        // starts become children of the receive span.
        event.action.map_callback(move |callback| {
            Box::new(move |content| -> ProcessFuture {
                Box::pin(callback(content).with_context(cx))
            })
        });
    }

    pub(crate) fn on_after_process(&self, event: &AfterConsumeEvent<'_>) {
        let Some(ReceiveContext(cx)) = event.message.properties.extensions().remove() else {
            return;
        };
        let span = cx.span();

        // The client rejects only after a processing error and acks only
        // without one, so `reject_error` and `ack_error` cannot both be set.
        if let Some(error) = event.error {
            span.record_error(error.as_ref());
            // `set_status` keeps the greater of the old and new status, so
            // the winning message is computed first and set exactly once.
            let status = if let Some(reject_error) = event.reject_error {
                span.record_error(reject_error.as_ref());
                Status::error(format!(
                    "consumed message failed to reject after failing to process: {reject_error}"
                ))
            } else {
                Status::error(format!("consumed message processing failed: {error}"))
            };
            span.set_status(status);
        } else if let Some(ack_error) = event.ack_error {
            span.record_error(ack_error.as_ref());
            span.set_status(Status::error(format!(
                "consumed message failed ack after processing: {ack_error}"
            )));
        }
        span.end();
    }

    pub(crate) fn on_before_rpc_reply(&self, event: &mut RpcReplyEvent<'_>) {
        let receive_properties = event.receive_properties;
        let parent_cx = receive_properties
            .extensions()
            .get::<ReceiveContext>()
            .map_or_else(Context::current, |receive| receive.0);

        let mut attributes = self.connection_attributes(event.connection);
        attributes.extend([
            KeyValue::new(MESSAGING_OPERATION, "publish"),
            KeyValue::new(MESSAGING_DESTINATION_NAME, DEFAULT_EXCHANGE_NAME),
            KeyValue::new(MESSAGING_DESTINATION_TEMPORARY, true),
            KeyValue::new(MESSAGING_RPC, true),
            KeyValue::new(
                MESSAGING_BODY_SIZE,
                body_size(event.serialized_reply.len()),
            ),
        ]);
        if let Some(reply_to) = &receive_properties.reply_to {
            attributes.push(KeyValue::new(MESSAGING_ROUTING_KEY, reply_to.clone()));
        }
        if let Some(id) = &receive_properties.correlation_id {
            attributes.push(KeyValue::new(MESSAGING_CONVERSATION_ID, id.clone()));
        }

        let span = self
            .tracer()
            .span_builder(format!(
                "{} -> {RPC_REPLY_DESTINATION_NAME} publish",
                event.queue
            ))
            .with_kind(SpanKind::Producer)
            .with_attributes(attributes)
            .start_with_context(self.tracer(), &parent_cx);
        let cx = parent_cx.with_span(span);

        // Reply headers carry the receive context: the requester correlates
        // the reply with its own send, not with this publish.
        self.inject_context(&parent_cx, &mut event.reply_properties.headers);
        self.config.notify_rpc_reply(&cx.span(), event);
        receive_properties.extensions().insert(RpcReplyContext(cx));
    }

    pub(crate) fn on_after_rpc_reply(&self, event: &AfterRpcReplyEvent<'_>) {
        let Some(RpcReplyContext(cx)) = event.receive_properties.extensions().remove() else {
            return;
        };
        let span = cx.span();
        if let RpcReplyOutcome::Failed { error } = &event.outcome {
            span.record_error(error.as_ref());
            span.set_status(Status::error(format!("rpc reply failed: {error}")));
        }
        span.end();
    }
}
