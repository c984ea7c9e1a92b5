//! Integration tests driving full client hook sequences and asserting on
//! the exported spans.

use assert_matches::assert_matches;
use futures::FutureExt;
use opentelemetry::{
    global,
    trace::{Span, SpanId, SpanKind, Status, Tracer},
    KeyValue, Value,
};
use opentelemetry_sdk::{
    propagation::TraceContextPropagator,
    trace::{InMemorySpanExporter, SdkTracerProvider, SpanData},
};
use serde_json::json;
use serial_test::serial;

use std::{io, sync::Arc};

mod broker;

use crate::broker::{bare_message, received_message, Faults, TestBroker};
use warren_hooks::{OperationError, ProcessCallback, PublishProperties};
use warren_otel::{attributes, Config, WarrenInstrumentation};

fn init_tracing() -> (InMemorySpanExporter, SdkTracerProvider) {
    let exporter = InMemorySpanExporter::default();
    let provider = SdkTracerProvider::builder()
        .with_simple_exporter(exporter.clone())
        .build();
    global::set_tracer_provider(provider.clone());
    global::set_text_map_propagator(TraceContextPropagator::new());
    (exporter, provider)
}

fn finished_spans(exporter: &InMemorySpanExporter, provider: &SdkTracerProvider) -> Vec<SpanData> {
    let _ = provider.force_flush();
    exporter
        .get_finished_spans()
        .expect("failed to read finished spans")
}

fn span_named<'a>(spans: &'a [SpanData], name: &str) -> &'a SpanData {
    spans
        .iter()
        .find(|span| span.name == name)
        .unwrap_or_else(|| panic!("span `{name}` was not exported"))
}

fn attribute<'a>(span: &'a SpanData, key: &str) -> &'a Value {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
        .unwrap_or_else(|| panic!("span `{}` has no `{key}` attribute", span.name))
}

fn has_attribute(span: &SpanData, key: &str) -> bool {
    span.attributes.iter().any(|kv| kv.key.as_str() == key)
}

fn ok_callback(reply: serde_json::Value) -> ProcessCallback {
    Box::new(move |_content| async move { Ok(reply) }.boxed())
}

fn failing_callback(message: &str) -> ProcessCallback {
    let error: OperationError = Arc::new(io::Error::other(message.to_owned()));
    Box::new(move |_content| async move { Err(error) }.boxed())
}

#[tokio::test]
#[serial]
async fn publish_and_receive_produce_correlated_spans() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = json!("test message");
    let payload = serde_json::to_vec(&message).unwrap();
    let payload_len = i64::try_from(payload.len()).unwrap();
    let publish = broker.publish("jobs", &message, PublishProperties::new(), &[Ok(())]);
    assert!(publish.headers.get("traceparent").is_some());

    let received = received_message(&publish, "jobs", payload);
    let outcome = broker
        .deliver("jobs", &received, ok_callback(json!(null)), Faults::default())
        .await;
    assert!(outcome.result.is_ok());
    assert!(outcome.reply_properties.is_none());

    let spans = finished_spans(&exporter, &provider);
    assert_eq!(spans.len(), 3, "{spans:#?}");
    let send = span_named(&spans, "(default exchange) -> jobs publish");
    let attempt = span_named(&spans, "(default exchange) -> jobs publish attempt");
    let receive = span_named(&spans, "jobs receive");

    assert_eq!(send.span_kind, SpanKind::Client);
    assert_eq!(attempt.span_kind, SpanKind::Producer);
    assert_eq!(receive.span_kind, SpanKind::Consumer);

    assert_eq!(send.parent_span_id, SpanId::INVALID);
    assert_eq!(attempt.parent_span_id, send.span_context.span_id());
    assert_eq!(receive.parent_span_id, attempt.span_context.span_id());
    assert_eq!(receive.span_context.trace_id(), send.span_context.trace_id());

    assert_eq!(
        attribute(send, attributes::MESSAGING_DESTINATION_NAME).as_str(),
        "(default exchange)"
    );
    assert_eq!(
        attribute(send, attributes::MESSAGING_ROUTING_KEY).as_str(),
        "jobs"
    );
    assert_eq!(
        attribute(send, attributes::MESSAGING_OPERATION).as_str(),
        "publish"
    );
    assert_eq!(
        attribute(send, attributes::MESSAGING_RPC),
        &Value::Bool(false)
    );
    assert_eq!(
        attribute(send, attributes::MESSAGING_BODY_SIZE),
        &Value::I64(payload_len)
    );
    assert_eq!(
        attribute(receive, attributes::MESSAGING_BODY_SIZE),
        &Value::I64(payload_len)
    );
    assert_eq!(
        attribute(receive, attributes::MESSAGING_OPERATION).as_str(),
        "receive"
    );
    assert_eq!(
        attribute(receive, attributes::MESSAGING_DESTINATION_NAME).as_str(),
        "(default exchange)"
    );
    assert_eq!(
        attribute(receive, attributes::MESSAGING_RPC),
        &Value::Bool(false)
    );

    for span in [send, receive] {
        assert_eq!(
            attribute(span, attributes::MESSAGING_SYSTEM).as_str(),
            "rabbitmq"
        );
        assert_eq!(
            attribute(span, attributes::SERVER_ADDRESS).as_str(),
            "rabbit.test"
        );
        assert_eq!(attribute(span, attributes::SERVER_PORT), &Value::I64(5672));
        assert_eq!(
            attribute(span, attributes::NETWORK_PROTOCOL_NAME).as_str(),
            "AMQP"
        );
        assert_eq!(
            attribute(span, attributes::NETWORK_PROTOCOL_VERSION).as_str(),
            "0.9.1"
        );
    }

    assert_matches!(send.status, Status::Unset);
    assert_matches!(receive.status, Status::Unset);
}

#[tokio::test]
#[serial]
async fn rpc_flow_parents_the_reply_under_the_receive_span() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let request = json!({ "op": "status" });
    let mut properties = PublishProperties::new();
    properties.rpc = true;
    let publish = broker.publish("api", &request, properties, &[Ok(())]);
    assert_eq!(publish.correlation_id.as_deref(), Some("conv-1"));

    let received = received_message(&publish, "api", serde_json::to_vec(&request).unwrap());
    let reply_value = json!({ "status": "ok" });
    let outcome = broker
        .deliver("api", &received, ok_callback(reply_value.clone()), Faults::default())
        .await;
    let reply_properties = outcome.reply_properties.expect("no RPC reply was sent");

    let spans = finished_spans(&exporter, &provider);
    assert_eq!(spans.len(), 4, "{spans:#?}");
    let send = span_named(&spans, "(default exchange) -> api publish rpc");
    let receive = span_named(&spans, "api receive");
    let reply = span_named(&spans, "api -> (rpc reply) publish");

    assert_eq!(reply.span_kind, SpanKind::Producer);
    assert_eq!(reply.parent_span_id, receive.span_context.span_id());
    assert_eq!(reply.span_context.trace_id(), send.span_context.trace_id());

    for span in [send, receive, reply] {
        assert_eq!(
            attribute(span, attributes::MESSAGING_CONVERSATION_ID).as_str(),
            "conv-1"
        );
        assert_eq!(attribute(span, attributes::MESSAGING_RPC), &Value::Bool(true));
    }
    assert_eq!(
        attribute(reply, attributes::MESSAGING_DESTINATION_NAME).as_str(),
        "(default exchange)"
    );
    assert_eq!(
        attribute(reply, attributes::MESSAGING_ROUTING_KEY).as_str(),
        "amq.gen-reply-1"
    );
    assert_eq!(
        attribute(reply, attributes::MESSAGING_DESTINATION_TEMPORARY),
        &Value::Bool(true)
    );
    let reply_len = i64::try_from(serde_json::to_vec(&reply_value).unwrap().len()).unwrap();
    assert_eq!(
        attribute(reply, attributes::MESSAGING_BODY_SIZE),
        &Value::I64(reply_len)
    );

    // Reply headers carry the receive context, which the requester uses to
    // correlate the reply with its own send.
    let traceparent = reply_properties.headers.get("traceparent").unwrap();
    assert!(
        traceparent.contains(&receive.span_context.span_id().to_string()),
        "{traceparent}"
    );
    assert!(
        traceparent.contains(&receive.span_context.trace_id().to_string()),
        "{traceparent}"
    );
}

#[tokio::test]
#[serial]
async fn failed_processing_is_retried_with_fresh_receive_spans() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let request = json!({ "op": "reindex" });
    let mut properties = PublishProperties::new();
    properties.rpc = true;
    let publish = broker.publish("api", &request, properties, &[Ok(())]);
    let received = received_message(&publish, "api", serde_json::to_vec(&request).unwrap());

    for attempt in 0..2 {
        let outcome = broker
            .deliver(
                "api",
                &received,
                failing_callback(&format!("flaky failure {attempt}")),
                Faults::default(),
            )
            .await;
        assert!(outcome.result.is_err());
        assert!(outcome.reply_properties.is_none());
    }
    let outcome = broker
        .deliver("api", &received, ok_callback(json!("done")), Faults::default())
        .await;
    assert!(outcome.result.is_ok());

    let spans = finished_spans(&exporter, &provider);
    let receives: Vec<_> = spans
        .iter()
        .filter(|span| span.name == "api receive")
        .collect();
    assert_eq!(receives.len(), 3, "{spans:#?}");

    for (attempt, receive) in receives.iter().take(2).enumerate() {
        let expected = format!("consumed message processing failed: flaky failure {attempt}");
        assert_matches!(
            &receive.status,
            Status::Error { description } if description.as_ref() == expected
        );
        let exception = receive
            .events
            .iter()
            .find(|event| event.name == "exception")
            .unwrap_or_else(|| panic!("no exception event: {receive:#?}"));
        assert!(exception.attributes.iter().any(|kv| {
            kv.key.as_str() == "exception.message" && kv.value.as_str().contains("flaky failure")
        }));
    }
    assert_matches!(receives[2].status, Status::Unset);

    // Exactly one reply, parented to the successful receive.
    let replies: Vec<_> = spans
        .iter()
        .filter(|span| span.name == "api -> (rpc reply) publish")
        .collect();
    assert_eq!(replies.len(), 1);
    assert_eq!(
        replies[0].parent_span_id,
        receives[2].span_context.span_id()
    );
}

#[test]
#[serial]
fn connection_retries_stay_inside_one_send_span() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = json!({ "op": "sync" });
    broker.publish(
        "jobs",
        &message,
        PublishProperties::new(),
        &[Err("connection reset"), Err("connection reset"), Ok(())],
    );

    let spans = finished_spans(&exporter, &provider);
    assert_eq!(spans.len(), 4, "{spans:#?}");
    let send = span_named(&spans, "(default exchange) -> jobs publish");
    let attempts: Vec<_> = spans
        .iter()
        .filter(|span| span.name == "(default exchange) -> jobs publish attempt")
        .collect();
    assert_eq!(attempts.len(), 3);

    for (ordinal, attempt) in attempts.iter().enumerate() {
        assert_eq!(attempt.parent_span_id, send.span_context.span_id());
        assert_eq!(
            attribute(attempt, attributes::MESSAGING_RECONNECT_RETRY_NUMBER),
            &Value::I64(i64::try_from(ordinal).unwrap())
        );
    }
    // Failed attempts record the connection error; the last one is clean.
    for attempt in &attempts[..2] {
        assert!(attempt.events.iter().any(|event| event.name == "exception"));
    }
    assert!(attempts[2].events.is_empty());

    assert_matches!(send.status, Status::Unset);
    // The send span carries the retry ordinal once, with its final value.
    let ordinals: Vec<_> = send
        .attributes
        .iter()
        .filter(|kv| kv.key.as_str() == attributes::MESSAGING_RECONNECT_RETRY_NUMBER)
        .map(|kv| &kv.value)
        .collect();
    assert_eq!(ordinals, [&Value::I64(2)]);
    let retries = send
        .events
        .iter()
        .filter(|event| event.name == "publish connection retry")
        .count();
    assert_eq!(retries, 2);
}

#[test]
#[serial]
fn exhausted_retries_mark_the_send_span_failed() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = json!({ "op": "sync" });
    broker.publish(
        "jobs",
        &message,
        PublishProperties::new(),
        &[Err("broker down"), Err("broker down")],
    );

    let spans = finished_spans(&exporter, &provider);
    let send = span_named(&spans, "(default exchange) -> jobs publish");
    assert_matches!(
        &send.status,
        Status::Error { description }
            if description.as_ref() == "send failed after 1 connection retry attempts"
    );
    assert_eq!(
        attribute(send, attributes::MESSAGING_RECONNECT_RETRY_NUMBER),
        &Value::I64(1)
    );
    let attempts: Vec<_> = spans
        .iter()
        .filter(|span| span.name == "(default exchange) -> jobs publish attempt")
        .collect();
    assert_eq!(attempts.len(), 2);
    for attempt in &attempts {
        assert!(attempt.events.iter().any(|event| event.name == "exception"));
    }
}

#[test]
#[serial]
fn connection_attributes_are_computed_once() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = json!(1);
    broker.publish("jobs", &message, PublishProperties::new(), &[Ok(())]);
    // Reconnects and failed attempts must not disturb the attribute set.
    broker.fail_connect("connection refused");
    broker.connect();
    broker.connect();
    broker.publish("jobs", &message, PublishProperties::new(), &[Ok(())]);

    let spans = finished_spans(&exporter, &provider);
    // Connects create no spans of their own.
    assert_eq!(spans.len(), 4, "{spans:#?}");

    let connection_attributes = |span: &SpanData| -> Vec<(String, String)> {
        span.attributes
            .iter()
            .filter(|kv| {
                let key = kv.key.as_str();
                key.starts_with("server.")
                    || key.starts_with("network.")
                    || key == attributes::MESSAGING_SYSTEM
            })
            .map(|kv| (kv.key.as_str().to_owned(), kv.value.as_str().into_owned()))
            .collect()
    };
    let sends: Vec<_> = spans
        .iter()
        .filter(|span| span.name == "(default exchange) -> jobs publish")
        .collect();
    assert_eq!(sends.len(), 2);
    assert_eq!(connection_attributes(sends[0]), connection_attributes(sends[1]));
    assert_eq!(
        attribute(sends[0], attributes::MESSAGING_SYSTEM).as_str(),
        "rabbitmq"
    );
}

#[tokio::test]
#[serial]
async fn message_without_headers_starts_a_new_trace() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = bare_message("jobs", serde_json::to_vec(&json!("fire and forget")).unwrap());
    let outcome = broker
        .deliver("jobs", &message, ok_callback(json!(null)), Faults::default())
        .await;
    assert!(outcome.result.is_ok());

    let spans = finished_spans(&exporter, &provider);
    let receive = span_named(&spans, "jobs receive");
    assert_eq!(receive.parent_span_id, SpanId::INVALID);
    assert_matches!(receive.status, Status::Unset);
}

#[tokio::test]
#[serial]
async fn ack_failure_marks_the_receive_span() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = json!("job");
    let publish = broker.publish("jobs", &message, PublishProperties::new(), &[Ok(())]);
    let received = received_message(&publish, "jobs", serde_json::to_vec(&message).unwrap());
    let outcome = broker
        .deliver(
            "jobs",
            &received,
            ok_callback(json!(null)),
            Faults {
                ack: Some("channel closed"),
                ..Faults::default()
            },
        )
        .await;
    assert!(outcome.result.is_ok());

    let spans = finished_spans(&exporter, &provider);
    let receive = span_named(&spans, "jobs receive");
    assert_matches!(
        &receive.status,
        Status::Error { description }
            if description.as_ref() == "consumed message failed ack after processing: channel closed"
    );
    let exceptions = receive
        .events
        .iter()
        .filter(|event| event.name == "exception")
        .count();
    assert_eq!(exceptions, 1);
}

#[tokio::test]
#[serial]
async fn reject_failure_overrides_the_processing_error_status() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = json!("job");
    let publish = broker.publish("jobs", &message, PublishProperties::new(), &[Ok(())]);
    let received = received_message(&publish, "jobs", serde_json::to_vec(&message).unwrap());
    let outcome = broker
        .deliver(
            "jobs",
            &received,
            failing_callback("bad payload"),
            Faults {
                reject: Some("channel closed"),
                ..Faults::default()
            },
        )
        .await;
    assert!(outcome.result.is_err());

    let spans = finished_spans(&exporter, &provider);
    let receive = span_named(&spans, "jobs receive");
    assert_matches!(
        &receive.status,
        Status::Error { description }
            if description.as_ref()
                == "consumed message failed to reject after failing to process: channel closed"
    );
    // Both the processing error and the reject error are recorded.
    let exceptions = receive
        .events
        .iter()
        .filter(|event| event.name == "exception")
        .count();
    assert_eq!(exceptions, 2);
}

#[tokio::test]
#[serial]
async fn failing_rpc_reply_marks_the_reply_span() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let request = json!({ "op": "status" });
    let mut properties = PublishProperties::new();
    properties.rpc = true;
    let publish = broker.publish("api", &request, properties, &[Ok(())]);
    let received = received_message(&publish, "api", serde_json::to_vec(&request).unwrap());
    let outcome = broker
        .deliver(
            "api",
            &received,
            ok_callback(json!("pong")),
            Faults {
                rpc_reply: Some("broker unreachable"),
                ..Faults::default()
            },
        )
        .await;
    assert!(outcome.result.is_ok());

    let spans = finished_spans(&exporter, &provider);
    let reply = span_named(&spans, "api -> (rpc reply) publish");
    assert_matches!(
        &reply.status,
        Status::Error { description } if description.as_ref() == "rpc reply failed: broker unreachable"
    );
    assert!(reply.events.iter().any(|event| event.name == "exception"));
    // The receive span itself stays clean.
    let receive = span_named(&spans, "api receive");
    assert_matches!(receive.status, Status::Unset);
}

#[tokio::test]
#[serial]
async fn panicking_customization_hooks_do_not_disturb_the_client() {
    let (exporter, provider) = init_tracing();
    let config = Config::new()
        .with_publish_hook(|_span, _event| panic!("publish hook exploded"))
        .with_consume_hook(|_span, _event| panic!("consume hook exploded"))
        .with_rpc_reply_hook(|_span, _event| panic!("rpc hook exploded"));
    let instrumentation = WarrenInstrumentation::new(config);
    let broker = TestBroker::new(&instrumentation);

    let request = json!({ "op": "ping" });
    let mut properties = PublishProperties::new();
    properties.rpc = true;
    let publish = broker.publish("api", &request, properties, &[Ok(())]);
    let received = received_message(&publish, "api", serde_json::to_vec(&request).unwrap());
    let outcome = broker
        .deliver("api", &received, ok_callback(json!("pong")), Faults::default())
        .await;
    assert!(outcome.result.is_ok());
    assert!(outcome.reply_properties.is_some());

    // All spans are still produced and correlated.
    let spans = finished_spans(&exporter, &provider);
    assert_eq!(spans.len(), 4, "{spans:#?}");
    let receive = span_named(&spans, "api receive");
    let reply = span_named(&spans, "api -> (rpc reply) publish");
    assert_eq!(reply.parent_span_id, receive.span_context.span_id());
}

#[tokio::test]
#[serial]
async fn customization_hooks_amend_their_spans() {
    let (exporter, provider) = init_tracing();
    let config = Config::new()
        .with_publish_hook(|span, event| {
            span.set_attribute(KeyValue::new("app.queue", event.queue.to_owned()));
        })
        .with_consume_hook(|span, event| {
            let redelivered = event.action.message.fields.redelivered;
            span.set_attribute(KeyValue::new("app.redelivered", redelivered));
        })
        .with_rpc_reply_hook(|span, event| {
            let bytes = i64::try_from(event.serialized_reply.len()).unwrap();
            span.set_attribute(KeyValue::new("app.reply_bytes", bytes));
        });
    let instrumentation = WarrenInstrumentation::new(config);
    let broker = TestBroker::new(&instrumentation);

    let request = json!({ "op": "status" });
    let mut properties = PublishProperties::new();
    properties.rpc = true;
    let publish = broker.publish("api", &request, properties, &[Ok(())]);
    let received = received_message(&publish, "api", serde_json::to_vec(&request).unwrap());
    let reply_value = json!({ "status": "ok" });
    broker
        .deliver("api", &received, ok_callback(reply_value.clone()), Faults::default())
        .await;

    let spans = finished_spans(&exporter, &provider);
    let send = span_named(&spans, "(default exchange) -> api publish rpc");
    let attempt = span_named(&spans, "(default exchange) -> api publish rpc attempt");
    let receive = span_named(&spans, "api receive");
    let reply = span_named(&spans, "api -> (rpc reply) publish");

    // The publish hook sees the attempt span, not the send span.
    assert_eq!(attribute(attempt, "app.queue").as_str(), "api");
    assert!(!has_attribute(send, "app.queue"));
    assert_eq!(attribute(receive, "app.redelivered"), &Value::Bool(false));
    let reply_len = i64::try_from(serde_json::to_vec(&reply_value).unwrap().len()).unwrap();
    assert_eq!(attribute(reply, "app.reply_bytes"), &Value::I64(reply_len));
}

#[tokio::test]
#[serial]
async fn consume_callback_runs_inside_the_receive_span() {
    let (exporter, provider) = init_tracing();
    let instrumentation = WarrenInstrumentation::new(Config::new());
    let broker = TestBroker::new(&instrumentation);

    let message = json!("work");
    let publish = broker.publish("jobs", &message, PublishProperties::new(), &[Ok(())]);
    let received = received_message(&publish, "jobs", serde_json::to_vec(&message).unwrap());

    let callback: ProcessCallback = Box::new(|content| {
        async move {
            // A span started inside the callback attaches to the receive span.
            let tracer = global::tracer("handler");
            let mut span = tracer.start("handle job");
            span.end();
            Ok(content)
        }
        .boxed()
    });
    let outcome = broker.deliver("jobs", &received, callback, Faults::default()).await;
    assert!(outcome.result.is_ok());

    let spans = finished_spans(&exporter, &provider);
    let receive = span_named(&spans, "jobs receive");
    let inner = span_named(&spans, "handle job");
    assert_eq!(inner.parent_span_id, receive.span_context.span_id());
    assert_eq!(inner.span_context.trace_id(), receive.span_context.trace_id());
}
