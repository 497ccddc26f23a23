//! End-to-end behaviour of the instrumented fetch against a mock backend.

mod common;

use common::{MATH_BODY, MockBackend, TestTelemetry, attribute, event_names};
use opentelemetry::trace::{Status, TraceContextExt, Tracer};
use opentelemetry::{Context, global};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use otel_fetch::{CALLING_EVENT, FETCH_SPAN_NAME, FetchError, PARSING_EVENT};

#[tokio::test]
async fn fetch_returns_body_and_records_one_span() {
    let backend = MockBackend::start().await;
    let telemetry = TestTelemetry::new();
    let client = telemetry.client();

    let body = client.fetch(&backend.url("/random/math")).await.unwrap();

    assert_eq!(body, MATH_BODY);
    assert_eq!(backend.hits(), 1);

    let spans = telemetry.spans_named(FETCH_SPAN_NAME);
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.status, Status::Unset);
    assert_eq!(event_names(span), vec![CALLING_EVENT, PARSING_EVENT]);
    assert_eq!(
        attribute(&span.attributes, "url.full"),
        Some(backend.url("/random/math"))
    );
    assert_eq!(telemetry.counter_value(), 1);
}

#[tokio::test]
async fn response_headers_become_span_attributes() {
    let backend = MockBackend::start().await;
    let telemetry = TestTelemetry::new();

    telemetry
        .client()
        .fetch(&backend.url("/random/math"))
        .await
        .unwrap();

    let span = &telemetry.spans_named(FETCH_SPAN_NAME)[0];
    assert_eq!(
        attribute(&span.attributes, "http.response.header.x-test").as_deref(),
        Some("1")
    );
    assert_eq!(
        attribute(&span.attributes, "http.response.header.content-type").as_deref(),
        Some("application/json")
    );
    assert_eq!(
        attribute(&span.attributes, "http.response.status_code").as_deref(),
        Some("200")
    );
}

#[tokio::test]
async fn root_span_gets_one_child_per_fetch() {
    let backend = MockBackend::start().await;
    let telemetry = TestTelemetry::new();
    let client = telemetry.client();

    let cx = Context::current_with_span(telemetry.tracer().start("main"));
    client
        .fetch_with_context(&backend.url("/random/math"), &cx)
        .await
        .unwrap();
    client
        .fetch_with_context(&backend.url("/random/math"), &cx)
        .await
        .unwrap();
    cx.span().end();

    let root = telemetry.spans_named("main");
    assert_eq!(root.len(), 1);
    let root_id = root[0].span_context.span_id();

    let children = telemetry.spans_named(FETCH_SPAN_NAME);
    assert_eq!(children.len(), 2);
    assert!(children.iter().all(|span| span.parent_span_id == root_id));
    assert!(
        children
            .iter()
            .all(|span| span.span_context.trace_id() == root[0].span_context.trace_id())
    );
    assert_ne!(
        children[0].span_context.span_id(),
        children[1].span_context.span_id()
    );

    assert_eq!(backend.hits(), 2);
    assert_eq!(telemetry.counter_value(), 2);
}

#[tokio::test]
async fn server_error_propagates_and_span_is_closed() {
    let backend = MockBackend::start().await;
    let telemetry = TestTelemetry::new();

    let cx = Context::current_with_span(telemetry.tracer().start("main"));
    let result = telemetry
        .client()
        .fetch_with_context(&backend.url("/broken"), &cx)
        .await;
    cx.span().end();

    let err = match result {
        Err(FetchError::Http(err)) => err,
        other => panic!("expected an HTTP error, got {other:?}"),
    };
    assert_eq!(err.status().map(|s| s.as_u16()), Some(500));
    assert_eq!(backend.hits(), 1);

    let spans = telemetry.spans_named(FETCH_SPAN_NAME);
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert!(matches!(span.status, Status::Error { .. }));
    assert_eq!(event_names(span), vec![CALLING_EVENT, "exception"]);
    assert_eq!(
        attribute(&span.attributes, "http.response.header.x-test").as_deref(),
        Some("1")
    );
    assert_eq!(telemetry.counter_value(), 1);
    assert_eq!(telemetry.spans_named("main").len(), 1);
}

#[tokio::test]
async fn connection_failure_propagates_and_span_is_closed() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let telemetry = TestTelemetry::new();
    let result = telemetry
        .client()
        .fetch(&format!("http://{addr}/random/math"))
        .await;

    assert!(matches!(result, Err(FetchError::Http(ref e)) if e.is_connect()));

    let spans = telemetry.spans_named(FETCH_SPAN_NAME);
    assert_eq!(spans.len(), 1);
    assert!(matches!(spans[0].status, Status::Error { .. }));
    assert!(event_names(&spans[0]).contains(&"exception".to_string()));
    assert_eq!(telemetry.counter_value(), 1);
}

#[tokio::test]
async fn trace_context_reaches_the_backend() {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let backend = MockBackend::start().await;
    let telemetry = TestTelemetry::new();

    let body = telemetry
        .client()
        .fetch(&backend.url("/traceparent"))
        .await
        .unwrap();

    let span = &telemetry.spans_named(FETCH_SPAN_NAME)[0];
    let trace_id = span.span_context.trace_id().to_string();
    let span_id = span.span_context.span_id().to_string();
    assert!(body.contains(&trace_id), "traceparent {body:?} lacks {trace_id}");
    assert!(body.contains(&span_id), "traceparent {body:?} lacks {span_id}");
    assert_eq!(
        attribute(&span.attributes, "http.request.header.traceparent").as_deref(),
        Some(body.as_str())
    );
}

#[tokio::test]
async fn propagation_can_be_switched_off() {
    global::set_text_map_propagator(TraceContextPropagator::new());
    let backend = MockBackend::start().await;
    let telemetry = TestTelemetry::new();

    let body = telemetry
        .client()
        .with_context_propagation(false)
        .fetch(&backend.url("/traceparent"))
        .await
        .unwrap();

    assert_eq!(body, "");
    let span = &telemetry.spans_named(FETCH_SPAN_NAME)[0];
    assert_eq!(attribute(&span.attributes, "http.request.header.traceparent"), None);
}
