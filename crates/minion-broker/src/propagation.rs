//! Trace context propagation through envelope `tracing_info` maps.
//!
//! Spans are created on the global OpenTelemetry tracer. Without an installed
//! tracer provider they are no-ops and injection writes nothing, which keeps
//! envelopes unchanged.

use std::borrow::Cow;

use minion_api::TracingInfo;
use opentelemetry::global;
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};
use opentelemetry_sdk::propagation::TraceContextPropagator;

const TRACER_NAME: &str = "minion";

/// Installs the W3C trace-context propagator globally.
pub fn install_propagator() {
    global::set_text_map_propagator(TraceContextPropagator::new());
}

pub fn inject(cx: &Context, info: &mut TracingInfo) {
    global::get_text_map_propagator(|propagator| propagator.inject_context(cx, info));
}

pub fn extract(info: &TracingInfo) -> Context {
    global::get_text_map_propagator(|propagator| propagator.extract(info))
}

/// Starts a span of `kind` under `parent` and returns the context holding it.
pub fn start_span(
    name: impl Into<Cow<'static, str>>,
    kind: SpanKind,
    parent: &Context,
    attributes: Vec<KeyValue>,
) -> Context {
    let tracer = global::tracer(TRACER_NAME);
    let span = tracer
        .span_builder(name)
        .with_kind(kind)
        .with_attributes(attributes)
        .start_with_context(&tracer, parent);
    parent.with_span(span)
}

/// Flags the span in `cx` as failed.
pub fn mark_failed(cx: &Context, error: &str) {
    let span = cx.span();
    span.set_attribute(KeyValue::new("failed", true));
    span.set_attribute(KeyValue::new("error", error.to_string()));
}

pub fn end(cx: &Context) {
    cx.span().end();
}
