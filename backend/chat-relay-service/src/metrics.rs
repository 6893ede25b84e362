//! Prometheus metrics for the relay pipeline

use actix_web::HttpResponse;
use once_cell::sync::Lazy;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntGauge, Opts, TextEncoder};
use tracing::warn;

fn register<C>(metric: C) -> C
where
    C: Collector + Clone + 'static,
{
    if let Err(e) = prometheus::default_registry().register(Box::new(metric.clone())) {
        warn!("Failed to register chat relay metric: {}", e);
    }
    metric
}

fn counter(name: &str, help: &str) -> IntCounter {
    register(IntCounter::with_opts(Opts::new(name, help)).expect("valid counter opts"))
}

fn gauge(name: &str, help: &str) -> IntGauge {
    register(IntGauge::with_opts(Opts::new(name, help)).expect("valid gauge opts"))
}

pub static MESSAGES_ENQUEUED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "chat_relay_messages_enqueued_total",
        "Messages accepted by the ingress API",
    )
});

pub static PENDING_MESSAGES: Lazy<IntGauge> = Lazy::new(|| {
    gauge(
        "chat_relay_pending_messages",
        "Messages queued in the batch writer awaiting a flush",
    )
});

pub static BATCHES_FLUSHED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "chat_relay_batches_flushed_total",
        "Batches successfully written to the store",
    )
});

pub static MESSAGES_PERSISTED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "chat_relay_messages_persisted_total",
        "Messages written to the store",
    )
});

pub static FLUSH_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "chat_relay_flush_failures_total",
        "Batch inserts that failed and were requeued",
    )
});

pub static POLL_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "chat_relay_poll_failures_total",
        "Change notifier ticks that failed to query the store",
    )
});

pub static EVENTS_BROADCAST: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "chat_relay_events_broadcast_total",
        "Events fanned out to connected clients",
    )
});

pub static DELIVERIES_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    counter(
        "chat_relay_deliveries_dropped_total",
        "Per-client deliveries skipped because the connection was gone or its buffer full",
    )
});

pub static CONNECTED_CLIENTS: Lazy<IntGauge> = Lazy::new(|| {
    gauge(
        "chat_relay_connected_clients",
        "Push-channel connections currently registered",
    )
});

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(err.to_string());
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}
