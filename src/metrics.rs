use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::Histogram;
use prometheus_client::registry::Registry;
use std::sync::OnceLock;

#[derive(Debug, Clone, Hash, PartialEq, Eq, prometheus_client::encoding::EncodeLabelSet)]
pub struct RejectLabel {
    pub reason: &'static str, // malformed | signature | submission
}

pub struct Metrics {
    registry: Registry,
    pub callback_requests_total: Counter,
    pub callback_accepted_total: Counter,
    pub callback_rejections_total: Family<RejectLabel, Counter>,
    pub finalizations_submitted_total: Counter,
    pub callback_ms: Histogram,
    pub computations_dispatched_total: Counter,
    pub computation_timeouts_total: Counter,
    pub computations_in_flight: Gauge<i64>,
    pub watcher_transactions_total: Counter,
}

fn buckets_ms() -> Vec<f64> {
    vec![
        5.0, 10.0, 25.0, 50.0, 100.0, 200.0, 300.0, 500.0, 750.0, 1000.0, 1500.0, 2000.0, 3000.0,
        5000.0, 10_000.0, 30_000.0, 60_000.0,
    ]
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let mut registry = Registry::default();

        let callback_requests_total = Counter::default();
        registry.register(
            "matching_callback_requests_total",
            "Callback requests received",
            callback_requests_total.clone(),
        );
        let callback_accepted_total = Counter::default();
        registry.register(
            "matching_callback_accepted_total",
            "Callbacks verified and finalized on-chain",
            callback_accepted_total.clone(),
        );
        let callback_rejections_total: Family<RejectLabel, Counter> = Family::default();
        registry.register(
            "matching_callback_rejections_total",
            "Callbacks rejected (labelled by reason)",
            callback_rejections_total.clone(),
        );
        let finalizations_submitted_total = Counter::default();
        registry.register(
            "matching_finalizations_submitted_total",
            "finalize_submit_order transactions confirmed",
            finalizations_submitted_total.clone(),
        );
        let callback_ms = Histogram::new(buckets_ms().into_iter());
        registry.register(
            "matching_callback_ms",
            "Callback handling time including on-chain submission (ms)",
            callback_ms.clone(),
        );

        let computations_dispatched_total = Counter::default();
        registry.register(
            "matching_computations_dispatched_total",
            "MPC computations queued",
            computations_dispatched_total.clone(),
        );
        let computation_timeouts_total = Counter::default();
        registry.register(
            "matching_computation_timeouts_total",
            "Waits for finalization or outcome that timed out",
            computation_timeouts_total.clone(),
        );
        let computations_in_flight = Gauge::<i64>::default();
        registry.register(
            "matching_computations_in_flight",
            "Registered computation tickets",
            computations_in_flight.clone(),
        );
        let watcher_transactions_total = Counter::default();
        registry.register(
            "matching_watcher_transactions_total",
            "Program transactions carrying events seen by the watcher",
            watcher_transactions_total.clone(),
        );

        Metrics {
            registry,
            callback_requests_total,
            callback_accepted_total,
            callback_rejections_total,
            finalizations_submitted_total,
            callback_ms,
            computations_dispatched_total,
            computation_timeouts_total,
            computations_in_flight,
            watcher_transactions_total,
        }
    })
}

pub fn inc_callback_rejection(reason: &'static str) {
    metrics()
        .callback_rejections_total
        .get_or_create(&RejectLabel { reason })
        .inc();
}

pub async fn metrics_handler() -> impl IntoResponse {
    let m = metrics();
    let mut out = String::new();
    if let Err(e) = encode(&mut out, &m.registry) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("encode metrics failed: {e}"),
        )
            .into_response();
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        out,
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn exposition_lists_callback_counters() {
        inc_callback_rejection("signature");
        let resp = metrics_handler().await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let mut out = String::new();
        encode(&mut out, &metrics().registry).unwrap();
        assert!(out.contains("matching_callback_rejections_total"));
        assert!(out.contains("reason=\"signature\""));
    }
}
