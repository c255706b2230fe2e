// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Webhook pipeline --------
pub static WEBHOOK_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("webhook_requests_total", "webhook HTTP responses (label: status code)"),
        &["status"],
    )
    .unwrap()
});

pub static SIGNALS_ACCEPTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("signals_accepted_total", "signals that passed validation").unwrap()
});

pub static SIGNALS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "signals_rejected_total",
            "signals that ended in an error (labels: category, code)",
        ),
        &["category", "code"],
    )
    .unwrap()
});

pub static EXECS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("exec_reports_total", "order submissions by outcome"),
        &["status", "venue"],
    )
    .unwrap()
});

// Latency from webhook received -> terminal outcome (milliseconds)
pub static LAT_PIPELINE: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("latency_signal_to_result_ms", "Latency from webhook to result (ms)")
            .buckets(vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]),
    )
    .unwrap()
});

pub static SERVER_TIME_FALLBACKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "server_time_fallback_total",
            "exchange time unavailable, local clock used",
        ),
        &["venue"],
    )
    .unwrap()
});

pub static AUDIT_ENTRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("audit_entries_total", "audit entries emitted (labels: stage, status)"),
        &["stage", "status"],
    )
    .unwrap()
});

// ---- Config visibility ----
pub static CONFIG_VENUE_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_venue_mode", "venue mode (label: mode)"),
        &["mode"],
    )
    .unwrap()
});

pub static CONFIG_EXCHANGE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("config_exchange", "registered exchange adapters (label: exchange)"),
        &["exchange"],
    )
    .unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(WEBHOOK_REQUESTS.clone())),
        REGISTRY.register(Box::new(SIGNALS_ACCEPTED.clone())),
        REGISTRY.register(Box::new(SIGNALS_REJECTED.clone())),
        REGISTRY.register(Box::new(EXECS.clone())),
        REGISTRY.register(Box::new(LAT_PIPELINE.clone())),
        REGISTRY.register(Box::new(SERVER_TIME_FALLBACKS.clone())),
        REGISTRY.register(Box::new(AUDIT_ENTRIES.clone())),
        // Config visibility
        REGISTRY.register(Box::new(CONFIG_VENUE_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_EXCHANGE.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_metrics_are_exported() {
        init();
        init(); // idempotent: duplicate registration is ignored
        SIGNALS_ACCEPTED.inc();
        let text = String::from_utf8(encode_metrics()).unwrap();
        assert!(text.contains("signals_accepted_total"));
    }
}
