use prometheus::{IntCounter, IntGauge, Opts, Registry};
use tracing::warn;

/// Relay-side gauges and counters, labelled with the owning service.
#[derive(Clone)]
pub struct OutboxMetrics {
    pub pending: IntGauge,
    pub oldest_pending_age_seconds: IntGauge,
    pub delivered: IntCounter,
    pub failed: IntCounter,
}

impl OutboxMetrics {
    /// Create the metrics and register them in the process-wide default registry.
    pub fn new(service: &str) -> prometheus::Result<Self> {
        Self::register_in(service, prometheus::default_registry())
    }

    /// Create the metrics and register them in `registry`.
    ///
    /// Registration conflicts are logged and otherwise ignored so a second relay in the
    /// same process keeps working with its own handles.
    pub fn register_in(service: &str, registry: &Registry) -> prometheus::Result<Self> {
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("service", service.to_string())
        };

        let pending = IntGauge::with_opts(opts(
            "outbox_pending_count",
            "Number of outbox envelopes waiting to be relayed",
        ))?;
        let oldest_pending_age_seconds = IntGauge::with_opts(opts(
            "outbox_oldest_pending_age_seconds",
            "Age in seconds of the oldest pending outbox envelope",
        ))?;
        let delivered = IntCounter::with_opts(opts(
            "outbox_delivered_total",
            "Total number of outbox envelopes published and marked done",
        ))?;
        let failed = IntCounter::with_opts(opts(
            "outbox_failed_total",
            "Total number of outbox envelopes marked error after a failed publish",
        ))?;

        for metric in [
            Box::new(pending.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(oldest_pending_age_seconds.clone()),
            Box::new(delivered.clone()),
            Box::new(failed.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register outbox metric: {}", e);
            }
        }

        Ok(Self {
            pending,
            oldest_pending_age_seconds,
            delivered,
            failed,
        })
    }
}
