use prometheus::{IntCounter, IntGauge, Opts};
use tracing::warn;

#[derive(Clone)]
pub struct OutboxMetrics {
    pub dispatched: IntCounter,
    pub dispatch_failures: IntCounter,
    pub deleted: IntCounter,
    /// 1 while the push loop is retrying the same message
    pub stalled: IntGauge,
}

impl OutboxMetrics {
    pub fn new(service: &str) -> prometheus::Result<Self> {
        let registry = prometheus::default_registry();
        let opts = |name: &str, help: &str| {
            Opts::new(name, help).const_label("service", service.to_string())
        };

        let dispatched = IntCounter::with_opts(opts(
            "outbox_dispatched_total",
            "Total number of outbox messages handled and marked as handled",
        ))?;
        let dispatch_failures = IntCounter::with_opts(opts(
            "outbox_dispatch_failures_total",
            "Total number of failed dispatch attempts",
        ))?;
        let deleted = IntCounter::with_opts(opts(
            "outbox_deleted_total",
            "Total number of handled messages removed by retention",
        ))?;
        let stalled = IntGauge::with_opts(opts(
            "outbox_push_stalled",
            "Whether the push loop is stuck retrying a message",
        ))?;

        for metric in [
            Box::new(dispatched.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(dispatch_failures.clone()),
            Box::new(deleted.clone()),
            Box::new(stalled.clone()),
        ] {
            if let Err(e) = registry.register(metric) {
                warn!("Failed to register outbox metric: {}", e);
            }
        }

        Ok(Self {
            dispatched,
            dispatch_failures,
            deleted,
            stalled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_start_at_zero() {
        let metrics = OutboxMetrics::new("metrics-test").unwrap();
        assert_eq!(metrics.dispatched.get(), 0);
        assert_eq!(metrics.stalled.get(), 0);

        // Registering twice only warns
        let again = OutboxMetrics::new("metrics-test").unwrap();
        again.deleted.inc_by(3);
        assert_eq!(again.deleted.get(), 3);
    }
}
