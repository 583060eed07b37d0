//! Prometheus metrics for reservation engine monitoring.
//!
//! The engine and notifier emit through the `metrics` facade regardless of
//! features; this module additionally provides Prometheus exposition of the
//! same signals for applications that scrape, gated behind the
//! `metrics-export` feature.

#[cfg(feature = "metrics-export")]
use prometheus::{CounterVec, HistogramVec, Opts, Registry};

#[cfg(feature = "metrics-export")]
use crate::error::Result;

/// Prometheus metrics registry for the reservation core.
///
/// Tracks reservation outcomes, conflict reasons and notification delivery
/// with labels for drill-down.
#[cfg(feature = "metrics-export")]
#[derive(Clone)]
pub struct KeyturnMetrics {
    registry: Registry,

    reservations_total: CounterVec,
    reservation_conflicts_total: CounterVec,
    notifications_total: CounterVec,
    operation_duration_seconds: HistogramVec,
}

#[cfg(feature = "metrics-export")]
impl KeyturnMetrics {
    /// Create a new metrics instance registered with the given registry.
    ///
    /// # Errors
    ///
    /// Returns an error if metrics fail to register (e.g., duplicate
    /// registration).
    pub fn new(registry: Registry) -> Result<Self> {
        let reservations_total = CounterVec::new(
            Opts::new(
                "keyturn_reservations_total",
                "Committed reservation transitions by outcome",
            ),
            &["outcome"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create reservations counter: {}", e))?;

        let reservation_conflicts_total = CounterVec::new(
            Opts::new(
                "keyturn_reservation_conflicts_total",
                "Reservation attempts rejected under the lock, by reason",
            ),
            &["reason"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create conflicts counter: {}", e))?;

        let notifications_total = CounterVec::new(
            Opts::new(
                "keyturn_notifications_total",
                "Notification delivery outcomes",
            ),
            &["outcome"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create notifications counter: {}", e))?;

        let operation_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "keyturn_operation_duration_seconds",
                "Engine operation duration including lock wait",
            ),
            &["operation"],
        )
        .map_err(|e| anyhow::anyhow!("Failed to create duration histogram: {}", e))?;

        registry
            .register(Box::new(reservations_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register reservations counter: {}", e))?;
        registry
            .register(Box::new(reservation_conflicts_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register conflicts counter: {}", e))?;
        registry
            .register(Box::new(notifications_total.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register notifications counter: {}", e))?;
        registry
            .register(Box::new(operation_duration_seconds.clone()))
            .map_err(|e| anyhow::anyhow!("Failed to register duration histogram: {}", e))?;

        Ok(Self {
            registry,
            reservations_total,
            reservation_conflicts_total,
            notifications_total,
            operation_duration_seconds,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_reservation(&self, outcome: &str) {
        self.reservations_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_conflict(&self, reason: &str) {
        self.reservation_conflicts_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_notification(&self, outcome: &str) {
        self.notifications_total.with_label_values(&[outcome]).inc();
    }

    pub fn observe_operation(&self, operation: &str, duration: std::time::Duration) {
        self.operation_duration_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }
}
