//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::time::Duration;

use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tracing::debug;

/// Direction of the message movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDirection {
    /// Message published to the broker.
    Outbound,
    /// Message received from a subscription.
    Inbound,
    /// Request published with a private reply inbox.
    Request,
    /// Reply received for an outstanding request.
    Reply,
}

/// Emit a structured log entry for message activity.
pub fn log_message(direction: MessageDirection, subject: &str, bytes: usize) {
    debug!(subject, bytes, direction = ?direction, "messaging activity");
}

/// Prometheus metric handles for messaging activity.
pub struct MessagingMetricsExporter {
    published: IntCounter,
    received: IntCounter,
    dropped: IntCounter,
    request_failures: IntCounter,
    request_latency: Histogram,
}

impl MessagingMetricsExporter {
    /// Register messaging metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let published = IntCounter::with_opts(Opts::new(
            "narxr_messages_published_total",
            "Messages published to the broker",
        ))?;
        let received = IntCounter::with_opts(Opts::new(
            "narxr_messages_received_total",
            "Messages handed to subscription handlers",
        ))?;
        let dropped = IntCounter::with_opts(Opts::new(
            "narxr_messages_dropped_total",
            "Publishes that exhausted their retry budget",
        ))?;
        let request_failures = IntCounter::with_opts(Opts::new(
            "narxr_request_failures_total",
            "Requests that ended without a usable reply",
        ))?;
        let request_latency = Histogram::with_opts(HistogramOpts::new(
            "narxr_request_latency_seconds",
            "Observed latency between request and reply",
        ))?;

        registry.register(Box::new(published.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(dropped.clone()))?;
        registry.register(Box::new(request_failures.clone()))?;
        registry.register(Box::new(request_latency.clone()))?;

        Ok(Self {
            published,
            received,
            dropped,
            request_failures,
            request_latency,
        })
    }

    /// Record a published message.
    pub fn observe_published(&self) {
        self.published.inc();
    }

    /// Record a delivered message.
    pub fn observe_received(&self) {
        self.received.inc();
    }

    /// Record a publish that was given up on.
    pub fn observe_dropped(&self) {
        self.dropped.inc();
    }

    /// Record a request without a usable reply.
    pub fn observe_request_failure(&self) {
        self.request_failures.inc();
    }

    /// Record request round-trip latency.
    pub fn observe_latency(&self, duration: Duration) {
        self.request_latency.observe(duration.as_secs_f64());
    }
}
