//! Prometheus Metrics
//!
//! Counters and gauges exported on the HTTP `/metrics` endpoint.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

/// Metrics for the presence server. Cloning shares the underlying
/// collectors.
#[derive(Clone)]
pub struct PresenceMetrics {
    registry: Registry,

    /// Total sockets accepted since start.
    pub connections_total: IntCounter,
    /// Sockets currently open.
    pub connections_active: IntGauge,
    /// Logical sessions currently registered.
    pub sessions_online: IntGauge,
    /// Resolved contact identities currently online.
    pub contacts_online: IntGauge,
    /// Point-to-point messages forwarded.
    pub messages_forwarded: IntCounter,
    /// Frames dropped (malformed, unannounced or unauthorized).
    pub frames_dropped: IntCounter,
}

impl PresenceMetrics {
    /// Creates and registers all collectors. Panics on registration
    /// failure; called once at startup.
    pub fn new() -> Self {
        let registry = Registry::new();

        let connections_total = IntCounter::new(
            "roster_connections_total",
            "Total sockets accepted since start",
        )
        .expect("metric creation failed");
        let connections_active = IntGauge::new(
            "roster_connections_active",
            "Sockets currently open",
        )
        .expect("metric creation failed");
        let sessions_online = IntGauge::new(
            "roster_sessions_online",
            "Logical sessions currently registered",
        )
        .expect("metric creation failed");
        let contacts_online = IntGauge::new(
            "roster_contacts_online",
            "Resolved contact identities currently online",
        )
        .expect("metric creation failed");
        let messages_forwarded = IntCounter::new(
            "roster_messages_forwarded_total",
            "Point-to-point messages forwarded",
        )
        .expect("metric creation failed");
        let frames_dropped = IntCounter::new(
            "roster_frames_dropped_total",
            "Frames dropped as malformed, unannounced or unauthorized",
        )
        .expect("metric creation failed");

        for collector in [
            Box::new(connections_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(connections_active.clone()),
            Box::new(sessions_online.clone()),
            Box::new(contacts_online.clone()),
            Box::new(messages_forwarded.clone()),
            Box::new(frames_dropped.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registration failed");
        }

        PresenceMetrics {
            registry,
            connections_total,
            connections_active,
            sessions_online,
            contacts_online,
            messages_forwarded,
            frames_dropped,
        }
    }

    /// Encodes all metrics in the Prometheus text format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for PresenceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
