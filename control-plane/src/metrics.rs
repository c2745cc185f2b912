//! Process-wide counters exposed at `/metrics` (SPEC_FULL §1.6), alongside
//! `/healthz`, on the same `actix-web` server. Every counter is a `Relaxed`
//! atomic: nothing here ever reads one counter to decide how to update
//! another, so there is no ordering to preserve between them.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    sessions_opened_total: AtomicU64,
    sessions_superseded_total: AtomicU64,
    sessions_closed_total: AtomicU64,
    sessions_rejected_total: AtomicU64,
    outbound_messages_enqueued_total: AtomicU64,
    outbound_messages_superseded_total: AtomicU64,
    outbound_messages_rejected_total: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_session_opened(&self) {
        self.sessions_opened_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_superseded(&self) {
        self.sessions_superseded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_closed(&self) {
        self.sessions_closed_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection refused outright for exceeding `max_sessions` — distinct
    /// from a superseding reconnect, which always succeeds.
    pub fn record_session_rejected(&self) {
        self.sessions_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound_enqueued(&self) {
        self.outbound_messages_enqueued_total.fetch_add(1, Ordering::Relaxed);
    }

    /// A superseded same-kind message still counts as dropped: the agent
    /// never sees it.
    pub fn record_outbound_superseded(&self) {
        self.outbound_messages_superseded_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outbound_rejected(&self) {
        self.outbound_messages_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in [
            ("flowgate_sessions_opened_total", self.sessions_opened_total.load(Ordering::Relaxed)),
            (
                "flowgate_sessions_superseded_total",
                self.sessions_superseded_total.load(Ordering::Relaxed),
            ),
            ("flowgate_sessions_closed_total", self.sessions_closed_total.load(Ordering::Relaxed)),
            (
                "flowgate_sessions_rejected_total",
                self.sessions_rejected_total.load(Ordering::Relaxed),
            ),
            (
                "flowgate_outbound_messages_enqueued_total",
                self.outbound_messages_enqueued_total.load(Ordering::Relaxed),
            ),
            (
                "flowgate_outbound_messages_superseded_total",
                self.outbound_messages_superseded_total.load(Ordering::Relaxed),
            ),
            (
                "flowgate_outbound_messages_rejected_total",
                self.outbound_messages_rejected_total.load(Ordering::Relaxed),
            ),
        ] {
            out.push_str(&format!("# TYPE {name} counter\n{name} {value}\n"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_reflects_recorded_counters() {
        let metrics = Metrics::new();
        metrics.record_session_opened();
        metrics.record_outbound_rejected();
        metrics.record_outbound_rejected();

        let rendered = metrics.render();
        assert!(rendered.contains("flowgate_sessions_opened_total 1"));
        assert!(rendered.contains("flowgate_outbound_messages_rejected_total 2"));
    }
}
