//! A Prometheus counter for requests — the ambient metrics surface named in
//! SPEC_FULL.md §2's component table. Diagnostics only; nothing here ever branches
//! core logic. Scoped to what the host runtime actually observes at its one request
//! boundary (`archivo-server/src/main.rs`'s `handle_request`) rather than threading a
//! metrics handle down into the Version Engine or the refresh task.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("archivo_requests_total", "Requests handled, by onto_version and outcome")
                .namespace("archivo"),
            &["onto_version", "outcome"],
        )?;

        registry.register(Box::new(requests_total.clone()))?;

        Ok(Self { registry, requests_total })
    }

    /// Render the Prometheus text exposition format for a scrape endpoint.
    pub fn encode_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf).expect("prometheus encoding is infallible");
        String::from_utf8(buf).expect("prometheus text encoding is always valid utf-8")
    }
}
