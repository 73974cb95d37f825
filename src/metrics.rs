use std::sync::Arc;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

use crate::forge::rate_limit::RateLimitState;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DownloadLabels {
    pub outcome: DownloadOutcome,
}

/// Terminal state of one download request.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum DownloadOutcome {
    Streamed,
    Unauthorized,
    Forbidden,
    NotFound,
    Error,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Central container for every Prometheus metric exposed by the proxy.
pub struct Metrics {
    pub downloads_total: Family<DownloadLabels, Counter>,
    pub streamed_bytes_total: Counter,
    pub credential_reloads_total: Counter,
    pub upstream_rate_limit_remaining: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let downloads_total = Family::<DownloadLabels, Counter>::default();
        registry.register(
            "assetgate_downloads",
            "Asset download requests by outcome",
            downloads_total.clone(),
        );

        let streamed_bytes_total = Counter::default();
        registry.register(
            "assetgate_streamed_bytes",
            "Asset bytes relayed to clients",
            streamed_bytes_total.clone(),
        );

        let credential_reloads_total = Counter::default();
        registry.register(
            "assetgate_credential_reloads",
            "Successful reloads of the credential file",
            credential_reloads_total.clone(),
        );

        let upstream_rate_limit_remaining: Gauge = Gauge::default();
        registry.register(
            "assetgate_upstream_rate_limit_remaining",
            "Remaining upstream API calls before rate limit",
            upstream_rate_limit_remaining.clone(),
        );

        Self {
            downloads_total,
            streamed_bytes_total,
            credential_reloads_total,
            upstream_rate_limit_remaining,
        }
    }

    pub fn record_download(&self, outcome: DownloadOutcome) {
        self.downloads_total
            .get_or_create(&DownloadLabels { outcome })
            .inc();
    }

    /// Copy the last observed upstream budget into the gauge.  Left untouched
    /// until the upstream has reported one.
    pub fn observe_rate_limit(&self, state: &RateLimitState) {
        if state.is_known() {
            let remaining = i64::try_from(state.remaining()).unwrap_or(i64::MAX);
            self.upstream_rate_limit_remaining.set(remaining);
        }
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in [`AppState`](crate::AppState).
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all proxy metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}
