use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use rust_decimal::prelude::ToPrimitive;
use std::sync::OnceLock;

use crate::models::Venue;
use crate::simulation::ledger::LedgerSummary;
use crate::simulation::{ExecutionCounters, SignalExecution};

const SLIPPAGE_BUCKETS: &[f64] = &[0.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0];
const LATENCY_BUCKETS: &[f64] = &[100.0, 500.0, 1_000.0, 2_000.0, 5_000.0, 10_000.0];

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
///
/// Safe to call more than once; later calls return the first handle.
pub fn init_metrics() -> PrometheusHandle {
    HANDLE.get_or_init(install).clone()
}

fn install() -> PrometheusHandle {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full("slippage_bps".into()), SLIPPAGE_BUCKETS)
        .and_then(|b| b.set_buckets_for_metric(Matcher::Full("signal_latency_ms".into()), LATENCY_BUCKETS));
    let builder = match builder {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(error = %e, "Invalid histogram buckets, using summaries");
            PrometheusBuilder::new()
        }
    };

    let recorder = builder.build_recorder();
    let handle = recorder.handle();
    if let Err(e) = metrics::set_global_recorder(recorder) {
        // Another recorder is already global (tests); metrics still render empty.
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    // Pre-register counters so they appear even before the first increment.
    counter!("signals_ingested_total").absolute(0);
    counter!("signals_duplicate_total").absolute(0);
    counter!("feed_errors_total").absolute(0);
    for venue in [Venue::Polymarket, Venue::Kalshi] {
        counter!("signals_mapped_total", "venue" => venue.as_str()).absolute(0);
        counter!("signals_unmapped_total", "venue" => venue.as_str()).absolute(0);
        counter!("orders_filled_total", "venue" => venue.as_str()).absolute(0);
        counter!("orders_missed_total", "venue" => venue.as_str()).absolute(0);
        gauge!("open_positions", "venue" => venue.as_str()).set(0.0);
    }
    gauge!("circuit_breaker_active").set(0.0);

    handle
}

pub fn signal_ingested() {
    counter!("signals_ingested_total").increment(1);
}

pub fn signal_duplicate() {
    counter!("signals_duplicate_total").increment(1);
}

pub fn feed_error() {
    counter!("feed_errors_total").increment(1);
}

/// Per-order counters and the slippage histogram.
pub fn record_execution(execution: &SignalExecution) {
    use crate::simulation::Disposition;

    let venue = execution.venue.as_str();
    match execution.disposition {
        Disposition::Unmapped => counter!("signals_unmapped_total", "venue" => venue).increment(1),
        Disposition::Skipped => {}
        Disposition::Filled | Disposition::Partial => {
            counter!("signals_mapped_total", "venue" => venue).increment(1);
            counter!("orders_filled_total", "venue" => venue, "status" => execution.disposition.as_str())
                .increment(1);
        }
        Disposition::Missed | Disposition::Rejected => {
            counter!("signals_mapped_total", "venue" => venue).increment(1);
            counter!("orders_missed_total", "venue" => venue, "status" => execution.disposition.as_str())
                .increment(1);
        }
    }
    if let Some(fill) = execution.fill.as_ref().filter(|f| f.has_fill()) {
        histogram!("slippage_bps", "venue" => venue).record(fill.slippage_bps.to_f64().unwrap_or(0.0));
    }
}

pub fn set_rates(venue: Venue, counters: &ExecutionCounters) {
    let venue = venue.as_str();
    gauge!("fill_rate", "venue" => venue).set(counters.fill_rate());
    gauge!("mapping_success_rate", "venue" => venue).set(counters.mapping_rate());
}

pub fn set_ledger(venue: Venue, summary: &LedgerSummary) {
    let venue = venue.as_str();
    gauge!("open_positions", "venue" => venue).set(summary.open_positions as f64);
    gauge!("realized_pnl", "venue" => venue).set(summary.total_realized_pnl.to_f64().unwrap_or(0.0));
    gauge!("locked_edge", "venue" => venue).set(summary.total_locked_edge.to_f64().unwrap_or(0.0));
}

pub fn set_circuit_breaker(active: bool) {
    gauge!("circuit_breaker_active").set(if active { 1.0 } else { 0.0 });
}

/// Wall time from signal acceptance to processed.
pub fn signal_latency(ms: f64) {
    histogram!("signal_latency_ms").record(ms);
}
