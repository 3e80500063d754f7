use anyhow::Context;
use chrono::Utc;
use csv::WriterBuilder;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;

use super::fixed_params;
use crate::config::AppConfig;
use crate::db::{MemoryRepository, Repository};
use crate::ingestion::canonicalize;
use crate::models::{CopySignal, OutcomeSide, Trade, Venue};
use crate::simulation::realistic::SimClock;
use crate::simulation::{ExactCopySimulator, ExecutionCounters, RealisticSimulator, VenueSimulator};
use crate::venues::VenueAdapter;

pub const CSV_HEADER: [&str; 9] = [
    "latency_ms",
    "venue",
    "signals_processed",
    "signals_filled",
    "fill_rate",
    "avg_slippage_bps",
    "total_volume",
    "realized_pnl",
    "locked_edge",
];

/// One CSV row: one venue at one latency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayRow {
    pub latency_ms: u64,
    pub venue: Venue,
    pub signals_processed: u64,
    /// Signals with any fill (full or partial).
    pub signals_filled: u64,
    pub fill_rate: f64,
    pub avg_slippage_bps: Decimal,
    pub total_volume: Decimal,
    pub realized_pnl: Decimal,
    /// Hedge-locked edge of open positions, measured before settlement.
    pub locked_edge: Decimal,
}

impl ReplayRow {
    fn new(latency_ms: u64, sim: &dyn VenueSimulator, locked_edge: Decimal) -> Self {
        let c = sim.counters();
        let fill_rate = if c.signals == 0 {
            0.0
        } else {
            c.with_fill() as f64 / c.signals as f64
        };
        Self {
            latency_ms,
            venue: sim.venue(),
            signals_processed: c.signals,
            signals_filled: c.with_fill(),
            fill_rate,
            avg_slippage_bps: c.avg_slippage_bps(),
            total_volume: c.volume,
            realized_pnl: sim.ledger().total_realized_pnl(),
            locked_edge,
        }
    }

    fn record(&self) -> [String; 9] {
        [
            self.latency_ms.to_string(),
            self.venue.as_str().to_string(),
            self.signals_processed.to_string(),
            self.signals_filled.to_string(),
            format!("{:.3}", self.fill_rate),
            format!("{:.1}", self.avg_slippage_bps.round_dp(1)),
            format!("{:.2}", self.total_volume.round_dp(2)),
            format!("{:.2}", self.realized_pnl.round_dp(2)),
            format!("{:.2}", self.locked_edge.round_dp(2)),
        ]
    }
}

/// Realistic-venue rates at one latency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensitivityRow {
    pub latency_ms: u64,
    pub attempts: u64,
    pub unmapped: u64,
    pub fill_rate: f64,
    pub partial_rate: f64,
    pub miss_rate: f64,
    pub avg_slippage_bps: Decimal,
}

impl SensitivityRow {
    fn new(latency_ms: u64, c: &ExecutionCounters) -> Self {
        Self {
            latency_ms,
            attempts: c.attempts(),
            unmapped: c.unmapped,
            fill_rate: c.fill_rate(),
            partial_rate: c.partial_rate(),
            miss_rate: c.miss_rate(),
            avg_slippage_bps: c.avg_slippage_bps(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReplayReport {
    pub rows: Vec<ReplayRow>,
    pub sensitivity: Vec<SensitivityRow>,
}

impl ReplayReport {
    pub fn to_csv(&self) -> anyhow::Result<String> {
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(Vec::new());
        writer.write_record(CSV_HEADER)?;
        for row in &self.rows {
            writer.write_record(row.record())?;
        }
        writer.flush()?;
        let bytes = writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("failed to finish CSV: {e}"))?;
        Ok(String::from_utf8(bytes)?)
    }

    pub fn write_csv(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }
        std::fs::write(path, self.to_csv()?).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    /// Plain-text latency sensitivity table.
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>10} {:>8} {:>8} {:>8} {:>8} {:>8} {:>10}",
            "latency_ms", "attempts", "unmapped", "fill", "partial", "miss", "slip_bps"
        );
        for row in &self.sensitivity {
            let _ = writeln!(
                out,
                "{:>10} {:>8} {:>8} {:>8.3} {:>8.3} {:>8.3} {:>10.1}",
                row.latency_ms,
                row.attempts,
                row.unmapped,
                row.fill_rate,
                row.partial_rate,
                row.miss_rate,
                row.avg_slippage_bps.round_dp(1).to_f64().unwrap_or(0.0),
            );
        }
        out
    }
}

/// Re-run a fixed signal set once per latency.
///
/// Every pass starts from empty simulators and an in-memory repository, uses
/// the fixed configured parameters and reads books as of
/// `signal.timestamp + latency`, so the same inputs always give the same
/// report. `outcomes` (source market id to winner) settles positions after
/// each pass.
pub async fn run_replay(
    config: &AppConfig,
    signals: &[CopySignal],
    latencies: &[u64],
    target: Arc<dyn VenueAdapter>,
    outcomes: &HashMap<String, OutcomeSide>,
) -> ReplayReport {
    let mut ordered: Vec<&CopySignal> = signals.iter().collect();
    ordered.sort_by(|a, b| (a.timestamp, &a.signal_id).cmp(&(b.timestamp, &b.signal_id)));
    let settle_at = ordered.last().map_or_else(Utc::now, |s| s.timestamp);
    let outcomes: BTreeMap<&String, &OutcomeSide> = outcomes.iter().collect();
    let params = fixed_params(config);

    let mut report = ReplayReport::default();
    for &latency in latencies {
        let repository: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
        let mut exact = ExactCopySimulator::new(repository.clone(), config.max_qty_scale);
        let mut realistic = RealisticSimulator::new(target.clone(), repository, config, SimClock::Signal);
        realistic.set_latency(latency);

        for signal in &ordered {
            tokio::join!(
                exact.process_signal(signal, &params),
                realistic.process_signal(signal, &params)
            );
        }

        let exact_edge = exact.ledger().total_locked_edge();
        let realistic_edge = realistic.ledger().total_locked_edge();
        for (market_id, outcome) in &outcomes {
            exact.settle_source_market(market_id, **outcome, settle_at).await;
            realistic.settle_source_market(market_id, **outcome, settle_at).await;
        }

        let counters = realistic
            .by_latency()
            .get(&latency)
            .cloned()
            .unwrap_or_default();
        report.rows.push(ReplayRow::new(latency, &exact, exact_edge));
        report.rows.push(ReplayRow::new(latency, &realistic, realistic_edge));
        report.sensitivity.push(SensitivityRow::new(latency, &counters));

        tracing::info!(
            latency_ms = latency,
            signals = ordered.len(),
            fill_rate = counters.fill_rate(),
            miss_rate = counters.miss_rate(),
            avg_slippage_bps = %counters.avg_slippage_bps().round_dp(1),
            "Replay pass complete"
        );
    }
    report
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputFile {
    Signals(Vec<CopySignal>),
    Trades(Vec<Trade>),
}

/// Load replay input: a JSON array of canonical signals, or of raw trades
/// that are canonicalized on the way in.
pub fn load_signals_file(path: &Path, source: &str) -> anyhow::Result<Vec<CopySignal>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let input: InputFile =
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(match input {
        InputFile::Signals(signals) => signals,
        InputFile::Trades(trades) => trades
            .iter()
            .filter_map(|t| match canonicalize(t, source) {
                Ok(s) => Some(s),
                Err(e) => {
                    tracing::warn!(error = %e, trade_id = %t.trade_id, "Skipping trade in replay input");
                    None
                }
            })
            .collect(),
    })
}

/// Load `{ "<source market id>": "YES" | "NO" }`.
pub fn load_outcomes_file(path: &Path) -> anyhow::Result<HashMap<String, OutcomeSide>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

/// Parse "2000,5000,10000".
pub fn parse_latencies(raw: &str) -> anyhow::Result<Vec<u64>> {
    let latencies = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().with_context(|| format!("invalid latency: {s}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if latencies.is_empty() {
        anyhow::bail!("no latencies given");
    }
    Ok(latencies)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_latencies() {
        assert_eq!(parse_latencies("2000, 5000,10000").unwrap(), vec![2000, 5000, 10000]);
        assert!(parse_latencies("").is_err());
        assert!(parse_latencies("2000,fast").is_err());
    }

    #[test]
    fn test_csv_formatting() {
        let report = ReplayReport {
            rows: vec![ReplayRow {
                latency_ms: 2000,
                venue: Venue::Kalshi,
                signals_processed: 3,
                signals_filled: 2,
                fill_rate: 2.0 / 3.0,
                avg_slippage_bps: "12.345".parse().unwrap(),
                total_volume: "40.5".parse().unwrap(),
                realized_pnl: "-3.456".parse().unwrap(),
                locked_edge: Decimal::ZERO,
            }],
            sensitivity: Vec::new(),
        };
        let csv = report.to_csv().unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER.join(",").as_str()));
        assert_eq!(lines.next(), Some("2000,kalshi,3,2,0.667,12.3,40.50,-3.46,0.00"));
    }

    #[test]
    fn test_render_table_has_one_line_per_latency() {
        let report = ReplayReport {
            rows: Vec::new(),
            sensitivity: vec![
                SensitivityRow::new(2000, &ExecutionCounters::default()),
                SensitivityRow::new(5000, &ExecutionCounters::default()),
            ],
        };
        assert_eq!(report.render_table().lines().count(), 3);
    }
}
