// =============================================================================
// Scan Orchestrator — bounded fan-out over the symbol universe
// =============================================================================
//
// One scan: resolve the universe (tier and venue filters, priority order,
// max-symbols cap), fan out per-symbol tasks bounded by a semaphore of
// `max_concurrent_requests`, respect the global inter-request delay between
// dispatches, and collect results over a bounded channel sized to the
// universe.
//
// Within each task: fetch the order book through the provider fabric
// (preferred venue, then the fallback chain), fetch the symbol's series,
// build the raw factor row, and run the gate cascade — all synchronously.
// Orthogonalization is cross-sectional, so it runs once after collection,
// followed by scoring and the deterministic sort (composite score
// descending; ties by priority ascending, then symbol).
//
// A failed symbol is dropped and logged; the scan proceeds. The scan-level
// deadline stops waiting and keeps whatever completed. External cancellation
// returns `CancelledOrTimeout` with no partial results. The orchestrator
// raises only for invalid configuration, a weight-vector validation
// failure, or cancellation.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attribution::{AttemptRecord, CandidateRecord, FetchAttribution};
use crate::config::{ScannerConfig, SymbolEntry};
use crate::errors::ScanError;
use crate::factors::{build_row, RawFactorRow};
use crate::fabric::ProviderFabric;
use crate::gates::{evaluate_cascade, CascadeResult, GateInput};
use crate::market_data::SeriesSource;
use crate::pipeline::{composite_score, orthogonalize};
use crate::types::{ScanRequest, ScanSummary, VenueFetchStats};
use crate::venue_stats::ExecutionQualityTracker;

/// One symbol's journey through a scan, sent back over the result channel.
enum SymbolOutcome {
    Scanned(Box<ScannedSymbol>),
    Failed {
        symbol: String,
        tier: String,
        attempts: Vec<AttemptRecord>,
        error: ScanError,
    },
}

struct ScannedSymbol {
    tier: String,
    priority: u32,
    raw_row: RawFactorRow,
    cascade: CascadeResult,
    attribution: FetchAttribution,
    attempts: Vec<AttemptRecord>,
}

/// The scan orchestrator.
pub struct Scanner {
    config: Arc<ScannerConfig>,
    fabric: Arc<ProviderFabric>,
    series_source: Arc<dyn SeriesSource>,
    venue_stats: Arc<ExecutionQualityTracker>,
}

impl Scanner {
    /// Build a scanner over a validated configuration.
    pub fn new(
        config: ScannerConfig,
        fabric: Arc<ProviderFabric>,
        series_source: Arc<dyn SeriesSource>,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            fabric,
            series_source,
            venue_stats: Arc::new(ExecutionQualityTracker::new()),
        })
    }

    pub fn venue_stats(&self) -> &Arc<ExecutionQualityTracker> {
        &self.venue_stats
    }

    /// Run one scan to completion (or deadline).
    pub async fn scan(
        &self,
        request: ScanRequest,
    ) -> Result<(Vec<CandidateRecord>, ScanSummary), ScanError> {
        self.scan_with_cancel(request, CancellationToken::new()).await
    }

    /// Run one scan under an external cancellation token. Cancellation
    /// returns an error — never partial results.
    pub async fn scan_with_cancel(
        &self,
        request: ScanRequest,
        cancel: CancellationToken,
    ) -> Result<(Vec<CandidateRecord>, ScanSummary), ScanError> {
        if cancel.is_cancelled() {
            return Err(ScanError::CancelledOrTimeout);
        }

        let started = Instant::now();
        let scan_id = Uuid::new_v4().to_string();

        // The active weight vector is immutable for the scan's duration and
        // must be valid before any work is dispatched.
        let weights = *self.config.regime_weights.for_regime(request.regime);
        weights.validate(&request.regime.to_string())?;

        let universe = self.resolve_universe(&request);
        info!(
            scan_id = %scan_id,
            strategy = %request.strategy,
            regime = %request.regime,
            universe = universe.len(),
            "scan started"
        );

        if universe.is_empty() {
            return Ok((
                Vec::new(),
                self.summary(&scan_id, &request, 0, &[], &HashMap::new(), started),
            ));
        }

        // Child token: the deadline cancels in-flight tasks without
        // signalling the caller's token.
        let task_cancel = cancel.child_token();
        let semaphore = Arc::new(Semaphore::new(self.config.global.max_concurrent_requests));
        let (tx, mut rx) = mpsc::channel::<SymbolOutcome>(universe.len());

        let inter_request_delay =
            Duration::from_millis(self.config.global.inter_request_delay_ms);

        for (index, entry) in universe.iter().cloned().enumerate() {
            if index > 0 && !inter_request_delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(inter_request_delay) => {}
                    _ = cancel.cancelled() => {
                        task_cancel.cancel();
                        return Err(ScanError::CancelledOrTimeout);
                    }
                }
            }

            let task = SymbolTask {
                entry,
                regime: request.regime,
                config: Arc::clone(&self.config),
                fabric: Arc::clone(&self.fabric),
                series_source: Arc::clone(&self.series_source),
                venue_stats: Arc::clone(&self.venue_stats),
                semaphore: Arc::clone(&semaphore),
                cancel: task_cancel.clone(),
                tx: tx.clone(),
            };
            tokio::spawn(task.run());
        }
        drop(tx);

        // Collect until every writer finishes, the deadline passes, or the
        // caller cancels.
        let deadline = started + Duration::from_secs(request.timeout_seconds.max(1));
        let mut outcomes: Vec<SymbolOutcome> = Vec::with_capacity(universe.len());
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(outcome) => outcomes.push(outcome),
                    None => break,
                },
                _ = cancel.cancelled() => {
                    task_cancel.cancel();
                    return Err(ScanError::CancelledOrTimeout);
                }
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {
                    warn!(scan_id = %scan_id, collected = outcomes.len(), "scan deadline reached, keeping partial panel");
                    task_cancel.cancel();
                    break;
                }
            }
        }

        // A caller cancellation that raced the channel closing still wins:
        // cancelled scans never return partial results.
        if cancel.is_cancelled() {
            return Err(ScanError::CancelledOrTimeout);
        }

        self.assemble(&scan_id, &request, &weights, universe.len(), outcomes, started)
    }

    // -------------------------------------------------------------------------
    // Universe resolution
    // -------------------------------------------------------------------------

    fn resolve_universe(&self, request: &ScanRequest) -> Vec<SymbolEntry> {
        let mut universe: Vec<SymbolEntry> = self
            .config
            .universe
            .symbols
            .iter()
            .filter(|entry| request.tiers.is_empty() || request.tiers.contains(&entry.tier))
            .filter(|entry| {
                request.exchanges.is_empty()
                    || entry.venues.keys().any(|venue| request.exchanges.contains(venue))
            })
            .cloned()
            .collect();

        universe.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.symbol.cmp(&b.symbol)));

        if request.max_symbols > 0 && universe.len() > request.max_symbols {
            universe.truncate(request.max_symbols);
        }
        universe
    }

    // -------------------------------------------------------------------------
    // Assembly: orthogonalize, score, gate-merge, sort, summarise
    // -------------------------------------------------------------------------

    fn assemble(
        &self,
        scan_id: &str,
        request: &ScanRequest,
        weights: &crate::pipeline::WeightVector,
        total_symbols: usize,
        outcomes: Vec<SymbolOutcome>,
        started: Instant,
    ) -> Result<(Vec<CandidateRecord>, ScanSummary), ScanError> {
        let mut scanned: Vec<ScannedSymbol> = Vec::new();
        let mut failures: Vec<(String, String, ScanError)> = Vec::new();
        let mut all_attempts: Vec<AttemptRecord> = Vec::new();
        let mut tier_counts: HashMap<String, u32> = HashMap::new();

        for outcome in outcomes {
            match outcome {
                SymbolOutcome::Scanned(symbol) => {
                    all_attempts.extend(symbol.attempts.iter().cloned());
                    *tier_counts.entry(symbol.tier.clone()).or_default() += 1;
                    scanned.push(*symbol);
                }
                SymbolOutcome::Failed {
                    symbol,
                    tier,
                    attempts,
                    error,
                } => {
                    all_attempts.extend(attempts);
                    *tier_counts.entry(tier).or_default() += 1;
                    warn!(scan_id, symbol = %symbol, error = %error, "symbol dropped");
                    failures.push((symbol, error.kind_tag().to_string(), error));
                }
            }
        }

        // Cross-sectional orthogonalization over the surviving panel.
        let raw_rows: Vec<RawFactorRow> = scanned.iter().map(|s| s.raw_row.clone()).collect();
        let (orthogonal_rows, report) = orthogonalize(&raw_rows)?;
        if !report.within_tolerance {
            warn!(
                scan_id,
                max_abs_correlation = format!("{:.3}", report.max_abs_correlation),
                "orthogonality tolerance exceeded for this panel"
            );
        }

        let priorities: HashMap<String, u32> = scanned
            .iter()
            .map(|symbol| (symbol.raw_row.symbol.clone(), symbol.priority))
            .collect();

        let mut records: Vec<CandidateRecord> = scanned
            .into_iter()
            .zip(orthogonal_rows)
            .map(|(symbol, row)| {
                let breakdown = composite_score(&row, weights);
                let selected = symbol.cascade.allow && breakdown.total >= request.min_score;
                CandidateRecord {
                    symbol: row.symbol.clone(),
                    composite_score: breakdown.total,
                    rank: 0,
                    selected,
                    row,
                    breakdown,
                    gates: symbol.cascade,
                    attribution: symbol.attribution,
                }
            })
            .collect();

        // Deterministic order: score desc, priority asc, symbol lex asc.
        records.sort_by(|a, b| {
            b.composite_score
                .partial_cmp(&a.composite_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    priorities
                        .get(&a.symbol)
                        .unwrap_or(&u32::MAX)
                        .cmp(priorities.get(&b.symbol).unwrap_or(&u32::MAX))
                })
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        for (index, record) in records.iter_mut().enumerate() {
            record.rank = index as u32 + 1;
        }

        // Live scans feed selected candidates into the execution quality
        // tracker; crossing half the spread is the expected slippage.
        if !request.dry_run {
            let now_ms = Utc::now().timestamp_millis();
            for record in records.iter().filter(|r| r.selected) {
                let spread = record
                    .gates
                    .gates
                    .iter()
                    .find(|g| g.gate == "microstructure")
                    .and_then(|g| g.result.detail.get("spread_bps"))
                    .copied()
                    .unwrap_or(0.0);
                self.venue_stats
                    .record_execution(&record.attribution.venue, spread / 2.0, now_ms);
            }
        }

        let mut summary = self.summary(
            scan_id,
            request,
            total_symbols,
            &all_attempts,
            &tier_counts,
            started,
        );
        summary.successful_scans = records.len();
        summary.candidates_found = records.iter().filter(|r| r.selected).count();
        for (symbol, kind, error) in &failures {
            *summary.per_error_counts.entry(kind.clone()).or_default() += 1;
            summary.errors.push(format!("{symbol}: {error}"));
        }

        info!(
            scan_id,
            successful = summary.successful_scans,
            candidates = summary.candidates_found,
            duration_ms = summary.duration_ms,
            "scan finished"
        );

        Ok((records, summary))
    }

    fn summary(
        &self,
        scan_id: &str,
        request: &ScanRequest,
        total_symbols: usize,
        attempts: &[AttemptRecord],
        tier_counts: &HashMap<String, u32>,
        started: Instant,
    ) -> ScanSummary {
        let mut per_venue_stats: HashMap<String, VenueFetchStats> = HashMap::new();
        for attempt in attempts {
            let stats = per_venue_stats.entry(attempt.venue.clone()).or_default();
            stats.attempted += 1;
            if attempt.ok {
                stats.succeeded += 1;
            } else {
                stats.failed += 1;
            }
        }

        ScanSummary {
            scan_id: scan_id.to_string(),
            strategy: request.strategy.clone(),
            regime: request.regime,
            total_symbols,
            successful_scans: 0,
            candidates_found: 0,
            duration_ms: started.elapsed().as_millis() as u64,
            per_venue_stats,
            per_tier_counts: tier_counts.clone(),
            per_error_counts: HashMap::new(),
            errors: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Per-symbol task
// ---------------------------------------------------------------------------

struct SymbolTask {
    entry: SymbolEntry,
    regime: crate::types::Regime,
    config: Arc<ScannerConfig>,
    fabric: Arc<ProviderFabric>,
    series_source: Arc<dyn SeriesSource>,
    venue_stats: Arc<ExecutionQualityTracker>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tx: mpsc::Sender<SymbolOutcome>,
}

impl SymbolTask {
    async fn run(self) {
        let symbol = self.entry.symbol.clone();
        let tier = self.entry.tier.clone();

        // Cancellation is observed at the semaphore, the limiter queue, and
        // the HTTP round-trip — a cancelled task produces no record.
        let _permit = tokio::select! {
            permit = self.semaphore.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = self.cancel.cancelled() => return,
        };

        let (book_result, attempts) = self
            .fabric
            .fetch_order_book(&self.entry, None, &self.cancel)
            .await;

        let fetched = match book_result {
            Ok(fetched) => fetched,
            Err(ScanError::CancelledOrTimeout) => return,
            Err(error) => {
                let _ = self
                    .tx
                    .send(SymbolOutcome::Failed {
                        symbol,
                        tier,
                        attempts,
                        error,
                    })
                    .await;
                return;
            }
        };

        let series = match self.series_source.fetch_series(&self.entry).await {
            Ok(series) => series,
            Err(ScanError::CancelledOrTimeout) => return,
            Err(error) => {
                let _ = self
                    .tx
                    .send(SymbolOutcome::Failed {
                        symbol,
                        tier,
                        attempts,
                        error,
                    })
                    .await;
                return;
            }
        };

        let book = &fetched.value;
        let now_ms = Utc::now().timestamp_millis();

        let raw_row = match build_row(&series, book, self.regime, now_ms) {
            Ok(row) => row,
            Err(error) => {
                let _ = self
                    .tx
                    .send(SymbolOutcome::Failed {
                        symbol,
                        tier,
                        attempts,
                        error,
                    })
                    .await;
                return;
            }
        };

        // Gate inputs assembled from the book, the series, and live infra
        // health; the cascade runs synchronously inside the task.
        let spread_bps = book.spread_bps().unwrap_or(f64::MAX);
        let depth_usd = book.depth_usd_within_2pct();
        let atr_1h = series.atr_1h().unwrap_or(0.0);
        let price_change_abs = series.last_bar_move_abs().unwrap_or(0.0);
        let accel = series.accel_4h().unwrap_or(0.0);
        let input = GateInput {
            spread_bps,
            depth_usd,
            vadr: series.vadr_or_estimate(depth_usd),
            momentum_24h_pct: series.return_pct(24).unwrap_or(0.0),
            rsi_4h: series.rsi_4h().unwrap_or(50.0),
            accel_4h_pct: accel,
            accel_renewal: accel > 0.0,
            bars_age: series.bars_age,
            price_change_abs,
            atr_1h,
            execution_delay_secs: book.fetched_at.elapsed().as_secs_f64(),
            infra_p99_ms: self
                .fabric
                .health()
                .p99_latency_ms(&fetched.attribution.venue)
                .unwrap_or(0) as f64,
            atr_proximity: if atr_1h > 0.0 {
                price_change_abs / atr_1h
            } else {
                0.0
            },
        };

        let tightened = self.venue_stats.is_tightened(&fetched.attribution.venue);
        let cascade = evaluate_cascade(&input, &self.config.guards, self.regime, tightened);

        debug!(
            symbol = %symbol,
            venue = %fetched.attribution.venue,
            allow = cascade.allow,
            reason = %cascade.reason,
            "symbol scanned"
        );

        let _ = self
            .tx
            .send(SymbolOutcome::Scanned(Box::new(ScannedSymbol {
                tier,
                priority: self.entry.priority,
                raw_row,
                cascade,
                attribution: fetched.attribution,
                attempts,
            })))
            .await;
    }
}
