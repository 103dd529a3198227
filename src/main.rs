// =============================================================================
// Borealis Scanner — Main Entry Point
// =============================================================================
//
// Loads the scanner configuration (JSON file, env overrides), builds the
// provider fabric and the live series source, runs one scan, and prints the
// ranked candidates plus the scan summary as JSON. Scans default to dry-run;
// set BOREALIS_LIVE=1 to feed selected candidates into the execution
// quality tracker.
// =============================================================================

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use borealis_scanner::config::ScannerConfig;
use borealis_scanner::fabric::ProviderFabric;
use borealis_scanner::scanner::Scanner;
use borealis_scanner::types::{Regime, ScanRequest};
use borealis_scanner::venues::{BinanceClient, BinanceSeriesSource, VenueTransport};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Borealis Momentum Scanner — Starting Up           ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("BOREALIS_CONFIG").unwrap_or_else(|_| "scanner_config.json".to_string());
    let config = ScannerConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        ScannerConfig::default()
    });
    config
        .validate()
        .context("scanner configuration failed validation")?;

    let regime = std::env::var("BOREALIS_REGIME")
        .ok()
        .and_then(|raw| serde_json::from_str::<Regime>(&format!("\"{raw}\"")).ok())
        .unwrap_or(Regime::Choppy);
    let dry_run = std::env::var("BOREALIS_LIVE").map(|v| v != "1").unwrap_or(true);

    info!(
        symbols = config.universe.symbols.len(),
        providers = config.providers.len(),
        regime = %regime,
        dry_run,
        "configuration ready"
    );

    // ── 2. Build the fabric and series source ────────────────────────────
    let fabric = Arc::new(ProviderFabric::from_config(&config));
    let shutdown = CancellationToken::new();
    fabric.spawn_cache_sweepers(&shutdown);

    let binance_cfg = config
        .providers
        .get("binance")
        .cloned()
        .context("a 'binance' provider is required for the live series source")?;
    let series_source = Arc::new(BinanceSeriesSource::new(BinanceClient::new(
        VenueTransport::new(
            "binance",
            &binance_cfg,
            std::time::Duration::from_secs(config.global.http_timeout_secs),
        ),
    )));

    // ── 3. Run one scan ──────────────────────────────────────────────────
    let scanner = Scanner::new(config, fabric, series_source)
        .context("failed to construct scanner")?;

    let request = ScanRequest {
        strategy: "momentum".to_string(),
        regime,
        dry_run,
        ..ScanRequest::default()
    };

    let (candidates, summary) = scanner
        .scan(request)
        .await
        .context("scan failed")?;

    // ── 4. Report ────────────────────────────────────────────────────────
    for candidate in candidates.iter().filter(|c| c.selected) {
        info!(
            rank = candidate.rank,
            symbol = %candidate.symbol,
            score = format!("{:.2}", candidate.composite_score),
            venue = %candidate.attribution.venue,
            tier = candidate.attribution.tier_label(),
            latency_ms = candidate.attribution.latency_ms,
            "candidate"
        );
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);

    shutdown.cancel();
    Ok(())
}
