// =============================================================================
// Pressure Events — Main Entry Point
// =============================================================================
//
//   pressure-events batch  < recording.csv   > report.json
//   pressure-events stream < live_feed       > edges.jsonl
//
// Mode comes from the first argument or PRESSURE_MODE (default `batch`).
// Configuration is read from PRESSURE_CONFIG (default pressure_config.json);
// a missing or invalid file falls back to defaults.
// =============================================================================

use std::io::{BufReader, Write};

use anyhow::{bail, Context};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use pressure_events::runtime_config::RuntimeConfig;
use pressure_events::source::{parse_recorded, pump_lines};
use pressure_events::stream::{new_shared_snapshot, run_session, StreamSession};
use pressure_events::BatchPipeline;

const DEFAULT_CONFIG_PATH: &str = "pressure_config.json";
const LIVE_CHANNEL_CAPACITY: usize = 4_096;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    // Logs go to stderr so stdout stays machine-readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Pressure Events — Starting Up                    ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("PRESSURE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = RuntimeConfig::load(&config_path).unwrap_or_else(|e| {
        warn!(path = %config_path, error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });

    let mode = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PRESSURE_MODE").ok())
        .unwrap_or_else(|| "batch".to_string());

    info!(
        mode = %mode,
        sample_rate_hz = config.signal.sample_rate_hz,
        threshold_per_sec = config.signal.threshold_per_sec,
        edge_threshold = config.edge.edge_threshold,
        "Configuration loaded"
    );

    match mode.as_str() {
        "batch" => run_batch(config),
        "stream" => run_stream(config).await,
        other => bail!("unknown mode '{other}', expected 'batch' or 'stream'"),
    }
}

// ── Batch: whole recording from stdin, one JSON report to stdout ─────────
fn run_batch(config: RuntimeConfig) -> anyhow::Result<()> {
    let pipeline = BatchPipeline::new(config)?;

    let stdin = std::io::stdin();
    let (samples, _stats) = parse_recorded(BufReader::new(stdin.lock()), &pipeline.config().source)?;

    let report = pipeline.run(&samples);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, &report).context("failed to write batch report")?;
    writeln!(out)?;

    info!(events = report.events.len(), "Batch report written");
    Ok(())
}

// ── Stream: live lines from stdin, one JSON edge event per line ──────────
async fn run_stream(config: RuntimeConfig) -> anyhow::Result<()> {
    let gate = config.source.clone();
    let session = StreamSession::new(config)?;

    let (sample_tx, sample_rx) = mpsc::channel(LIVE_CHANNEL_CAPACITY);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let status = new_shared_snapshot();

    // ── Line reader ──────────────────────────────────────────────────────
    let reader = tokio::spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        if let Err(e) = pump_lines(stdin, sample_tx, gate).await {
            error!(error = %e, "Line reader failed");
        }
    });

    // ── Edge event writer ────────────────────────────────────────────────
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => error!(error = %e, "Failed to encode edge event"),
            }
        }
    });

    let mut runner = tokio::spawn(run_session(
        session,
        sample_rx,
        shutdown_rx,
        status.clone(),
        Some(event_tx),
    ));

    info!("Stream running. Press Ctrl+C to stop.");

    // ── Graceful shutdown ────────────────────────────────────────────────
    let (session, reason) = tokio::select! {
        finished = &mut runner => finished.context("stream runner panicked")?,
        signal = tokio::signal::ctrl_c() => {
            signal?;
            warn!("Shutdown signal received, stopping stream");
            let _ = shutdown_tx.send(true);
            runner.await.context("stream runner panicked")?
        }
    };

    reader.abort();
    let _ = writer.await;

    if let Some(snapshot) = status.read().as_ref() {
        info!(
            timestamp_ms = snapshot.timestamp_ms,
            filtered = snapshot.filtered,
            state = %snapshot.state,
            "Final stream status"
        );
    }
    info!(
        reason = ?reason,
        samples = session.samples_seen(),
        edge_events = session.edge_log().count(),
        "Pressure Events shut down complete."
    );
    Ok(())
}
