use anyhow::Result;
use clap::Parser;
use provmatch::config::Config;
use provmatch::detection::Detection;
use provmatch::engine::Engine;
use provmatch::normalizer::RawRecord;
use provmatch::templates::TemplateStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "provmatch", version)]
#[command(about = "Provenance-graph intrusion detection engine")]
#[command(long_about = "\
Reads newline-delimited JSON audit records on stdin, maintains a sliding \
window of normalized events, and periodically matches the compiled \
provenance graph against attack-technique templates. Detections are \
written to stdout as JSON lines.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "provmatch.toml")]
    config: PathBuf,

    /// Template directory (overrides config)
    #[arg(short, long)]
    templates: Option<PathBuf>,

    /// Detection threshold in [0,1] (overrides config)
    #[arg(long)]
    threshold: Option<f64>,

    /// Matching interval in milliseconds (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if args.json {
        subscriber.json().init();
    } else {
        subscriber.with_target(false).init();
    }

    let mut config = Config::load_or_default(&args.config);
    if let Some(templates) = args.templates {
        config.templates.dir = templates;
    }
    if let Some(threshold) = args.threshold {
        config.matcher.threshold = threshold.clamp(0.0, 1.0);
    }
    if let Some(interval_ms) = args.interval_ms {
        config.engine.match_interval_ms = interval_ms;
    }

    info!("Config: {}", args.config.display());
    info!("Templates: {}", config.templates.dir.display());
    info!("Threshold: {}", config.matcher.threshold);

    let store = Arc::new(TemplateStore::load(&config.templates));
    if store.is_empty() {
        warn!("No templates loaded; the engine will never raise a detection");
    }

    let (raw_tx, raw_rx) = mpsc::channel::<RawRecord>(config.engine.channel_capacity);
    let (detection_tx, mut detection_rx) =
        mpsc::channel::<Vec<Detection>>(config.engine.channel_capacity);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Stdin reader: one JSON record per line. Unparseable lines are dropped;
    // a bad line must never stop the stream.
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<RawRecord>(line) {
                        Ok(record) => {
                            if raw_tx.send(record).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("Skipping unparseable line: {}", e),
                    }
                }
                Ok(None) => {
                    info!("Input stream closed");
                    break;
                }
                Err(e) => {
                    warn!("Stdin read error: {}", e);
                    break;
                }
            }
        }
    });

    // Detection writer: one JSON array per matching cycle.
    let writer = tokio::spawn(async move {
        while let Some(detections) = detection_rx.recv().await {
            for detection in &detections {
                info!(
                    "{} {} ({:.0}%, {:?})",
                    detection.technique_id,
                    detection.technique_name,
                    detection.confidence * 100.0,
                    detection.match_type
                );
            }
            match serde_json::to_string(&detections) {
                Ok(json) => println!("{}", json),
                Err(e) => warn!("Failed to serialize detections: {}", e),
            }
        }
    });

    let engine = Engine::new(&config, store);
    let mut engine_task = tokio::spawn(engine.run(raw_rx, detection_tx, shutdown_rx));

    info!("provmatch running. Press Ctrl+C to stop.");

    let stats = tokio::select! {
        res = &mut engine_task => res?,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            let _ = shutdown_tx.send(true);
            engine_task.await?
        }
    };

    writer.await?;
    info!(
        "provmatch stopped: {} events, {} cycles, {} detections",
        stats.events_ingested, stats.cycles, stats.detections_emitted
    );
    Ok(())
}
