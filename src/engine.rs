//! Ingestion/matching pipeline.
//!
//! Two tasks coordinate only through the shared event window: the ingestion
//! task drains the raw-record channel into the graph builder, and the
//! matching task periodically compiles a snapshot and scores it against the
//! template store. The window lock is held for appends and for the compile
//! step only; the expensive matching work runs outside it, so a long cycle
//! never blocks ingestion.
//!
//! Shutdown is cooperative: the watch channel stops ingestion, which in turn
//! stops the matching task after one final cycle over whatever is buffered.
//! Cycles are all-or-nothing; none is interrupted midway.

use crate::config::Config;
use crate::detection::Detection;
use crate::graph::GraphBuilder;
use crate::matcher::Matcher;
use crate::normalizer::{Normalizer, RawRecord};
use crate::templates::TemplateStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Counters accumulated over one engine run.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    pub events_ingested: u64,
    pub events_rejected: u64,
    pub cycles: u64,
    pub detections_emitted: u64,
}

/// The detection engine: normalizer + graph builder + matcher wired through
/// channels.
pub struct Engine {
    builder: GraphBuilder,
    matcher: Matcher,
    normalizer: Normalizer,
    store: Arc<TemplateStore>,
    match_interval: Duration,
}

impl Engine {
    pub fn new(config: &Config, store: Arc<TemplateStore>) -> Self {
        Self {
            builder: GraphBuilder::from_config(config),
            matcher: Matcher::new(&config.matcher),
            normalizer: Normalizer::new(),
            store,
            match_interval: Duration::from_millis(config.engine.match_interval_ms.max(1)),
        }
    }

    /// Run until the raw-record channel closes or the shutdown watch flips,
    /// then finish with one final matching cycle so buffered events are not
    /// silently discarded. Returns the accumulated stats.
    pub async fn run(
        self,
        mut raw_rx: mpsc::Receiver<RawRecord>,
        detection_tx: mpsc::Sender<Vec<Detection>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> EngineStats {
        let Engine {
            builder,
            matcher,
            normalizer,
            store,
            match_interval,
        } = self;
        let builder = Arc::new(Mutex::new(builder));
        // Ingestion flips this when it exits, for any reason; the matching
        // task then runs its final cycle and stops.
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let ingest_builder = Arc::clone(&builder);
        let ingest_task = tokio::spawn(async move {
            let mut ingested = 0u64;
            let mut rejected = 0u64;
            loop {
                tokio::select! {
                    record = raw_rx.recv() => {
                        match record {
                            Some(record) => match normalizer.normalize(&record) {
                                Ok(event) => {
                                    ingest_builder.lock().unwrap().ingest(event);
                                    ingested += 1;
                                }
                                Err(e) => {
                                    rejected += 1;
                                    debug!("Dropped record: {}", e);
                                }
                            },
                            None => {
                                debug!("Record channel closed");
                                break;
                            }
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Shutdown requested");
                            break;
                        }
                    }
                }
            }
            let _ = stop_tx.send(true);
            (ingested, rejected)
        });

        let match_builder = Arc::clone(&builder);
        let match_task = tokio::spawn(async move {
            let mut cycles = 0u64;
            let mut emitted = 0u64;
            let mut ticker = tokio::time::interval(match_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick fires immediately; consume it so the first
            // real cycle runs one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        cycles += 1;
                        emitted += run_cycle(&match_builder, &matcher, &store, &detection_tx, cycles)
                            .await;
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            // Final all-or-nothing cycle over whatever is
                            // buffered.
                            cycles += 1;
                            emitted += run_cycle(&match_builder, &matcher, &store, &detection_tx, cycles)
                                .await;
                            break;
                        }
                    }
                }
            }
            (cycles, emitted)
        });

        let (ingest_result, match_result) = tokio::join!(ingest_task, match_task);
        let (events_ingested, events_rejected) = ingest_result.unwrap_or_default();
        let (cycles, detections_emitted) = match_result.unwrap_or_default();

        let stats = EngineStats {
            events_ingested,
            events_rejected,
            cycles,
            detections_emitted,
        };
        info!(
            "Engine stopped: {} ingested, {} rejected, {} cycles, {} detections",
            stats.events_ingested, stats.events_rejected, stats.cycles, stats.detections_emitted
        );
        stats
    }
}

/// One all-or-nothing matching cycle: compile a consistent snapshot under
/// the window lock, score it outside the lock, send any detections. Returns
/// the number of detections emitted. An empty graph yields zero detections
/// and is not an error.
async fn run_cycle(
    builder: &Mutex<GraphBuilder>,
    matcher: &Matcher,
    store: &TemplateStore,
    detection_tx: &mpsc::Sender<Vec<Detection>>,
    cycle: u64,
) -> u64 {
    let graph = builder.lock().unwrap().compile();
    if graph.is_empty() {
        debug!("Cycle {}: empty graph", cycle);
        return 0;
    }

    let detections = matcher.match_graph(&graph, store);
    debug!(
        "Cycle {}: {} nodes, {} edges, {} detections",
        cycle,
        graph.node_count(),
        graph.edge_count(),
        detections.len()
    );
    if detections.is_empty() {
        return 0;
    }

    let count = detections.len() as u64;
    if detection_tx.send(detections).await.is_err() {
        warn!("Detection receiver dropped");
    }
    count
}
