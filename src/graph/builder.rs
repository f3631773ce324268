//! Event window and graph compilation.
//!
//! The builder owns a bounded FIFO window of normalized events. Noise
//! filtering happens at compile time, not at ingest time, so the raw window
//! stays the source of truth and the filtering policy can change without
//! losing data. `compile` folds the current non-noise subset into a fresh
//! [`ProvenanceGraph`] and never mutates the window.

use crate::config::{Config, NoiseConfig};
use crate::event::{Event, EventPayload};
use crate::graph::generalize::PathGeneralizer;
use crate::graph::{
    NodeId, NodeKind, ProvenanceGraph, ProvenanceNode, OP_CREATE_FILE, OP_CREATE_PROCESS,
    OP_SET_REGISTRY,
};
use crate::normalizer::content_hash;
use regex::Regex;
use std::collections::VecDeque;
use tracing::warn;

/// Length of truncated node keys, matching the short-GUID convention used by
/// template files.
const NODE_KEY_LEN: usize = 8;

/// Last path segment of a Windows or POSIX style path.
pub fn path_basename(path: &str) -> &str {
    path.rsplit(['\\', '/']).next().unwrap_or(path)
}

/// Stable key for a process node: the correlation key stripped of braces,
/// truncated. Every event carrying the same correlation key maps to the same
/// node id.
pub fn process_stable_key(process_key: &str) -> String {
    process_key
        .trim_matches(|c| c == '{' || c == '}')
        .chars()
        .take(NODE_KEY_LEN)
        .collect()
}

/// Stable key for a file or registry node: truncated content hash of the
/// generalized target path.
pub fn target_stable_key(generalized_path: &str) -> String {
    content_hash(generalized_path)[..NODE_KEY_LEN].to_string()
}

/// Excludes events from known-benign system processes and known-benign
/// ephemeral files.
#[derive(Debug)]
pub struct NoiseFilter {
    processes: Vec<String>,
    file_patterns: Vec<Regex>,
}

impl NoiseFilter {
    /// Compile the configured lists. Invalid patterns are skipped with a
    /// warning; the rest stay active.
    pub fn new(config: &NoiseConfig) -> Self {
        let file_patterns = config
            .file_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!("Invalid noise pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();
        Self {
            processes: config.processes.iter().map(|p| p.to_lowercase()).collect(),
            file_patterns,
        }
    }

    pub fn is_noise(&self, event: &Event) -> bool {
        if let Some(image) = event.image() {
            let image = image.to_lowercase();
            if self.processes.iter().any(|p| image.contains(p.as_str())) {
                return true;
            }
        }
        if let Some(target) = event.target() {
            let target = target.to_lowercase();
            if self.file_patterns.iter().any(|re| re.is_match(&target)) {
                return true;
            }
        }
        false
    }
}

/// Owns the event window and compiles provenance graph snapshots from it.
#[derive(Debug)]
pub struct GraphBuilder {
    window: VecDeque<Event>,
    capacity: usize,
    noise: NoiseFilter,
    generalizer: PathGeneralizer,
}

impl GraphBuilder {
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.engine.window_capacity,
            NoiseFilter::new(&config.noise),
            PathGeneralizer::new(&config.generalize.to_rules()),
        )
    }

    pub fn new(capacity: usize, noise: NoiseFilter, generalizer: PathGeneralizer) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            noise,
            generalizer,
        }
    }

    /// Append an event to the window, evicting the oldest past capacity.
    /// FIFO, no reordering.
    pub fn ingest(&mut self, event: Event) {
        self.window.push_back(event);
        while self.window.len() > self.capacity {
            self.window.pop_front();
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Events currently in the window, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &Event> {
        self.window.iter()
    }

    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Rewrite a path through the configured generalization rules.
    pub fn generalize_path(&self, path: &str) -> String {
        self.generalizer.generalize(path)
    }

    /// Whether an event is excluded from graph compilation as operational
    /// noise.
    pub fn is_noise(&self, event: &Event) -> bool {
        self.noise.is_noise(event)
    }

    /// Compile the current non-noise subset of the window into a provenance
    /// graph. Events fold in ingest order; a missing path or unresolved
    /// originating process degrades that event, never the compile.
    pub fn compile(&self) -> ProvenanceGraph {
        let mut graph = ProvenanceGraph::new();

        for event in self.window.iter().filter(|e| !self.is_noise(e)) {
            match &event.payload {
                EventPayload::Process {
                    process_key,
                    parent_key,
                    image,
                    command_line,
                } => {
                    let id = NodeId::process(process_stable_key(process_key));
                    let label = if image.is_empty() {
                        "unknown".to_string()
                    } else {
                        path_basename(image).to_string()
                    };
                    graph.upsert_node(
                        ProvenanceNode::new(id.clone(), label, self.generalizer.generalize(image))
                            .with_command_line(self.generalizer.generalize(command_line)),
                    );

                    // A child whose parent has not been resolved in this
                    // graph stays a root; no synthetic edge.
                    if let Some(parent) = parent_key {
                        let parent_id = NodeId::process(process_stable_key(parent));
                        if graph.contains(&parent_id) {
                            graph.add_edge(&parent_id, &id, OP_CREATE_PROCESS);
                        }
                    }
                }
                EventPayload::File {
                    process_key,
                    target_path,
                    ..
                } => {
                    self.fold_target(
                        &mut graph,
                        target_path,
                        process_key.as_deref(),
                        NodeKind::File,
                        OP_CREATE_FILE,
                    );
                }
                EventPayload::Registry {
                    process_key,
                    target_object,
                    ..
                } => {
                    self.fold_target(
                        &mut graph,
                        target_object,
                        process_key.as_deref(),
                        NodeKind::Registry,
                        OP_SET_REGISTRY,
                    );
                }
                EventPayload::Other => {}
            }
        }

        graph.remove_isolated();
        graph
    }

    /// Fold a file or registry event: create the target node and, when the
    /// originating process is already in the graph, the operation edge. A
    /// target without a resolvable origin stays an isolated candidate.
    fn fold_target(
        &self,
        graph: &mut ProvenanceGraph,
        target: &str,
        process_key: Option<&str>,
        kind: NodeKind,
        operation: &str,
    ) {
        if target.is_empty() {
            return;
        }
        let generalized = self.generalizer.generalize(target);
        let id = NodeId::new(kind, target_stable_key(&generalized));
        graph.upsert_node(ProvenanceNode::new(
            id.clone(),
            path_basename(target),
            generalized,
        ));

        if let Some(key) = process_key {
            let origin = NodeId::process(process_stable_key(key));
            if graph.contains(&origin) {
                graph.add_edge(&origin, &id, operation);
            }
        }
    }
}
