//! Behavioral signature scoring (matching phase 1).
//!
//! Textual evidence is collected from the live graph once per cycle and
//! scored against each template's signature. Each rule contributes at most
//! once regardless of how many strings it matches.

use crate::graph::builder::path_basename;
use crate::graph::{NodeKind, ProvenanceGraph};
use crate::templates::BehavioralSignature;
use std::collections::HashSet;

/// Weight of one matched command-line pattern.
pub const PATTERN_WEIGHT: f64 = 0.3;
/// Weight of one named process present in the graph.
pub const PROCESS_WEIGHT: f64 = 0.2;
/// Weight of one matched registry-path pattern.
pub const REGISTRY_WEIGHT: f64 = 0.3;

/// Lowercased textual evidence extracted from a live graph.
#[derive(Debug, Default)]
pub struct GraphEvidence {
    command_lines: Vec<String>,
    process_names: HashSet<String>,
    registry_paths: Vec<String>,
}

impl GraphEvidence {
    /// Collect all command lines, process image basenames, and registry
    /// target paths present anywhere in the graph's nodes.
    pub fn collect(graph: &ProvenanceGraph) -> Self {
        let mut evidence = Self::default();
        for node in graph.nodes() {
            match node.id.kind {
                NodeKind::Process => {
                    if let Some(command_line) = &node.command_line {
                        if !command_line.is_empty() {
                            evidence.command_lines.push(command_line.to_lowercase());
                        }
                    }
                    let name = if node.generalized_path.is_empty() {
                        node.label.as_str()
                    } else {
                        path_basename(&node.generalized_path)
                    };
                    if !name.is_empty() {
                        evidence.process_names.insert(name.to_lowercase());
                    }
                }
                NodeKind::Registry => {
                    if !node.generalized_path.is_empty() {
                        evidence
                            .registry_paths
                            .push(node.generalized_path.to_lowercase());
                    }
                }
                NodeKind::File => {}
            }
        }
        evidence
    }

    pub fn is_empty(&self) -> bool {
        self.command_lines.is_empty()
            && self.process_names.is_empty()
            && self.registry_paths.is_empty()
    }
}

/// Score a signature against collected evidence. Returns the capped score
/// and the evidence strings for each rule that fired.
pub fn score_signature(
    signature: &BehavioralSignature,
    evidence: &GraphEvidence,
) -> (f64, Vec<String>) {
    let mut score = 0.0;
    let mut matched = Vec::new();

    for pattern in &signature.patterns {
        if evidence
            .command_lines
            .iter()
            .any(|line| pattern.is_match(line))
        {
            score += PATTERN_WEIGHT;
            matched.push(format!("Pattern: {}", pattern.as_str()));
        }
    }

    for process in &signature.processes {
        if evidence.process_names.contains(process) {
            score += PROCESS_WEIGHT;
            matched.push(format!("Process: {}", process));
        }
    }

    for pattern in &signature.registry_paths {
        if evidence
            .registry_paths
            .iter()
            .any(|path| pattern.is_match(path))
        {
            score += REGISTRY_WEIGHT;
            matched.push(format!("Registry: {}", pattern.as_str()));
        }
    }

    (score.min(1.0), matched)
}
