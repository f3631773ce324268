//! Detection output types.
//!
//! A `Detection` is the sole artifact the engine hands to downstream
//! transport or persistence; it is produced fresh each matching cycle and
//! never stored by the core.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// How a template matched the live graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Behavioral,
    Structural,
}

/// A confidence-scored match of one technique template against the live
/// graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub technique_id: String,
    pub technique_name: String,
    /// Confidence in [0, 1].
    pub confidence: f64,
    pub match_type: MatchType,
    /// Human-readable strings identifying which patterns or structure
    /// triggered the match.
    pub matched_evidence: Vec<String>,
}

impl Detection {
    /// Ranking order: descending confidence, ties broken by ascending
    /// technique id for determinism.
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        other
            .confidence
            .partial_cmp(&self.confidence)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.technique_id.cmp(&other.technique_id))
    }
}
