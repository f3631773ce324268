//! Two-phase hybrid template matcher.
//!
//! Phase 1 scores behavioral signatures over the textual evidence in the
//! live graph; it runs first because it is cheaper and usually higher
//! precision for techniques with a strong command-line fingerprint. A
//! template matched behaviorally is never re-scored structurally. Phase 2
//! attempts an exact bounded subgraph embedding and falls back to a
//! composite topology similarity.

pub mod behavioral;
pub mod isomorphism;

pub use behavioral::GraphEvidence;

use crate::config::MatcherConfig;
use crate::detection::{Detection, MatchType};
use crate::graph::ProvenanceGraph;
use crate::templates::{DetectionTemplate, TemplateStore};
use tracing::debug;

const TYPE_OVERLAP_WEIGHT: f64 = 0.4;
const EDGE_RATIO_WEIGHT: f64 = 0.3;
const STRUCTURAL_RATIO_WEIGHT: f64 = 0.3;

/// Scores live graphs against the template store. Pure read/score; holds no
/// graph state between cycles.
#[derive(Debug)]
pub struct Matcher {
    threshold: f64,
    isomorphism_budget: usize,
}

impl Matcher {
    pub fn new(config: &MatcherConfig) -> Self {
        Self {
            threshold: config.threshold,
            isomorphism_budget: config.isomorphism_budget,
        }
    }

    pub fn with_threshold(threshold: f64) -> Self {
        Self::new(&MatcherConfig {
            threshold,
            ..MatcherConfig::default()
        })
    }

    /// Score the live graph against every template, returning detections
    /// ordered by descending confidence (ties by ascending technique id).
    pub fn match_graph(&self, live: &ProvenanceGraph, store: &TemplateStore) -> Vec<Detection> {
        let mut detections = Vec::new();
        if live.is_empty() {
            return detections;
        }

        let evidence = GraphEvidence::collect(live);
        for template in store.list() {
            if let Some(detection) = self.match_template(live, &evidence, template) {
                debug!(
                    "{} matched {:?} at {:.2}",
                    detection.technique_id, detection.match_type, detection.confidence
                );
                detections.push(detection);
            }
        }

        detections.sort_by(|a, b| a.rank_cmp(b));
        detections
    }

    fn match_template(
        &self,
        live: &ProvenanceGraph,
        evidence: &GraphEvidence,
        template: &DetectionTemplate,
    ) -> Option<Detection> {
        if let Some(signature) = &template.signature {
            let (score, matched) = behavioral::score_signature(signature, evidence);
            if score >= self.threshold {
                return Some(Detection {
                    technique_id: template.technique_id.clone(),
                    technique_name: template.technique_name.clone(),
                    confidence: score,
                    match_type: MatchType::Behavioral,
                    matched_evidence: matched,
                });
            }
        }
        self.match_structural(live, template)
    }

    fn match_structural(
        &self,
        live: &ProvenanceGraph,
        template: &DetectionTemplate,
    ) -> Option<Detection> {
        let template_graph = &template.graph;
        if template_graph.is_empty() {
            return None;
        }

        if template_graph.node_count() <= live.node_count()
            && isomorphism::has_embedding(template_graph, live, self.isomorphism_budget)
        {
            return Some(Detection {
                technique_id: template.technique_id.clone(),
                technique_name: template.technique_name.clone(),
                confidence: 1.0,
                match_type: MatchType::Structural,
                matched_evidence: vec![format!(
                    "Exact embedding: {} nodes, {} edges",
                    template_graph.node_count(),
                    template_graph.edge_count()
                )],
            });
        }

        let score = composite_similarity(live, template_graph);
        if score >= self.threshold {
            Some(Detection {
                technique_id: template.technique_id.clone(),
                technique_name: template.technique_name.clone(),
                confidence: score,
                match_type: MatchType::Structural,
                matched_evidence: vec![format!(
                    "Structural similarity {:.2} ({} live vs {} template nodes)",
                    score,
                    live.node_count(),
                    template_graph.node_count()
                )],
            })
        } else {
            None
        }
    }
}

/// Composite topology similarity:
/// `0.4 * type_overlap + 0.3 * edge_count_ratio + 0.3 * structural_ratio`.
pub fn composite_similarity(live: &ProvenanceGraph, template: &ProvenanceGraph) -> f64 {
    if live.is_empty() || template.is_empty() {
        return 0.0;
    }

    let live_kinds = live.node_kinds();
    let template_kinds = template.node_kinds();
    let intersection = live_kinds.intersection(&template_kinds).count() as f64;
    let union = live_kinds.union(&template_kinds).count() as f64;
    let type_overlap = intersection / union.max(1.0);

    let live_edges = live.edge_count() as f64;
    let template_edges = template.edge_count() as f64;
    let edge_count_ratio = live_edges.min(template_edges) / live_edges.max(template_edges).max(1.0);

    let live_density = live.density();
    let template_density = template.density();
    let structural_ratio = 1.0
        - (live_density - template_density).abs() / live_density.max(template_density).max(1.0);

    let score = TYPE_OVERLAP_WEIGHT * type_overlap
        + EDGE_RATIO_WEIGHT * edge_count_ratio
        + STRUCTURAL_RATIO_WEIGHT * structural_ratio;
    score.min(1.0)
}
