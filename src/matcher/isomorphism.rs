//! Bounded subgraph-isomorphism search (matching phase 2, exact path).
//!
//! A VF2-style backtracking search mapping every template node onto a
//! distinct live node such that every template edge exists between the mapped
//! endpoints. Extra live nodes and edges are allowed: the embedding must be
//! monotone, not induced, which is what makes the exact match robust to
//! incidental benign activity around the attack structure.
//!
//! The search carries an explicit state-expansion budget. Exhausting it
//! means "no exact match", never an error.

use crate::graph::{NodeId, NodeKind, ProvenanceGraph};
use std::collections::{HashMap, HashSet};

/// Two nodes are compatible iff they have the same kind, and, for Process
/// nodes only, an equal case-insensitive label. A side with an empty label
/// acts as a wildcard.
fn compatible(template: &ProvenanceGraph, live: &ProvenanceGraph, t: &NodeId, l: &NodeId) -> bool {
    if t.kind != l.kind {
        return false;
    }
    if t.kind != NodeKind::Process {
        return true;
    }
    let (Some(tn), Some(ln)) = (template.node(t), live.node(l)) else {
        return false;
    };
    tn.label.is_empty() || ln.label.is_empty() || tn.label.eq_ignore_ascii_case(&ln.label)
}

struct SearchState<'a> {
    template: &'a ProvenanceGraph,
    live: &'a ProvenanceGraph,
    /// Template nodes in assignment order, most constrained first.
    order: Vec<NodeId>,
    /// Candidate live nodes, fixed for the whole search.
    live_ids: Vec<NodeId>,
    mapping: HashMap<NodeId, NodeId>,
    used: HashSet<NodeId>,
    remaining_budget: usize,
    exhausted: bool,
}

impl<'a> SearchState<'a> {
    fn search(&mut self, depth: usize) -> bool {
        if depth == self.order.len() {
            return true;
        }
        let t = self.order[depth].clone();

        for i in 0..self.live_ids.len() {
            if self.exhausted {
                return false;
            }
            let l = self.live_ids[i].clone();
            if self.used.contains(&l) || !compatible(self.template, self.live, &t, &l) {
                continue;
            }
            if self.remaining_budget == 0 {
                self.exhausted = true;
                return false;
            }
            self.remaining_budget -= 1;

            if !self.edges_consistent(&t, &l) {
                continue;
            }

            self.mapping.insert(t.clone(), l.clone());
            self.used.insert(l.clone());
            if self.search(depth + 1) {
                return true;
            }
            self.mapping.remove(&t);
            self.used.remove(&l);
        }
        false
    }

    /// Every template edge between `t` and an already-mapped node must exist
    /// between the candidate `l` and that node's image.
    fn edges_consistent(&self, t: &NodeId, l: &NodeId) -> bool {
        for successor in self.template.out_neighbors(t) {
            if let Some(mapped) = self.mapping.get(successor) {
                if !self.live.has_edge(l, mapped) {
                    return false;
                }
            }
        }
        for predecessor in self.template.in_neighbors(t) {
            if let Some(mapped) = self.mapping.get(predecessor) {
                if !self.live.has_edge(mapped, l) {
                    return false;
                }
            }
        }
        true
    }
}

/// Search for an embedding of `template` into `live` within the given
/// state-expansion budget. Returns the template-to-live node mapping when
/// one exists and the budget suffices.
pub fn find_embedding(
    template: &ProvenanceGraph,
    live: &ProvenanceGraph,
    budget: usize,
) -> Option<HashMap<NodeId, NodeId>> {
    if template.is_empty() || template.node_count() > live.node_count() {
        return None;
    }

    // Most-constrained-first ordering keeps backtracking shallow on the
    // sparse graphs this engine sees.
    let mut order: Vec<NodeId> = template.nodes().map(|n| n.id.clone()).collect();
    order.sort_by_key(|id| std::cmp::Reverse(template.degree(id)));

    let mut state = SearchState {
        template,
        live,
        order,
        live_ids: live.nodes().map(|n| n.id.clone()).collect(),
        mapping: HashMap::new(),
        used: HashSet::new(),
        remaining_budget: budget,
        exhausted: false,
    };

    if state.search(0) {
        Some(state.mapping)
    } else {
        None
    }
}

/// Whether an embedding exists within the budget.
pub fn has_embedding(template: &ProvenanceGraph, live: &ProvenanceGraph, budget: usize) -> bool {
    find_embedding(template, live, budget).is_some()
}
