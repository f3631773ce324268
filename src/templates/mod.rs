//! Detection template store.
//!
//! Templates are loaded once at startup from a directory of JSON documents
//! and shared read-only by every matching cycle. One malformed file logs a
//! warning and is skipped; it never aborts loading of the rest.

pub mod signatures;

pub use signatures::{default_signatures, SignatureDef};

use crate::config::TemplateConfig;
use crate::error::EngineError;
use crate::graph::{NodeId, NodeKind, ProvenanceGraph, ProvenanceNode};
use anyhow::Context;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, info, warn};

/// Template file suffix from the offline aggregation pipeline; stripped to
/// recover the technique id.
const GRAPH_FILE_SUFFIX: &str = "_graph_v3.0";

/// Compiled behavioral signature: regex/keyword rules over command lines,
/// process names, and registry paths.
#[derive(Debug)]
pub struct BehavioralSignature {
    pub patterns: Vec<Regex>,
    /// Lowercased process basenames.
    pub processes: Vec<String>,
    pub registry_paths: Vec<Regex>,
}

impl BehavioralSignature {
    /// Compile rule lists. An invalid regex is skipped with a warning and
    /// the rest of the signature stays usable. Returns `None` when nothing
    /// compiles.
    pub fn compile(patterns: &[String], processes: &[String], registry_paths: &[String]) -> Option<Self> {
        let compile_list = |list: &[String]| -> Vec<Regex> {
            list.iter()
                .filter_map(|p| match Regex::new(&format!("(?i){}", p)) {
                    Ok(re) => Some(re),
                    Err(e) => {
                        warn!("Invalid signature pattern '{}': {}", p, e);
                        None
                    }
                })
                .collect()
        };

        let signature = Self {
            patterns: compile_list(patterns),
            processes: processes.iter().map(|p| p.to_lowercase()).collect(),
            registry_paths: compile_list(registry_paths),
        };
        if signature.patterns.is_empty()
            && signature.processes.is_empty()
            && signature.registry_paths.is_empty()
        {
            None
        } else {
            Some(signature)
        }
    }

    fn from_def(def: &SignatureDef) -> Option<Self> {
        Self::compile(&def.patterns, &def.processes, &def.registry_paths)
    }
}

/// One attack-technique template: a reference provenance graph plus an
/// optional behavioral signature.
#[derive(Debug)]
pub struct DetectionTemplate {
    pub technique_id: String,
    pub technique_name: String,
    pub graph: ProvenanceGraph,
    pub signature: Option<BehavioralSignature>,
}

#[derive(Debug, Deserialize)]
struct TemplateDoc {
    #[serde(default)]
    nodes: Vec<NodeDoc>,
    #[serde(default)]
    edges: Vec<EdgeDoc>,
    #[serde(default)]
    metadata: MetadataDoc,
}

#[derive(Debug, Deserialize)]
struct NodeDoc {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    properties: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct EdgeDoc {
    source: String,
    target: String,
    #[serde(default)]
    operations: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct MetadataDoc {
    technique_name: Option<String>,
    behavioral_signature: Option<SignatureDoc>,
}

#[derive(Debug, Deserialize)]
struct SignatureDoc {
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    processes: Vec<String>,
    #[serde(default)]
    registry_paths: Vec<String>,
}

/// Read-only collection of loaded templates, keyed by technique id.
#[derive(Debug, Default)]
pub struct TemplateStore {
    templates: BTreeMap<String, DetectionTemplate>,
}

impl TemplateStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load all templates from the configured directory, then merge the
    /// compiled-in signature definitions. A missing directory is not fatal:
    /// the store still serves the built-in signatures.
    pub fn load(config: &TemplateConfig) -> Self {
        let mut store = Self::default();

        match std::fs::read_dir(&config.dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    match load_template_file(&path) {
                        Ok(template) => {
                            debug!(
                                "Loaded template {}: {} nodes, {} edges",
                                template.technique_id,
                                template.graph.node_count(),
                                template.graph.edge_count()
                            );
                            store
                                .templates
                                .insert(template.technique_id.clone(), template);
                        }
                        Err(e) => warn!("{}", e),
                    }
                }
            }
            Err(e) => {
                warn!(
                    "Template directory {} unreadable: {}",
                    config.dir.display(),
                    e
                );
            }
        }

        if config.builtin_signatures {
            store.merge_builtin_signatures();
        }

        info!("Loaded {} detection templates", store.templates.len());
        store
    }

    /// Build a store from already-constructed templates (tests, embedding).
    pub fn with_templates(templates: Vec<DetectionTemplate>) -> Self {
        Self {
            templates: templates
                .into_iter()
                .map(|t| (t.technique_id.clone(), t))
                .collect(),
        }
    }

    fn merge_builtin_signatures(&mut self) {
        for def in default_signatures() {
            match self.templates.get_mut(&def.technique_id) {
                Some(template) => {
                    if template.signature.is_none() {
                        template.signature = BehavioralSignature::from_def(&def);
                    }
                }
                None => {
                    let signature = BehavioralSignature::from_def(&def);
                    if signature.is_some() {
                        self.templates.insert(
                            def.technique_id.clone(),
                            DetectionTemplate {
                                technique_id: def.technique_id,
                                technique_name: def.technique_name,
                                graph: ProvenanceGraph::new(),
                                signature,
                            },
                        );
                    }
                }
            }
        }
    }

    /// Templates in ascending technique-id order (deterministic).
    pub fn list(&self) -> impl Iterator<Item = &DetectionTemplate> {
        self.templates.values()
    }

    pub fn get(&self, technique_id: &str) -> Option<&DetectionTemplate> {
        self.templates.get(technique_id)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

fn load_template_file(path: &Path) -> Result<DetectionTemplate, EngineError> {
    let parse = || -> anyhow::Result<DetectionTemplate> {
        let content = std::fs::read_to_string(path).context("read failed")?;
        let doc: TemplateDoc = serde_json::from_str(&content).context("parse failed")?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("non-utf8 file name")?;
        let technique_id = stem.strip_suffix(GRAPH_FILE_SUFFIX).unwrap_or(stem);
        Ok(template_from_doc(technique_id, doc))
    };
    parse().map_err(|source| EngineError::TemplateLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Convert a parsed document into a template. Nodes of unknown kind and
/// edges referencing unknown nodes are dropped individually.
fn template_from_doc(technique_id: &str, doc: TemplateDoc) -> DetectionTemplate {
    let mut graph = ProvenanceGraph::new();
    let mut ids: HashMap<String, NodeId> = HashMap::new();

    for node in &doc.nodes {
        let kind = match node.kind.as_str() {
            "Process" => NodeKind::Process,
            "File" => NodeKind::File,
            "Registry" => NodeKind::Registry,
            other => {
                debug!(
                    "Template {}: skipping node '{}' of unknown kind '{}'",
                    technique_id, node.id, other
                );
                continue;
            }
        };
        let id = NodeId::new(kind, node.id.clone());
        let label = prop_str(&node.properties, &["label", "name"])
            .unwrap_or_else(|| node.id.rsplit(':').next().unwrap_or(&node.id).to_string());
        let generalized_path =
            prop_str(&node.properties, &["path", "image", "key"]).unwrap_or_default();

        let mut pnode = ProvenanceNode::new(id.clone(), label, generalized_path);
        if let Some(command_line) = prop_str(&node.properties, &["command_line", "commandline"]) {
            pnode = pnode.with_command_line(command_line);
        }
        graph.upsert_node(pnode);
        ids.insert(node.id.clone(), id);
    }

    for edge in &doc.edges {
        let (Some(source), Some(target)) = (ids.get(&edge.source), ids.get(&edge.target)) else {
            debug!(
                "Template {}: skipping edge {} -> {} with unknown endpoint",
                technique_id, edge.source, edge.target
            );
            continue;
        };
        if edge.operations.is_empty() {
            graph.add_edge(source, target, "UNSPECIFIED");
        } else {
            for operation in &edge.operations {
                graph.add_edge(source, target, operation);
            }
        }
    }

    let signature = doc.metadata.behavioral_signature.as_ref().and_then(|sig| {
        BehavioralSignature::compile(&sig.patterns, &sig.processes, &sig.registry_paths)
    });

    DetectionTemplate {
        technique_id: technique_id.to_string(),
        technique_name: doc
            .metadata
            .technique_name
            .unwrap_or_else(|| technique_id.to_string()),
        graph,
        signature,
    }
}

fn prop_str(properties: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(Value::String(s)) = properties.get(*key) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}
