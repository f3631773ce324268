//! provmatch - Provenance-Graph Intrusion Detection
//!
//! A real-time host-intrusion-detection engine: it consumes a stream of
//! low-level OS audit events, incrementally builds a windowed provenance
//! graph of system activity, and matches that graph against a library of
//! attack-technique templates to raise confidence-scored detections.
//!
//! This library provides the core normalization, graph construction, and
//! matching functionality. The binary in main.rs wires it to an NDJSON
//! record stream.

pub mod config;
pub mod detection;
pub mod engine;
pub mod error;
pub mod event;
pub mod graph;
pub mod matcher;
pub mod normalizer;
pub mod templates;

// Re-export commonly used types
pub use config::Config;
pub use detection::{Detection, MatchType};
pub use engine::{Engine, EngineStats};
pub use error::EngineError;
pub use event::{Event, EventKind, EventPayload};
pub use graph::{GraphBuilder, ProvenanceGraph};
pub use matcher::Matcher;
pub use normalizer::{Normalizer, RawRecord};
pub use templates::{DetectionTemplate, TemplateStore};
