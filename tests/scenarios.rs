//! Attack Scenario Tests
//!
//! End-to-end tests driving raw records through the normalizer, graph
//! builder, and matcher exactly as the engine does each cycle. Record
//! payloads are sanitized versions of real attack patterns.

use provmatch::config::{Config, TemplateConfig};
use provmatch::graph::{GraphBuilder, NodeKind, OP_CREATE_FILE};
use provmatch::matcher::Matcher;
use provmatch::normalizer::{Normalizer, RawRecord};
use provmatch::templates::TemplateStore;
use provmatch::MatchType;
use serde_json::json;
use std::path::PathBuf;

fn record(value: serde_json::Value) -> RawRecord {
    match value {
        serde_json::Value::Object(map) => map,
        _ => panic!("expected object"),
    }
}

fn builtin_store() -> TemplateStore {
    TemplateStore::load(&TemplateConfig {
        dir: PathBuf::from("/nonexistent"),
        builtin_signatures: true,
    })
}

/// Encoded PowerShell spawning a dropped executable: the canonical
/// two-event scenario.
fn encoded_powershell_records() -> Vec<RawRecord> {
    vec![
        record(json!({
            "EventID": 1,
            "Timestamp": "2024-03-01T10:00:00Z",
            "Data": {
                "ProcessGuid": "{D1E20000-AAAA-BBBB}",
                "ParentProcessGuid": "{00000000-0000-0000}",
                "Image": "C:\\Windows\\System32\\powershell.exe",
                "CommandLine": "powershell.exe -enc AAAA"
            }
        })),
        record(json!({
            "EventID": 11,
            "Timestamp": "2024-03-01T10:00:02Z",
            "Data": {
                "ProcessGuid": "{D1E20000-AAAA-BBBB}",
                "TargetFilename": "C:\\Users\\alice\\AppData\\payload.exe"
            }
        })),
    ]
}

/// Run-key persistence via reg.exe.
fn runkey_persistence_records() -> Vec<RawRecord> {
    vec![
        record(json!({
            "EventID": 1,
            "Timestamp": "2024-03-01T11:00:00Z",
            "Data": {
                "ProcessGuid": "{D1E20000-CCCC-DDDD}",
                "Image": "C:\\Windows\\System32\\reg.exe",
                "CommandLine": "reg.exe add HKCU\\Software\\Microsoft\\Windows\\CurrentVersion\\Run /v upd /d C:\\evil.exe"
            }
        })),
        record(json!({
            "EventID": 13,
            "Timestamp": "2024-03-01T11:00:01Z",
            "Data": {
                "ProcessGuid": "{D1E20000-CCCC-DDDD}",
                "TargetObject": "HKCU\\SOFTWARE\\Microsoft\\Windows\\CurrentVersion\\Run\\upd"
            }
        })),
    ]
}

fn ingest_all(builder: &mut GraphBuilder, records: Vec<RawRecord>) {
    let normalizer = Normalizer::new();
    for raw in records {
        let event = normalizer.normalize(&raw).expect("scenario records are well-formed");
        builder.ingest(event);
    }
}

#[test]
fn test_encoded_powershell_detected_behaviorally() {
    let config = Config::default();
    let mut builder = GraphBuilder::from_config(&config);
    ingest_all(&mut builder, encoded_powershell_records());

    let graph = builder.compile();
    assert_eq!(graph.node_count(), 2);
    assert_eq!(graph.edge_count(), 1);
    assert_eq!(graph.nodes_of_kind(NodeKind::Process).count(), 1);
    assert_eq!(graph.nodes_of_kind(NodeKind::File).count(), 1);

    let edge = graph.edges().next().unwrap();
    assert!(edge.operations.contains(OP_CREATE_FILE));

    let store = builtin_store();
    let detections = Matcher::with_threshold(0.3).match_graph(&graph, &store);

    let ps = detections
        .iter()
        .find(|d| d.technique_id == "T1059.001")
        .expect("encoded powershell must be detected");
    assert_eq!(ps.match_type, MatchType::Behavioral);
    assert!(ps.confidence >= 0.3);
    assert!(ps
        .matched_evidence
        .iter()
        .any(|e| e.starts_with("Pattern:")));
}

#[test]
fn test_runkey_persistence_detected() {
    let config = Config::default();
    let mut builder = GraphBuilder::from_config(&config);
    ingest_all(&mut builder, runkey_persistence_records());

    let graph = builder.compile();
    assert_eq!(graph.node_count(), 2);

    let store = builtin_store();
    let detections = Matcher::with_threshold(0.5).match_graph(&graph, &store);

    // reg.exe add + CurrentVersion\Run target clear both registry-themed
    // signatures.
    assert!(detections.iter().any(|d| d.technique_id == "T1112"));
    assert!(detections.iter().any(|d| d.technique_id == "T1547.001"));
    for d in &detections {
        assert_eq!(d.match_type, MatchType::Behavioral);
    }
}

#[test]
fn test_detections_ranked_by_confidence() {
    let config = Config::default();
    let mut builder = GraphBuilder::from_config(&config);
    ingest_all(&mut builder, encoded_powershell_records());
    ingest_all(&mut builder, runkey_persistence_records());

    let graph = builder.compile();
    let store = builtin_store();
    let detections = Matcher::with_threshold(0.3).match_graph(&graph, &store);

    assert!(detections.len() >= 2);
    for pair in detections.windows(2) {
        assert!(
            pair[0].confidence >= pair[1].confidence,
            "detections must be ordered by descending confidence"
        );
    }
}

#[test]
fn test_benign_activity_raises_nothing() {
    let config = Config::default();
    let mut builder = GraphBuilder::from_config(&config);
    ingest_all(
        &mut builder,
        vec![
            record(json!({
                "EventID": 1,
                "Timestamp": "2024-03-01T09:00:00Z",
                "Data": {
                    "ProcessGuid": "{BENIGN00-0000-0001}",
                    "Image": "C:\\Program Files\\Editor\\editor.exe",
                    "CommandLine": "editor.exe notes.txt"
                }
            })),
            record(json!({
                "EventID": 11,
                "Timestamp": "2024-03-01T09:00:05Z",
                "Data": {
                    "ProcessGuid": "{BENIGN00-0000-0001}",
                    "TargetFilename": "C:\\Users\\carol\\Documents\\notes.txt"
                }
            })),
        ],
    );

    let graph = builder.compile();
    assert!(!graph.is_empty());

    let store = builtin_store();
    let detections = Matcher::with_threshold(0.5).match_graph(&graph, &store);
    assert!(
        detections.is_empty(),
        "benign editor activity matched: {:?}",
        detections
    );
}

#[test]
fn test_noise_processes_never_reach_the_graph() {
    let config = Config::default();
    let mut builder = GraphBuilder::from_config(&config);
    ingest_all(
        &mut builder,
        vec![
            record(json!({
                "EventID": 1,
                "Timestamp": "2024-03-01T09:00:00Z",
                "Data": {
                    "ProcessGuid": "{NOISE000-0000-0001}",
                    "Image": "C:\\Windows\\System32\\svchost.exe",
                    "CommandLine": "svchost.exe -k netsvcs"
                }
            })),
            record(json!({
                "EventID": 11,
                "Timestamp": "2024-03-01T09:00:01Z",
                "Data": {
                    "ProcessGuid": "{NOISE000-0000-0001}",
                    "TargetFilename": "C:\\Windows\\Temp\\trace.etl"
                }
            })),
        ],
    );

    // Raw window still holds both events; the compiled graph holds neither.
    assert_eq!(builder.window_len(), 2);
    assert!(builder.compile().is_empty());
}

#[test]
fn test_compact_collector_records_work_end_to_end() {
    let config = Config::default();
    let mut builder = GraphBuilder::from_config(&config);
    ingest_all(
        &mut builder,
        vec![
            record(json!({
                "event_id": 1,
                "timestamp": "2024-03-01T12:00:00Z",
                "process_guid": "{COMPACT0-0000-0001}",
                "image": "C:\\Windows\\System32\\rundll32.exe",
                "commandline": "rundll32.exe javascript:alert"
            })),
            record(json!({
                "event_id": 11,
                "timestamp": "2024-03-01T12:00:01Z",
                "process_guid": "{COMPACT0-0000-0001}",
                "target": "C:\\Users\\dave\\stage.dll"
            })),
        ],
    );

    let graph = builder.compile();
    assert_eq!(graph.node_count(), 2);

    let store = builtin_store();
    let detections = Matcher::with_threshold(0.5).match_graph(&graph, &store);
    let rundll = detections
        .iter()
        .find(|d| d.technique_id == "T1218.011")
        .expect("rundll32 proxy execution must be detected");
    assert_eq!(rundll.match_type, MatchType::Behavioral);
}
