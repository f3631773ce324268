//! Benchmarks for graph compilation and matching.

use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use provmatch::config::{Config, TemplateConfig};
use provmatch::event::{Event, EventKind, EventPayload};
use provmatch::graph::GraphBuilder;
use provmatch::matcher::Matcher;
use provmatch::templates::TemplateStore;
use std::path::PathBuf;

/// A window of one process tree fanning out into file and registry writes.
fn populated_builder() -> GraphBuilder {
    let mut builder = GraphBuilder::from_config(&Config::default());
    builder.ingest(Event {
        kind: EventKind::ProcessCreate,
        timestamp: Utc::now(),
        payload: EventPayload::Process {
            process_key: "{root}".into(),
            parent_key: None,
            image: "C:\\Windows\\explorer.exe".into(),
            command_line: "explorer.exe".into(),
        },
    });
    for i in 0..20 {
        let key = format!("{{proc-{:02}}}", i);
        builder.ingest(Event {
            kind: EventKind::ProcessCreate,
            timestamp: Utc::now(),
            payload: EventPayload::Process {
                process_key: key.clone(),
                parent_key: Some("{root}".into()),
                image: format!("C:\\apps\\tool{:02}.exe", i),
                command_line: format!("tool{:02}.exe --run", i),
            },
        });
        builder.ingest(Event {
            kind: EventKind::FileWrite,
            timestamp: Utc::now(),
            payload: EventPayload::File {
                process_key: Some(key.clone()),
                image: None,
                target_path: format!("C:\\Users\\bench\\out{:02}.bin", i),
            },
        });
        builder.ingest(Event {
            kind: EventKind::RegistrySet,
            timestamp: Utc::now(),
            payload: EventPayload::Registry {
                process_key: Some(key),
                image: None,
                target_object: format!(
                    "HKCU\\SOFTWARE\\Vendor\\Tool{:02}\\LastRun",
                    i
                ),
            },
        });
    }
    builder
}

fn compile_benchmark(c: &mut Criterion) {
    let builder = populated_builder();
    c.bench_function("compile_61_node_window", |b| {
        b.iter(|| black_box(builder.compile()))
    });
}

fn match_benchmark(c: &mut Criterion) {
    let builder = populated_builder();
    let graph = builder.compile();
    let store = TemplateStore::load(&TemplateConfig {
        dir: PathBuf::from("/nonexistent"),
        builtin_signatures: true,
    });
    let matcher = Matcher::with_threshold(0.5);

    c.bench_function("match_builtin_templates", |b| {
        b.iter(|| black_box(matcher.match_graph(&graph, &store)))
    });
}

criterion_group!(benches, compile_benchmark, match_benchmark);
criterion_main!(benches);
