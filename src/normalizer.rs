//! Raw record normalization.
//!
//! Collectors deliver events in two shapes: full Sysmon style with an
//! `EventID` and a `Data` map, and a compact flat style with lowercase field
//! names. Field spellings vary between underscored, compact, and PascalCase
//! forms. `Normalizer::normalize` absorbs all of that variance in one place
//! and emits a typed [`Event`]; no downstream code ever special-cases a
//! spelling.

use crate::error::EngineError;
use crate::event::{Event, EventKind, EventPayload};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// A raw collector record: arbitrary JSON fields.
pub type RawRecord = Map<String, Value>;

const EVENT_ID_KEYS: &[&str] = &["EventID", "event_id", "EventId"];
const TIMESTAMP_KEYS: &[&str] = &["Timestamp", "timestamp", "TimeCreated"];
const IMAGE_KEYS: &[&str] = &["Image", "image"];
const COMMAND_LINE_KEYS: &[&str] = &["CommandLine", "commandline", "commandLine", "command_line"];
const TARGET_FILE_KEYS: &[&str] = &["TargetFilename", "target_filename", "target"];
const TARGET_OBJECT_KEYS: &[&str] = &["TargetObject", "target_object", "target"];
const PROCESS_GUID_KEYS: &[&str] = &["ProcessGuid", "process_guid", "processguid"];
const PARENT_GUID_KEYS: &[&str] = &[
    "ParentProcessGuid",
    "parent_process_guid",
    "parentprocessguid",
];

/// Stateless normalizer; `normalize` is a pure function of its input.
#[derive(Debug, Default)]
pub struct Normalizer;

impl Normalizer {
    pub fn new() -> Self {
        Self
    }

    /// Normalize a raw record into a canonical event.
    ///
    /// A record with no resolvable event id is rejected as malformed; the
    /// caller drops it and continues. A missing timestamp falls back to the
    /// time of normalization rather than rejecting an otherwise usable
    /// record.
    pub fn normalize(&self, record: &RawRecord) -> Result<Event, EngineError> {
        let event_id = resolve_u32(record, EVENT_ID_KEYS)
            .ok_or_else(|| EngineError::malformed("no resolvable event id"))?;
        let kind = EventKind::from_event_id(event_id);

        // Full records keep their fields under `Data`; compact records are
        // flat. Timestamps live at the top level in both shapes.
        let fields = match record.get("Data") {
            Some(Value::Object(data)) => data,
            _ => record,
        };
        let timestamp = resolve_timestamp(record).unwrap_or_else(Utc::now);

        let payload = match kind {
            EventKind::ProcessCreate => {
                let image = resolve_str(fields, IMAGE_KEYS).unwrap_or_default();
                let command_line = resolve_str(fields, COMMAND_LINE_KEYS).unwrap_or_default();
                let guid = resolve_str(fields, PROCESS_GUID_KEYS);
                if guid.is_none() && image.is_empty() && command_line.is_empty() {
                    return Err(EngineError::malformed(
                        "process event carries no identifier",
                    ));
                }
                let process_key =
                    guid.unwrap_or_else(|| derive_process_key(&image, &command_line));
                EventPayload::Process {
                    process_key,
                    parent_key: resolve_str(fields, PARENT_GUID_KEYS),
                    image,
                    command_line,
                }
            }
            EventKind::FileWrite => EventPayload::File {
                process_key: resolve_process_key(fields),
                image: resolve_str(fields, IMAGE_KEYS),
                target_path: resolve_str(fields, TARGET_FILE_KEYS).unwrap_or_default(),
            },
            EventKind::RegistrySet => EventPayload::Registry {
                process_key: resolve_process_key(fields),
                image: resolve_str(fields, IMAGE_KEYS),
                target_object: resolve_str(fields, TARGET_OBJECT_KEYS).unwrap_or_default(),
            },
            EventKind::Other(_) => EventPayload::Other,
        };

        Ok(Event {
            kind,
            timestamp,
            payload,
        })
    }
}

/// Process key for file/registry events: the reported GUID, or one derived
/// from the writing process's image + command line so lineage can still be
/// reconstructed heuristically.
fn resolve_process_key(fields: &RawRecord) -> Option<String> {
    if let Some(guid) = resolve_str(fields, PROCESS_GUID_KEYS) {
        return Some(guid);
    }
    let image = resolve_str(fields, IMAGE_KEYS)?;
    let command_line = resolve_str(fields, COMMAND_LINE_KEYS).unwrap_or_default();
    Some(derive_process_key(&image, &command_line))
}

/// Deterministic stand-in for a missing process GUID: a truncated SHA-256 of
/// image + command line, brace-wrapped to match the GUID shape.
pub fn derive_process_key(image: &str, command_line: &str) -> String {
    let hash = content_hash(&format!("{}|{}", image, command_line));
    format!("{{{}}}", &hash[..16])
}

/// Lowercase hex SHA-256 of a string.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn resolve_str(fields: &RawRecord, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(Value::String(s)) = fields.get(*key) {
            if !s.is_empty() {
                return Some(s.clone());
            }
        }
    }
    None
}

fn resolve_u32(record: &RawRecord, keys: &[&str]) -> Option<u32> {
    for key in keys {
        match record.get(*key) {
            Some(Value::Number(n)) => {
                if let Some(id) = n.as_u64() {
                    return u32::try_from(id).ok();
                }
            }
            Some(Value::String(s)) => {
                if let Ok(id) = s.parse::<u32>() {
                    return Some(id);
                }
            }
            _ => {}
        }
    }
    None
}

fn resolve_timestamp(record: &RawRecord) -> Option<DateTime<Utc>> {
    for key in TIMESTAMP_KEYS {
        match record.get(*key) {
            Some(Value::String(s)) => {
                if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                    return Some(ts.with_timezone(&Utc));
                }
                if let Ok(secs) = s.parse::<i64>() {
                    return DateTime::from_timestamp(secs, 0);
                }
            }
            Some(Value::Number(n)) => {
                if let Some(secs) = n.as_i64() {
                    return DateTime::from_timestamp(secs, 0);
                }
            }
            _ => {}
        }
    }
    None
}
