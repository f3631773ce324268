//! Canonical event types produced by the normalizer.
//!
//! Raw collector records arrive as loosely-typed JSON with several competing
//! field-naming conventions. Everything downstream of the normalizer works
//! with the typed `Event` defined here; spelling variance is resolved exactly
//! once, at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sysmon event id for process creation.
pub const EVENT_ID_PROCESS_CREATE: u32 = 1;
/// Sysmon event id for file creation.
pub const EVENT_ID_FILE_CREATE: u32 = 11;
/// Sysmon event id for registry value set.
pub const EVENT_ID_REGISTRY_SET: u32 = 13;

/// The kind of audit event, discriminated by the collector's event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessCreate,
    FileWrite,
    RegistrySet,
    /// Recognized but graph-irrelevant events (network, image load, DNS, ...).
    Other(u32),
}

impl EventKind {
    /// Map a collector event id to a kind. Registry object create/delete (12)
    /// and rename (14) carry the same target field as value-set (13) and are
    /// folded into `RegistrySet`.
    pub fn from_event_id(id: u32) -> Self {
        match id {
            EVENT_ID_PROCESS_CREATE => EventKind::ProcessCreate,
            EVENT_ID_FILE_CREATE => EventKind::FileWrite,
            12..=14 => EventKind::RegistrySet,
            other => EventKind::Other(other),
        }
    }

    /// The canonical event id for this kind.
    pub fn event_id(&self) -> u32 {
        match self {
            EventKind::ProcessCreate => EVENT_ID_PROCESS_CREATE,
            EventKind::FileWrite => EVENT_ID_FILE_CREATE,
            EventKind::RegistrySet => EVENT_ID_REGISTRY_SET,
            EventKind::Other(id) => *id,
        }
    }
}

/// Kind-specific event fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Process {
        /// Correlating identifier: the collector's process GUID, or one
        /// derived from image + command line when the source omits it.
        process_key: String,
        parent_key: Option<String>,
        image: String,
        command_line: String,
    },
    File {
        process_key: Option<String>,
        /// Image of the writing process, when the collector reports it.
        image: Option<String>,
        target_path: String,
    },
    Registry {
        process_key: Option<String>,
        image: Option<String>,
        target_object: String,
    },
    Other,
}

/// A canonical audit event. Immutable once created; discarded on eviction
/// from the window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// The correlating process key, for any payload that carries one.
    pub fn process_key(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Process { process_key, .. } => Some(process_key),
            EventPayload::File { process_key, .. }
            | EventPayload::Registry { process_key, .. } => process_key.as_deref(),
            EventPayload::Other => None,
        }
    }

    /// The image path associated with the event, if any.
    pub fn image(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Process { image, .. } => Some(image),
            EventPayload::File { image, .. } | EventPayload::Registry { image, .. } => {
                image.as_deref()
            }
            EventPayload::Other => None,
        }
    }

    /// The target path (file path or registry object) of the event, if any.
    pub fn target(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::File { target_path, .. } => Some(target_path),
            EventPayload::Registry { target_object, .. } => Some(target_object),
            _ => None,
        }
    }

    /// Serialize back to the canonical full-record shape. Re-normalizing the
    /// result yields an identical event.
    pub fn to_record(&self) -> Map<String, Value> {
        let mut data = Map::new();
        match &self.payload {
            EventPayload::Process {
                process_key,
                parent_key,
                image,
                command_line,
            } => {
                data.insert("ProcessGuid".into(), Value::String(process_key.clone()));
                if let Some(parent) = parent_key {
                    data.insert("ParentProcessGuid".into(), Value::String(parent.clone()));
                }
                data.insert("Image".into(), Value::String(image.clone()));
                data.insert("CommandLine".into(), Value::String(command_line.clone()));
            }
            EventPayload::File {
                process_key,
                image,
                target_path,
            } => {
                if let Some(key) = process_key {
                    data.insert("ProcessGuid".into(), Value::String(key.clone()));
                }
                if let Some(image) = image {
                    data.insert("Image".into(), Value::String(image.clone()));
                }
                data.insert("TargetFilename".into(), Value::String(target_path.clone()));
            }
            EventPayload::Registry {
                process_key,
                image,
                target_object,
            } => {
                if let Some(key) = process_key {
                    data.insert("ProcessGuid".into(), Value::String(key.clone()));
                }
                if let Some(image) = image {
                    data.insert("Image".into(), Value::String(image.clone()));
                }
                data.insert("TargetObject".into(), Value::String(target_object.clone()));
            }
            EventPayload::Other => {}
        }

        let mut record = Map::new();
        record.insert(
            "EventID".into(),
            Value::Number(self.kind.event_id().into()),
        );
        record.insert(
            "Timestamp".into(),
            Value::String(self.timestamp.to_rfc3339()),
        );
        record.insert("Data".into(), Value::Object(data));
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_mapping() {
        assert_eq!(EventKind::from_event_id(1), EventKind::ProcessCreate);
        assert_eq!(EventKind::from_event_id(11), EventKind::FileWrite);
        assert_eq!(EventKind::from_event_id(12), EventKind::RegistrySet);
        assert_eq!(EventKind::from_event_id(13), EventKind::RegistrySet);
        assert_eq!(EventKind::from_event_id(14), EventKind::RegistrySet);
        assert_eq!(EventKind::from_event_id(3), EventKind::Other(3));
    }

    #[test]
    fn test_event_id_round_trip() {
        assert_eq!(EventKind::ProcessCreate.event_id(), 1);
        assert_eq!(EventKind::Other(22).event_id(), 22);
    }

    #[test]
    fn test_process_key_accessor() {
        let event = Event {
            kind: EventKind::FileWrite,
            timestamp: Utc::now(),
            payload: EventPayload::File {
                process_key: Some("{abc}".into()),
                image: None,
                target_path: "C:\\tmp\\x".into(),
            },
        };
        assert_eq!(event.process_key(), Some("{abc}"));
    }
}
