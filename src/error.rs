//! Engine error taxonomy.
//!
//! Nothing here is fatal to the detection loop: malformed records are dropped
//! and counted, malformed template files are skipped with a warning. The
//! binary's own setup paths use `anyhow` instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A raw record could not be resolved to a canonical event.
    #[error("malformed event: {reason}")]
    MalformedEvent { reason: String },

    /// A template file failed to parse. Other templates load normally.
    #[error("failed to load template {}: {source}", .path.display())]
    TemplateLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        EngineError::MalformedEvent {
            reason: reason.into(),
        }
    }
}
