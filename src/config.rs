//! TOML-based configuration for the detection engine.
//!
//! Noise lists and path-generalization rules are versioned configuration
//! data: the tables below are compiled-in defaults that a config file can
//! override without touching matching code.

use crate::graph::generalize::GeneralizeRule;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_WINDOW_CAPACITY: usize = 1000;
const DEFAULT_MATCH_INTERVAL_MS: u64 = 2000;
const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
const DEFAULT_THRESHOLD: f64 = 0.5;
const DEFAULT_ISOMORPHISM_BUDGET: usize = 200_000;
const DEFAULT_TEMPLATE_DIR: &str = "templates";

/// Benign system processes whose events never reach the graph.
const NOISE_PROCESSES: &[&str] = &[
    "svchost.exe",
    "conhost.exe",
    "chcp.com",
    "taskhostw.exe",
    "backgroundtaskhost.exe",
];

/// Ephemeral file patterns with no detection value.
const NOISE_FILE_PATTERNS: &[&str] = &[
    "psscriptpolicytest",
    r"\.tmp$",
    r"\.etl$",
    r"desktop\.ini",
];

/// Path generalization rules, most-specific pattern first.
const GENERALIZE_RULES: &[(&str, &str)] = &[
    (r"C:\\Users\\[^\\]+", "%USERPROFILE%"),
    (r"C:\\Program Files( \(x86\))?", "%PROGRAMFILES%"),
    (r"C:\\ProgramData", "%PROGRAMDATA%"),
    (r"C:\\Windows", "%WINDIR%"),
];

fn to_string_vec(arr: &[&str]) -> Vec<String> {
    arr.iter().map(|s| s.to_string()).collect()
}

/// The compiled-in generalization rule table.
pub fn default_generalize_rules() -> Vec<GeneralizeRule> {
    GENERALIZE_RULES
        .iter()
        .map(|(pattern, replacement)| GeneralizeRule {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub matcher: MatcherConfig,
    #[serde(default)]
    pub noise: NoiseConfig,
    #[serde(default)]
    pub generalize: GeneralizeConfig,
    #[serde(default)]
    pub templates: TemplateConfig,
}

/// Window and scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum events retained in the window (FIFO eviction past this).
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    /// Interval between matching cycles, in milliseconds.
    #[serde(default = "default_match_interval_ms")]
    pub match_interval_ms: u64,
    /// Bound on the raw-record and detection channels.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            match_interval_ms: DEFAULT_MATCH_INTERVAL_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Matching thresholds and bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Minimum confidence for a detection to be reported.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    /// State-expansion budget for the exact subgraph-isomorphism search.
    /// Exceeding it counts as "no exact match", never as an error.
    #[serde(default = "default_isomorphism_budget")]
    pub isomorphism_budget: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            isomorphism_budget: DEFAULT_ISOMORPHISM_BUDGET,
        }
    }
}

/// Noise filtering lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoiseConfig {
    /// Process image basenames (substring match, case-insensitive).
    #[serde(default = "default_noise_processes")]
    pub processes: Vec<String>,
    /// Target path patterns (regex, case-insensitive).
    #[serde(default = "default_noise_file_patterns")]
    pub file_patterns: Vec<String>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            processes: default_noise_processes(),
            file_patterns: default_noise_file_patterns(),
        }
    }
}

/// Path generalization rules, applied in order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralizeConfig {
    #[serde(default = "default_rules")]
    pub rules: Vec<SerializedRule>,
}

impl Default for GeneralizeConfig {
    fn default() -> Self {
        Self {
            rules: default_rules(),
        }
    }
}

impl GeneralizeConfig {
    pub fn to_rules(&self) -> Vec<GeneralizeRule> {
        self.rules
            .iter()
            .map(|r| GeneralizeRule {
                pattern: r.pattern.clone(),
                replacement: r.replacement.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerializedRule {
    pub pattern: String,
    pub replacement: String,
}

/// Template store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Directory holding template JSON files.
    #[serde(default = "default_template_dir")]
    pub dir: PathBuf,
    /// Attach compiled-in behavioral signatures to techniques whose template
    /// files carry none.
    #[serde(default = "default_true")]
    pub builtin_signatures: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            dir: default_template_dir(),
            builtin_signatures: true,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration, falling back to defaults if the file is missing
    /// or malformed.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("Using default config: {:#}", e);
                Self::default()
            }
        }
    }
}

fn default_window_capacity() -> usize {
    DEFAULT_WINDOW_CAPACITY
}

fn default_match_interval_ms() -> u64 {
    DEFAULT_MATCH_INTERVAL_MS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

fn default_isomorphism_budget() -> usize {
    DEFAULT_ISOMORPHISM_BUDGET
}

fn default_noise_processes() -> Vec<String> {
    to_string_vec(NOISE_PROCESSES)
}

fn default_noise_file_patterns() -> Vec<String> {
    to_string_vec(NOISE_FILE_PATTERNS)
}

fn default_rules() -> Vec<SerializedRule> {
    GENERALIZE_RULES
        .iter()
        .map(|(pattern, replacement)| SerializedRule {
            pattern: pattern.to_string(),
            replacement: replacement.to_string(),
        })
        .collect()
}

fn default_template_dir() -> PathBuf {
    PathBuf::from(DEFAULT_TEMPLATE_DIR)
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.window_capacity, 1000);
        assert_eq!(config.engine.match_interval_ms, 2000);
        assert!((config.matcher.threshold - 0.5).abs() < f64::EPSILON);
        assert!(!config.noise.processes.is_empty());
        assert_eq!(config.generalize.rules.len(), 4);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            window_capacity = 50

            [matcher]
            threshold = 0.7
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.window_capacity, 50);
        assert_eq!(config.engine.match_interval_ms, 2000);
        assert!((config.matcher.threshold - 0.7).abs() < f64::EPSILON);
        assert!(config.templates.builtin_signatures);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = Config::load_or_default(Path::new("/nonexistent/provmatch.toml"));
        assert_eq!(config.engine.window_capacity, 1000);
    }
}
