//! Configuration types and structures.

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub updater: UpdaterConfig,

    #[serde(default)]
    pub report: ReportConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("rpi-tracker/tracker.db")
}

/// Completion scoring configuration.
///
/// Keyword lists and weights are heuristics; everything here is tunable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Words that signal completion in an event message (matched as word prefixes).
    #[serde(default = "default_completion_keywords")]
    pub completion_keywords: Vec<String>,

    /// Patterns whose first capture group is an explicit task reference.
    #[serde(default = "default_reference_patterns")]
    pub reference_patterns: Vec<String>,

    /// Confidence contributed by a task reference or completion keyword.
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,

    /// Confidence contributed by full acceptance-criteria coverage.
    #[serde(default = "default_coverage_weight")]
    pub coverage_weight: f64,

    /// Minimum confidence for automatic completion.
    #[serde(default = "default_auto_threshold")]
    pub auto_threshold: f64,

    /// Minimum confidence for asking for confirmation.
    #[serde(default = "default_ask_threshold")]
    pub ask_threshold: f64,

    /// Criterion words that imply resources, mapped to path fragments that
    /// satisfy them (e.g. "tests added" is covered by any path containing "test").
    #[serde(default = "default_implied_resources")]
    pub implied_resources: BTreeMap<String, Vec<String>>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            completion_keywords: default_completion_keywords(),
            reference_patterns: default_reference_patterns(),
            keyword_weight: default_keyword_weight(),
            coverage_weight: default_coverage_weight(),
            auto_threshold: default_auto_threshold(),
            ask_threshold: default_ask_threshold(),
            implied_resources: default_implied_resources(),
        }
    }
}

fn default_completion_keywords() -> Vec<String> {
    [
        "complete",
        "closes",
        "finish",
        "resolves",
        "milestone",
        "done",
        "fixes",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_reference_patterns() -> Vec<String> {
    vec![r"\b(task-\d+)\b".to_string()]
}

fn default_keyword_weight() -> f64 {
    0.5
}

fn default_coverage_weight() -> f64 {
    0.5
}

fn default_auto_threshold() -> f64 {
    0.70
}

fn default_ask_threshold() -> f64 {
    0.40
}

fn default_implied_resources() -> BTreeMap<String, Vec<String>> {
    let mut map = BTreeMap::new();
    map.insert("test".to_string(), vec!["test".to_string(), "spec".to_string()]);
    map.insert(
        "doc".to_string(),
        vec!["docs/".to_string(), ".md".to_string(), "readme".to_string()],
    );
    map.insert("migration".to_string(), vec!["migration".to_string()]);
    map.insert("schema".to_string(), vec!["schema".to_string()]);
    map
}

impl ScoringConfig {
    /// Validate the scoring configuration.
    pub fn validate(&self) -> Result<()> {
        for (name, w) in [
            ("keyword_weight", self.keyword_weight),
            ("coverage_weight", self.coverage_weight),
            ("auto_threshold", self.auto_threshold),
            ("ask_threshold", self.ask_threshold),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(anyhow!("scoring.{} must be within [0, 1], got {}", name, w));
            }
        }

        if self.ask_threshold > self.auto_threshold {
            return Err(anyhow!(
                "scoring.ask_threshold ({}) must not exceed scoring.auto_threshold ({})",
                self.ask_threshold,
                self.auto_threshold
            ));
        }

        for pattern in &self.reference_patterns {
            let re = regex_lite::Regex::new(pattern)
                .map_err(|e| anyhow!("invalid reference pattern {:?}: {}", pattern, e))?;
            if re.captures_len() < 2 {
                return Err(anyhow!(
                    "reference pattern {:?} needs a capture group for the task id",
                    pattern
                ));
            }
        }

        Ok(())
    }
}

/// Status updater configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Return blocked dependents to work once their dependencies complete.
    #[serde(default = "default_true")]
    pub auto_unblock: bool,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self { auto_unblock: true }
    }
}

fn default_true() -> bool {
    true
}

/// Reporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Trailing window for velocity, in days.
    #[serde(default = "default_window_days")]
    pub window_days: u32,

    /// Maximum number of next recommended tasks.
    #[serde(default = "default_next_limit")]
    pub next_limit: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            next_limit: default_next_limit(),
        }
    }
}

fn default_window_days() -> u32 {
    14
}

fn default_next_limit() -> usize {
    10
}

impl Config {
    /// Load configuration from a single file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        if self.report.window_days == 0 {
            return Err(anyhow!("report.window_days must be at least 1"));
        }
        Ok(())
    }

    /// Ensure the database directory exists.
    pub fn ensure_db_dir(&self) -> Result<()> {
        if let Some(parent) = self.storage.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}
