//! Project export.
//!
//! A full, versioned JSON dump of the committed project, optionally gzip
//! compressed. Exports can be committed to version control and loaded back
//! with `init --plan <export.json>`.

use crate::types::Project;
use anyhow::{Result, anyhow};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

/// Export format version (semver).
pub const EXPORT_VERSION: &str = "1.0.0";

/// Schema version of the database layout the export was taken from.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Oldest schema an export may come from. Fields added since default to empty.
pub const MIN_SCHEMA_VERSION: i32 = 1;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectExport {
    pub schema_version: i32,

    /// Export format version (semver)
    pub export_version: String,

    /// ISO 8601 timestamp of export
    pub exported_at: String,

    /// Tool name and version that created this export
    pub exported_by: String,

    pub project: Project,
}

impl ProjectExport {
    pub fn new(project: Project) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            export_version: EXPORT_VERSION.to_string(),
            exported_at: chrono::Utc::now().to_rfc3339(),
            exported_by: format!("rpi-tracker v{}", env!("CARGO_PKG_VERSION")),
            project,
        }
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Load an export (plain JSON or gzip).
    pub fn from_file(path: &Path) -> Result<Self> {
        let mut bytes = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut bytes)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let export: ProjectExport = if bytes.starts_with(&GZIP_MAGIC) {
            serde_json::from_reader(flate2::read::GzDecoder::new(bytes))?
        } else {
            serde_json::from_slice(bytes)?
        };
        if !export.is_schema_compatible() {
            return Err(anyhow!(
                "export schema version {} is not supported (expected {})",
                export.schema_version,
                CURRENT_SCHEMA_VERSION
            ));
        }
        Ok(export)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serialized bytes, gzip compressed when asked.
    pub fn to_bytes(&self, gzip: bool) -> Result<Vec<u8>> {
        let json = self.to_json_pretty()?;
        if !gzip {
            return Ok(json.into_bytes());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes())?;
        Ok(encoder.finish()?)
    }

    pub fn is_schema_compatible(&self) -> bool {
        (MIN_SCHEMA_VERSION..=CURRENT_SCHEMA_VERSION).contains(&self.schema_version)
    }
}

/// Whether a path names an export rather than a YAML plan.
pub fn is_export_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("json") | Some("gz")
    )
}
