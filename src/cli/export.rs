//! Export subcommand arguments.

use clap::Args;
use std::path::PathBuf;

/// Arguments for the export subcommand
#[derive(Args, Debug, Default)]
pub struct ExportArgs {
    /// Output file path (default: stdout)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Force gzip compression (auto-detected from .gz extension otherwise)
    #[arg(long)]
    pub gzip: bool,

    /// Leave history snapshots out of the export
    #[arg(long)]
    pub no_history: bool,

    /// Compress when the JSON output exceeds this size (e.g. 100KB, 1MB)
    #[arg(long, value_name = "SIZE")]
    pub compress_threshold: Option<String>,
}

impl ExportArgs {
    pub fn compress_threshold_bytes(&self) -> Option<u64> {
        self.compress_threshold.as_deref().and_then(parse_size)
    }

    /// Compress on `--gzip`, a `.gz` output name, or output above the threshold.
    pub fn should_compress(&self, output_size: u64) -> bool {
        if self.gzip {
            return true;
        }
        if let Some(ref path) = self.output
            && path.extension().is_some_and(|ext| ext == "gz")
        {
            return true;
        }
        self.compress_threshold_bytes()
            .is_some_and(|threshold| output_size > threshold)
    }
}

/// Parse sizes like `512`, `100KB`, `2mb`, `1GB`.
fn parse_size(s: &str) -> Option<u64> {
    let s = s.trim().to_uppercase();
    let (digits, scale) = [("GB", 1u64 << 30), ("MB", 1 << 20), ("KB", 1 << 10), ("B", 1)]
        .into_iter()
        .find_map(|(suffix, scale)| s.strip_suffix(suffix).map(|n| (n.to_string(), scale)))
        .unwrap_or((s.clone(), 1));
    digits.trim().parse::<u64>().ok().map(|n| n * scale)
}
