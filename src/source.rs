//! Event sources: where raw events come from.
//!
//! Sources are outside the core. They may be slow or fail, and they only
//! hand over plain [`RawEvent`]s; stale filtering against the cursor is
//! repeated by the updater regardless of what a source returns.

use crate::types::{EventCursor, RawEvent, Timestamp};
use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub trait EventSource {
    /// Events strictly after `cursor`, in any order.
    fn events_since(&self, cursor: Option<&EventCursor>) -> Result<Vec<RawEvent>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

fn after(cursor: Option<&EventCursor>, event: &RawEvent) -> bool {
    cursor.is_none_or(|c| event.cursor() > *c)
}

/// In-memory events.
#[derive(Debug, Clone, Default)]
pub struct VecEventSource {
    events: Vec<RawEvent>,
}

impl VecEventSource {
    pub fn new(events: Vec<RawEvent>) -> Self {
        Self { events }
    }
}

impl EventSource for VecEventSource {
    fn events_since(&self, cursor: Option<&EventCursor>) -> Result<Vec<RawEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| after(cursor, e))
            .cloned()
            .collect())
    }

    fn describe(&self) -> String {
        format!("{} in-memory events", self.events.len())
    }
}

/// A timestamp either in epoch milliseconds or as RFC 3339 text.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TimestampField {
    Millis(i64),
    Text(String),
}

impl TimestampField {
    fn into_millis(self) -> Result<Timestamp> {
        match self {
            TimestampField::Millis(ms) => Ok(ms),
            TimestampField::Text(s) => chrono::DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.timestamp_millis())
                .with_context(|| format!("invalid timestamp {:?}", s)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonlRecord {
    id: String,
    message: String,
    timestamp: TimestampField,
    #[serde(default)]
    changed: Vec<String>,
    #[serde(default)]
    author: Option<String>,
}

/// One JSON object per line: `{"id", "message", "timestamp", "changed", "author"}`.
#[derive(Debug, Clone)]
pub struct JsonlEventSource {
    path: PathBuf,
}

impl JsonlEventSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn parse(content: &str) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        for (n, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: JsonlRecord = serde_json::from_str(line)
                .with_context(|| format!("line {}: malformed event", n + 1))?;
            events.push(RawEvent {
                id: record.id,
                message: record.message,
                timestamp: record
                    .timestamp
                    .into_millis()
                    .with_context(|| format!("line {}", n + 1))?,
                changed: record.changed,
                author: record.author,
            });
        }
        Ok(events)
    }
}

impl EventSource for JsonlEventSource {
    fn events_since(&self, cursor: Option<&EventCursor>) -> Result<Vec<RawEvent>> {
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read events from {}", self.path.display()))?;
        let events = Self::parse(&content)?;
        debug!(path = %self.path.display(), count = events.len(), "read event file");
        Ok(events.into_iter().filter(|e| after(cursor, e)).collect())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

const RECORD_SEP: char = '\u{1e}';
const FIELD_SEP: char = '\u{1f}';

/// Commits from `git log`, with the files each one touched.
#[derive(Debug, Clone)]
pub struct GitEventSource {
    repo_dir: PathBuf,
    /// Cap on commits read when there is no cursor yet.
    max_count: Option<usize>,
}

impl GitEventSource {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
            max_count: None,
        }
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    fn run_git_log(&self, cursor: Option<&EventCursor>) -> Result<String> {
        let format = format!(
            "--format={r}%H{f}%ct{f}%an{f}%B{f}",
            r = RECORD_SEP,
            f = FIELD_SEP
        );
        let mut cmd = Command::new("git");
        cmd.args(["log", "--name-only", "--no-color", &format]);
        match (cursor, self.max_count) {
            // Commit times have second resolution; the cursor filter below is exact
            (Some(c), _) => {
                cmd.arg(format!("--since=@{}", c.timestamp / 1000));
            }
            (None, Some(n)) => {
                cmd.arg(format!("--max-count={}", n));
            }
            (None, None) => {}
        }

        let output = cmd
            .current_dir(&self.repo_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .context("Failed to spawn git log")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("{}", stderr.trim());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Parse `git log` output produced with the record format above.
    pub fn parse_log(output: &str) -> Result<Vec<RawEvent>> {
        let mut events = Vec::new();
        for record in output.split(RECORD_SEP) {
            if record.trim().is_empty() {
                continue;
            }
            let mut fields = record.splitn(5, FIELD_SEP);
            let (Some(hash), Some(ct), Some(author), Some(body)) =
                (fields.next(), fields.next(), fields.next(), fields.next())
            else {
                bail!("truncated git log record");
            };
            let files = fields.next().unwrap_or_default();
            let seconds: i64 = ct
                .trim()
                .parse()
                .with_context(|| format!("commit {}: bad timestamp {:?}", hash, ct))?;

            events.push(RawEvent {
                id: hash.trim().to_string(),
                message: body.trim().to_string(),
                timestamp: seconds * 1000,
                changed: files
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect(),
                author: Some(author.trim().to_string()).filter(|a| !a.is_empty()),
            });
        }
        Ok(events)
    }
}

impl EventSource for GitEventSource {
    fn events_since(&self, cursor: Option<&EventCursor>) -> Result<Vec<RawEvent>> {
        let output = self.run_git_log(cursor)?;
        let events = Self::parse_log(&output)?;
        debug!(repo = %self.repo_dir.display(), count = events.len(), "read git log");
        Ok(events.into_iter().filter(|e| after(cursor, e)).collect())
    }

    fn describe(&self) -> String {
        format!("git log in {}", self.repo_dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_accepts_millis_and_rfc3339() {
        let content = r#"
{"id":"a","message":"first","timestamp":1000,"changed":["src/a.rs"]}

{"id":"b","message":"second","timestamp":"1970-01-01T00:00:02Z","author":"kim"}
"#;
        let events = JsonlEventSource::parse(content).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].changed, vec!["src/a.rs".to_string()]);
        assert_eq!(events[1].timestamp, 2000);
        assert_eq!(events[1].author.as_deref(), Some("kim"));
    }

    #[test]
    fn test_jsonl_reports_line_number() {
        let err = JsonlEventSource::parse("{\"id\":\"a\"}\n").unwrap_err();
        assert!(format!("{:#}", err).contains("line 1"));
    }

    #[test]
    fn test_parse_git_log_records() {
        let out = format!(
            "{r}abc{f}1700000000{f}Ana{f}feat: complete task-001\n\nbody\n{f}\n\nsrc/auth.py\ntests/test_auth.py\n{r}def{f}1700000100{f}Bo{f}docs{f}\n\nREADME.md\n",
            r = RECORD_SEP,
            f = FIELD_SEP
        );
        let events = GitEventSource::parse_log(&out).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, "abc");
        assert_eq!(events[0].message, "feat: complete task-001\n\nbody");
        assert_eq!(events[0].timestamp, 1_700_000_000_000);
        assert_eq!(events[0].changed, vec!["src/auth.py", "tests/test_auth.py"]);
        assert_eq!(events[1].changed, vec!["README.md"]);
    }

    #[test]
    fn test_vec_source_filters_by_cursor() {
        let source = VecEventSource::new(vec![
            RawEvent::new("a", "one", 10, &[]),
            RawEvent::new("b", "two", 10, &[]),
            RawEvent::new("c", "three", 20, &[]),
        ]);
        let cursor = EventCursor::new(10, "a");
        let ids: Vec<String> = source
            .events_since(Some(&cursor))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }
}
