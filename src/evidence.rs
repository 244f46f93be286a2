//! Evidence extraction: raw events into normalized, comparable evidence.
//!
//! Extraction is pure. The same input always yields the same evidence in the
//! same order, so a batch can be replayed in tests.

use crate::config::ScoringConfig;
use crate::types::{Evidence, RawEvent};
use anyhow::{Context, Result};
use regex_lite::Regex;
use std::collections::{BTreeSet, HashSet};

/// Normalizes raw events and pulls out explicit task references.
#[derive(Debug, Clone)]
pub struct EvidenceExtractor {
    patterns: Vec<Regex>,
}

impl EvidenceExtractor {
    pub fn new(config: &ScoringConfig) -> Result<Self> {
        Self::with_patterns(&config.reference_patterns)
    }

    /// Build from reference patterns. The first capture group of each match is
    /// taken as the referenced task id.
    pub fn with_patterns(patterns: &[String]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid reference pattern {:?}", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Chronological view over `raw`. Cloning the returned iterator restarts it.
    pub fn extract<'a>(&'a self, raw: &'a [RawEvent]) -> Extraction<'a> {
        let mut order: Vec<&RawEvent> = raw.iter().collect();
        order.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });

        // Re-delivered events keep their first occurrence.
        let mut seen = HashSet::new();
        order.retain(|e| seen.insert(e.id.as_str()));

        Extraction {
            extractor: self,
            order,
            pos: 0,
        }
    }

    /// Normalize a single event.
    pub fn normalize(&self, raw: &RawEvent) -> Evidence {
        let trimmed = raw.message.trim();

        let mut references = BTreeSet::new();
        for re in &self.patterns {
            for caps in re.captures_iter(trimmed) {
                if let Some(m) = caps.get(1) {
                    references.insert(m.as_str().to_lowercase());
                }
            }
        }

        Evidence {
            id: raw.id.clone(),
            message: trimmed.to_lowercase(),
            timestamp: raw.timestamp,
            changed: raw.changed.iter().filter_map(|p| normalize_path(p)).collect(),
            references,
        }
    }
}

/// Lazy, finite evidence sequence in `(timestamp, id)` order.
#[derive(Debug, Clone)]
pub struct Extraction<'a> {
    extractor: &'a EvidenceExtractor,
    order: Vec<&'a RawEvent>,
    pos: usize,
}

impl Iterator for Extraction<'_> {
    type Item = Evidence;

    fn next(&mut self) -> Option<Evidence> {
        let raw = self.order.get(self.pos)?;
        self.pos += 1;
        Some(self.extractor.normalize(raw))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.order.len() - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for Extraction<'_> {}

/// Canonical form of a changed-resource path.
///
/// Forward slashes, `.` and `..` resolved, no leading `./` or `/`, lower-cased.
/// Returns `None` for paths that normalize to nothing.
pub fn normalize_path(path: &str) -> Option<String> {
    let unified = path.trim().replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();

    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                // Keep `..` that climbs above the root of the path
                if matches!(parts.last(), Some(last) if *last != "..") {
                    parts.pop();
                } else {
                    parts.push("..");
                }
            }
            name => parts.push(name),
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/").to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> EvidenceExtractor {
        EvidenceExtractor::new(&ScoringConfig::default()).unwrap()
    }

    #[test]
    fn test_normalize_path_components() {
        assert_eq!(normalize_path("./src/Auth.py").as_deref(), Some("src/auth.py"));
        assert_eq!(normalize_path("/src/./lib/../auth.py").as_deref(), Some("src/auth.py"));
        assert_eq!(normalize_path("src\\db\\Schema.sql").as_deref(), Some("src/db/schema.sql"));
        assert_eq!(normalize_path("../outside.txt").as_deref(), Some("../outside.txt"));
        assert_eq!(normalize_path("./"), None);
    }

    #[test]
    fn test_extract_orders_chronologically() {
        let raw = vec![
            RawEvent::new("c", "third", 30, &[]),
            RawEvent::new("b", "second", 20, &[]),
            RawEvent::new("a", "first tie", 20, &[]),
        ];
        let ex = extractor();
        let ids: Vec<String> = ex.extract(&raw).map(|e| e.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_extract_is_restartable() {
        let raw = vec![RawEvent::new("a", "Add README", 1, &["README.md", "./readme.md"])];
        let ex = extractor();
        let run = ex.extract(&raw);
        let first: Vec<Evidence> = run.clone().collect();
        let second: Vec<Evidence> = run.collect();
        assert_eq!(first, second);
        assert_eq!(first[0].changed.len(), 1);
        assert_eq!(first[0].message, "add readme");
    }

    #[test]
    fn test_duplicate_event_ids_are_collapsed() {
        let raw = vec![
            RawEvent::new("a", "one", 1, &[]),
            RawEvent::new("a", "one", 1, &[]),
        ];
        let ex = extractor();
        assert_eq!(ex.extract(&raw).len(), 1);
    }

    #[test]
    fn test_references_are_captured_case_insensitively() {
        let raw = RawEvent::new("a", "Closes TASK-12 and task-7", 1, &[]);
        let ex = EvidenceExtractor::with_patterns(&[r"(?i)\b(task-\d+)\b".to_string()]).unwrap();
        let ev = ex.normalize(&raw);
        let refs: Vec<&str> = ev.references.iter().map(String::as_str).collect();
        assert_eq!(refs, vec!["task-12", "task-7"]);
    }
}
