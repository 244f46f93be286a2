//! Completion scoring: how strongly a set of evidence says a task is done.
//!
//! The score combines two signals:
//! - a keyword signal, earned when relevant evidence references the task or
//!   uses a completion keyword
//! - a coverage signal, the fraction of acceptance criteria whose resources
//!   were touched (or were already satisfied)
//!
//! Evidence only counts for a task when it is relevant to it: it references
//! the task, or it touches a resource one of the task's criteria names
//! explicitly. The result is independent of evidence order: when a task is
//! auto-completed, the triggering event is the first one, in (timestamp, id)
//! order, at which the running confidence reaches the auto threshold.

use crate::config::ScoringConfig;
use crate::types::{ConfidenceTier, EventCursor, Evidence, Task};
use regex_lite::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// How a criterion is recognized in a changed-resource path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Matcher {
    /// A named file or directory. Matches the path itself or any path ending in it.
    Path(String),
    /// A fragment implied by a criterion word (e.g. "tests" implies "test").
    Fragment(String),
}

impl Matcher {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Matcher::Path(p) if p.ends_with('/') => {
                path.starts_with(p.as_str()) || path.contains(&format!("/{}", p))
            }
            Matcher::Path(p) => path == p || path.ends_with(&format!("/{}", p)),
            Matcher::Fragment(f) => path.contains(f.as_str()),
        }
    }

    fn is_explicit(&self) -> bool {
        matches!(self, Matcher::Path(_))
    }
}

/// Outcome of scoring one task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreResult {
    pub task_id: String,
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub keyword_hit: bool,
    /// Fraction of criteria covered, in [0, 1].
    pub coverage: f64,
    /// Every covered criterion, including previously satisfied ones.
    pub covered: BTreeSet<String>,
    /// Covered criteria not yet recorded on the task.
    pub newly_covered: BTreeSet<String>,
    /// Relevant evidence, in id order.
    pub evidence_ids: Vec<String>,
    /// Resources changed by relevant evidence.
    pub touched: BTreeSet<String>,
    /// Latest relevant evidence.
    pub latest: Option<EventCursor>,
    /// Evidence that pushed confidence over the auto threshold.
    pub triggered_by: Option<EventCursor>,
}

impl ScoreResult {
    pub fn is_relevant(&self) -> bool {
        !self.evidence_ids.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CompletionScorer {
    keywords: Option<Regex>,
    keyword_weight: f64,
    coverage_weight: f64,
    auto_threshold: f64,
    ask_threshold: f64,
    implied: BTreeMap<String, Vec<String>>,
}

impl CompletionScorer {
    pub fn new(config: &ScoringConfig) -> Self {
        let alternatives: Vec<String> = config
            .completion_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .map(|k| regex_lite::escape(&k))
            .collect();

        // Keywords match as word prefixes: "completed" counts for "complete"
        let keywords = if alternatives.is_empty() {
            None
        } else {
            Regex::new(&format!(r"\b(?:{})", alternatives.join("|"))).ok()
        };

        Self {
            keywords,
            keyword_weight: config.keyword_weight,
            coverage_weight: config.coverage_weight,
            auto_threshold: config.auto_threshold,
            ask_threshold: config.ask_threshold,
            implied: config
                .implied_resources
                .iter()
                .map(|(word, frags)| {
                    (
                        word.to_lowercase(),
                        frags.iter().map(|f| f.to_lowercase()).collect(),
                    )
                })
                .collect(),
        }
    }

    /// Three-tier policy shared by every caller.
    pub fn tier_for(&self, confidence: f64) -> ConfidenceTier {
        if confidence >= self.auto_threshold {
            ConfidenceTier::AutoComplete
        } else if confidence >= self.ask_threshold {
            ConfidenceTier::AskConfirmation
        } else {
            ConfidenceTier::Ignore
        }
    }

    /// Resource matchers for one acceptance criterion.
    ///
    /// `file:<path>` tokens and path-like tokens become [`Matcher::Path`];
    /// words that start with an implied-resource key add that key's fragments.
    pub fn criterion_matchers(&self, criterion: &str) -> Vec<Matcher> {
        let lowered = criterion.to_lowercase();
        let mut matchers = Vec::new();

        for raw in lowered.split_whitespace() {
            let token = raw.trim_matches(|c: char| "`'\"()[]{},;".contains(c));
            let (token, explicit) = match token.strip_prefix("file:") {
                Some(rest) => (rest, true),
                None => (token.trim_end_matches(['.', ':']), false),
            };
            if (explicit || looks_like_path(token))
                && let Some(path) = crate::evidence::normalize_path(token)
            {
                let path = if token.ends_with('/') { format!("{}/", path) } else { path };
                push_unique(&mut matchers, Matcher::Path(path));
            }
        }

        for word in lowered.split(|c: char| !c.is_alphanumeric()) {
            if word.is_empty() {
                continue;
            }
            for (key, fragments) in &self.implied {
                if word.starts_with(key.as_str()) {
                    for f in fragments {
                        push_unique(&mut matchers, Matcher::Fragment(f.clone()));
                    }
                }
            }
        }

        matchers
    }

    /// Does this evidence speak about this task at all?
    pub fn is_relevant(&self, task: &Task, evidence: &Evidence) -> bool {
        references_task(task, evidence)
            || task.criteria.iter().any(|c| {
                self.criterion_matchers(c)
                    .iter()
                    .filter(|m| m.is_explicit())
                    .any(|m| evidence.changed.iter().any(|p| m.matches(p)))
            })
    }

    /// Score `task` against the whole evidence set.
    pub fn score(&self, task: &Task, evidence: &[Evidence]) -> ScoreResult {
        let mut relevant: Vec<&Evidence> = evidence
            .iter()
            .filter(|e| self.is_relevant(task, e))
            .collect();
        relevant.sort_by_key(|e| e.cursor());

        let assessment = self.assess(task, &relevant);
        let tier = self.tier_for(assessment.confidence);

        let triggered_by = if tier == ConfidenceTier::AutoComplete {
            (1..=relevant.len())
                .find(|&n| self.assess(task, &relevant[..n]).confidence >= self.auto_threshold)
                .map(|n| relevant[n - 1].cursor())
        } else {
            None
        };

        let evidence_ids: BTreeSet<&str> = relevant.iter().map(|e| e.id.as_str()).collect();
        let touched = relevant
            .iter()
            .flat_map(|e| e.changed.iter().cloned())
            .collect();

        let newly_covered = assessment
            .covered
            .iter()
            .filter(|c| !task.satisfied.contains(*c))
            .cloned()
            .collect();

        ScoreResult {
            task_id: task.id.clone(),
            confidence: assessment.confidence,
            tier,
            keyword_hit: assessment.keyword_hit,
            coverage: assessment.coverage,
            covered: assessment.covered,
            newly_covered,
            evidence_ids: evidence_ids.into_iter().map(String::from).collect(),
            touched,
            latest: relevant.last().map(|e| e.cursor()),
            triggered_by,
        }
    }

    fn assess(&self, task: &Task, relevant: &[&Evidence]) -> Assessment {
        if relevant.is_empty() {
            return Assessment::default();
        }

        let keyword_hit = relevant
            .iter()
            .any(|e| references_task(task, e) || self.has_keyword(&e.message));

        let changed: BTreeSet<&str> = relevant
            .iter()
            .flat_map(|e| e.changed.iter().map(String::as_str))
            .collect();

        let covered: BTreeSet<String> = task
            .criteria
            .iter()
            .filter(|criterion| {
                task.satisfied.contains(*criterion)
                    || self
                        .criterion_matchers(criterion)
                        .iter()
                        .any(|m| changed.iter().any(|p| m.matches(p)))
            })
            .cloned()
            .collect();

        let coverage = if task.criteria.is_empty() {
            0.0
        } else {
            covered.len() as f64 / task.criteria.len() as f64
        };

        let keyword = if keyword_hit { self.keyword_weight } else { 0.0 };
        Assessment {
            confidence: (keyword + self.coverage_weight * coverage).clamp(0.0, 1.0),
            keyword_hit,
            coverage,
            covered,
        }
    }

    fn has_keyword(&self, message: &str) -> bool {
        self.keywords.as_ref().is_some_and(|re| re.is_match(message))
    }
}

#[derive(Debug, Default)]
struct Assessment {
    confidence: f64,
    keyword_hit: bool,
    coverage: f64,
    covered: BTreeSet<String>,
}

/// Captured reference, or the task id appearing as a whole token in the message.
fn references_task(task: &Task, evidence: &Evidence) -> bool {
    let id = task.id.to_lowercase();
    evidence.references.contains(&id) || contains_token(&evidence.message, &id)
}

fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let is_word = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word) && !after.is_some_and(is_word)
    })
}

fn looks_like_path(token: &str) -> bool {
    if token.contains('/') {
        return token.chars().any(|c| c.is_alphanumeric());
    }
    match token.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=8).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
                && ext.chars().any(|c| c.is_ascii_alphabetic())
        }
        None => false,
    }
}

fn push_unique(matchers: &mut Vec<Matcher>, m: Matcher) {
    if !matchers.contains(&m) {
        matchers.push(m);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::EvidenceExtractor;
    use crate::types::RawEvent;

    fn scorer() -> CompletionScorer {
        CompletionScorer::new(&ScoringConfig::default())
    }

    fn evidence(raw: &[RawEvent]) -> Vec<Evidence> {
        EvidenceExtractor::new(&ScoringConfig::default())
            .unwrap()
            .extract(raw)
            .collect()
    }

    fn t1() -> Task {
        Task::new("T1", "feature").with_criteria(["file:a.py modified", "tests added"])
    }

    #[test]
    fn test_matchers_from_criteria() {
        let s = scorer();
        assert_eq!(
            s.criterion_matchers("file:a.py modified"),
            vec![Matcher::Path("a.py".into())]
        );
        assert_eq!(
            s.criterion_matchers("Tests added"),
            vec![Matcher::Fragment("test".into()), Matcher::Fragment("spec".into())]
        );
        assert_eq!(
            s.criterion_matchers("update `src/db/` layout."),
            vec![Matcher::Path("src/db/".into())]
        );
        assert!(s.criterion_matchers("works well").is_empty());
    }

    #[test]
    fn test_path_matcher_accepts_nested_paths() {
        let m = Matcher::Path("a.py".into());
        assert!(m.matches("a.py"));
        assert!(m.matches("src/a.py"));
        assert!(!m.matches("test_a.py"));

        let dir = Matcher::Path("src/db/".into());
        assert!(dir.matches("src/db/schema.rs"));
        assert!(!dir.matches("src/dbx/schema.rs"));
    }

    #[test]
    fn test_full_match_is_auto_complete() {
        let ev = evidence(&[RawEvent::new(
            "e1",
            "feat: complete T1 - add feature",
            100,
            &["a.py", "test_a.py"],
        )]);
        let result = scorer().score(&t1(), &ev);
        assert!(result.keyword_hit);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.tier, ConfidenceTier::AutoComplete);
        assert_eq!(result.newly_covered.len(), 2);
        assert_eq!(result.latest, Some(EventCursor::new(100, "e1")));
        assert_eq!(result.triggered_by, result.latest);
    }

    #[test]
    fn test_unrelated_evidence_is_ignored() {
        let ev = evidence(&[RawEvent::new("e1", "misc cleanup", 1, &["lib/other.rs", "tests/x.rs"])]);
        let result = scorer().score(&t1(), &ev);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.tier, ConfidenceTier::Ignore);
        assert!(!result.is_relevant());
    }

    #[test]
    fn test_file_touch_without_keyword_is_ask() {
        let ev = evidence(&[RawEvent::new("e1", "wip", 1, &["a.py", "tests/test_a.py"])]);
        let result = scorer().score(&t1(), &ev);
        assert!(!result.keyword_hit);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.tier, ConfidenceTier::AskConfirmation);
    }

    #[test]
    fn test_previously_satisfied_criteria_count() {
        let mut task = t1();
        task.satisfied.insert("tests added".into());
        let ev = evidence(&[RawEvent::new("e1", "closes t1", 1, &["a.py"])]);
        let result = scorer().score(&task, &ev);
        assert_eq!(result.coverage, 1.0);
        assert_eq!(
            result.newly_covered.into_iter().collect::<Vec<_>>(),
            vec!["file:a.py modified".to_string()]
        );
    }

    #[test]
    fn test_trigger_is_first_event_over_threshold() {
        let ev = evidence(&[
            RawEvent::new("e3", "tidy a.py", 300, &["a.py"]),
            RawEvent::new("e1", "start T1", 100, &[]),
            RawEvent::new("e2", "complete T1 tests", 200, &["a.py", "tests/test_a.py"]),
        ]);
        let result = scorer().score(&t1(), &ev);
        assert_eq!(result.tier, ConfidenceTier::AutoComplete);
        assert_eq!(result.triggered_by, Some(EventCursor::new(200, "e2")));
        assert_eq!(result.latest, Some(EventCursor::new(300, "e3")));
        assert_eq!(result.touched.len(), 2);
    }

    #[test]
    fn test_ask_tier_has_no_trigger() {
        let ev = evidence(&[RawEvent::new("e1", "wip", 1, &["a.py", "tests/test_a.py"])]);
        let result = scorer().score(&t1(), &ev);
        assert_eq!(result.tier, ConfidenceTier::AskConfirmation);
        assert!(result.triggered_by.is_none());
        assert_eq!(result.latest, Some(EventCursor::new(1, "e1")));
    }

    #[test]
    fn test_id_must_be_a_whole_token() {
        assert!(contains_token("done with task-1.", "task-1"));
        assert!(!contains_token("done with task-12", "task-1"));
        assert!(!contains_token("subtask-1 done", "task-1"));
    }

    #[test]
    fn test_keyword_is_word_prefix() {
        let s = scorer();
        assert!(s.has_keyword("completed the thing"));
        assert!(!s.has_keyword("incomplete work"));
    }

    #[test]
    fn test_tier_boundaries() {
        let s = scorer();
        assert_eq!(s.tier_for(0.70), ConfidenceTier::AutoComplete);
        assert_eq!(s.tier_for(0.69), ConfidenceTier::AskConfirmation);
        assert_eq!(s.tier_for(0.40), ConfidenceTier::AskConfirmation);
        assert_eq!(s.tier_for(0.39), ConfidenceTier::Ignore);
    }
}
