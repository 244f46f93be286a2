//! Core types for the progress tracker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Milliseconds since the Unix epoch (UTC).
pub type Timestamp = i64;

/// Task priority as an integer (higher = more important).
/// Default is 0.
pub type Priority = i32;

/// Milliseconds in one day, used by velocity and duration math.
pub const DAY_MS: i64 = 86_400_000;

/// Status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Partial,
    Completed,
    Blocked,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Partial => "partial",
            TaskStatus::Completed => "completed",
            TaskStatus::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "partial" => Some(TaskStatus::Partial),
            "completed" | "complete" | "done" => Some(TaskStatus::Completed),
            "blocked" => Some(TaskStatus::Blocked),
            _ => None,
        }
    }

    /// Allowed exits from this state. Staying put is always allowed and is
    /// handled by the store as a no-op, so it is not listed here.
    pub fn exits(&self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Pending => &[InProgress, Partial, Completed, Blocked],
            InProgress => &[Pending, Partial, Completed, Blocked],
            Partial => &[Completed, Blocked],
            Blocked => &[InProgress, Partial, Completed],
            Completed => &[],
        }
    }

    /// Check if the state machine allows `self -> to`.
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        *self == to || self.exits().contains(&to)
    }

    /// Work has started on the task but it is not done.
    pub fn is_active(&self) -> bool {
        matches!(self, TaskStatus::InProgress | TaskStatus::Partial)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived status of a phase or epic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Pending,
    InProgress,
    Completed,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Pending => "pending",
            GroupStatus::InProgress => "in_progress",
            GroupStatus::Completed => "completed",
        }
    }
}

/// A task in the project graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    /// Ordered acceptance criteria.
    #[serde(default)]
    pub criteria: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// Tasks that must be completed before this one may be auto-completed.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// Set once, from the evidence timestamp, on transition to completed.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
    /// Acceptance criteria considered satisfied so far (subset of `criteria`).
    #[serde(default)]
    pub satisfied: BTreeSet<String>,
    /// Event that completed the task. `None` for hand overrides and imports.
    #[serde(default)]
    pub completed_by: Option<String>,
    /// Events applied to this task.
    #[serde(default)]
    pub evidence: BTreeSet<String>,
    /// Resources changed by those events.
    #[serde(default)]
    pub touched: BTreeSet<String>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            priority: 0,
            criteria: Vec::new(),
            status: TaskStatus::Pending,
            depends_on: BTreeSet::new(),
            completed_at: None,
            satisfied: BTreeSet::new(),
            completed_by: None,
            evidence: BTreeSet::new(),
            touched: BTreeSet::new(),
        }
    }

    pub fn with_criteria<I, S>(mut self, criteria: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.criteria = criteria.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Merge newly satisfied criteria, ignoring anything that is not one of
    /// this task's criteria. Returns the criteria that were actually added.
    pub fn record_satisfied<'a, I>(&mut self, criteria: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut added = Vec::new();
        for c in criteria {
            if self.criteria.contains(c) && self.satisfied.insert(c.clone()) {
                added.push(c.clone());
            }
        }
        added
    }

    /// Keep the audit trail of events applied to this task.
    pub fn note_evidence<'a, E, P>(&mut self, event_ids: E, paths: P)
    where
        E: IntoIterator<Item = &'a String>,
        P: IntoIterator<Item = &'a String>,
    {
        self.evidence.extend(event_ids.into_iter().cloned());
        self.touched.extend(paths.into_iter().cloned());
    }
}

/// Completion ratio of a group of tasks. Always derived from task statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
}

impl Progress {
    /// Ratio in [0, 1]. An empty group has no progress.
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.completed as f64 / self.total as f64
        }
    }

    /// Whole-number percentage, rounded down like the status files do.
    pub fn percent(&self) -> u32 {
        (self.ratio() * 100.0).floor() as u32
    }

    /// Validated plans have no empty groups, so an empty group is never done.
    pub fn is_done(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }

    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }
}

impl std::ops::Add for Progress {
    type Output = Progress;

    fn add(self, rhs: Progress) -> Progress {
        Progress {
            completed: self.completed + rhs.completed,
            total: self.total + rhs.total,
        }
    }
}

/// A grouping of related tasks within an epic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<Task>,
    /// Set once the phase has been snapshotted and finalized.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl Phase {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            tasks: Vec::new(),
            completed_at: None,
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn progress(&self) -> Progress {
        Progress {
            completed: self.tasks.iter().filter(|t| t.is_completed()).count(),
            total: self.tasks.len(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn status(&self) -> GroupStatus {
        if self.is_finalized() {
            GroupStatus::Completed
        } else if self
            .tasks
            .iter()
            .any(|t| t.status != TaskStatus::Pending)
        {
            GroupStatus::InProgress
        } else {
            GroupStatus::Pending
        }
    }
}

/// The largest unit of project work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Epic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub phases: Vec<Phase>,
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl Epic {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            phases: Vec::new(),
            completed_at: None,
        }
    }

    pub fn with_phases(mut self, phases: Vec<Phase>) -> Self {
        self.phases = phases;
        self
    }

    /// Task-weighted average of phase progress.
    pub fn progress(&self) -> Progress {
        self.phases
            .iter()
            .map(Phase::progress)
            .fold(Progress::default(), |acc, p| acc + p)
    }

    /// All phases finalized (and at least one phase exists).
    pub fn all_phases_completed(&self) -> bool {
        !self.phases.is_empty() && self.phases.iter().all(Phase::is_finalized)
    }

    pub fn status(&self) -> GroupStatus {
        if self.completed_at.is_some() {
            GroupStatus::Completed
        } else if self
            .phases
            .iter()
            .any(|p| p.status() != GroupStatus::Pending)
        {
            GroupStatus::InProgress
        } else {
            GroupStatus::Pending
        }
    }
}

/// Position of the last fully processed event.
///
/// Ordered by timestamp first, then by event id, which gives a total order
/// over events that share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventCursor {
    pub timestamp: Timestamp,
    pub event_id: String,
}

impl EventCursor {
    pub fn new(timestamp: Timestamp, event_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            event_id: event_id.into(),
        }
    }
}

/// A raw event as supplied by an event source (e.g., one commit).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: String,
    pub message: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub changed: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl RawEvent {
    pub fn new(
        id: impl Into<String>,
        message: impl Into<String>,
        timestamp: Timestamp,
        changed: &[&str],
    ) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            timestamp,
            changed: changed.iter().map(|s| s.to_string()).collect(),
            author: None,
        }
    }

    pub fn cursor(&self) -> EventCursor {
        EventCursor::new(self.timestamp, self.id.clone())
    }
}

/// Normalized record derived from one raw event. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evidence {
    pub id: String,
    /// Lower-cased, trimmed message.
    pub message: String,
    pub timestamp: Timestamp,
    /// Canonical changed-resource paths.
    pub changed: BTreeSet<String>,
    /// Explicit task references captured from the message (lower-cased).
    pub references: BTreeSet<String>,
}

impl Evidence {
    pub fn cursor(&self) -> EventCursor {
        EventCursor::new(self.timestamp, self.id.clone())
    }
}

/// Confidence tier derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    AutoComplete,
    AskConfirmation,
    Ignore,
}

impl ConfidenceTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceTier::AutoComplete => "AUTO_COMPLETE",
            ConfidenceTier::AskConfirmation => "ASK_CONFIRMATION",
            ConfidenceTier::Ignore => "IGNORE",
        }
    }
}

/// What a history snapshot captures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SnapshotScope {
    Phase { epic_id: String, phase_id: String },
    Epic { epic_id: String },
}

impl fmt::Display for SnapshotScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotScope::Phase { epic_id, phase_id } => write!(f, "{}/{}", epic_id, phase_id),
            SnapshotScope::Epic { epic_id } => write!(f, "{}", epic_id),
        }
    }
}

/// Span between the first and last task completion in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDuration {
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    /// Calendar-inclusive day count (a single-day span is 1).
    pub days: i64,
}

/// Immutable audit record created when a phase or epic completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub id: String,
    pub scope: SnapshotScope,
    /// Timestamp of the evidence that triggered completion.
    pub created_at: Timestamp,
    /// Full task state at the moment of completion.
    pub tasks: Vec<Task>,
    pub evidence_ids: Vec<String>,
}

impl HistorySnapshot {
    /// Resources changed by any task in the snapshot.
    pub fn changed_resources(&self) -> BTreeSet<&str> {
        self.tasks
            .iter()
            .flat_map(|t| t.touched.iter().map(String::as_str))
            .collect()
    }

    /// Completed tasks ordered by completion time, then declared order.
    pub fn timeline(&self) -> Vec<&Task> {
        let mut done: Vec<&Task> = self.tasks.iter().filter(|t| t.is_completed()).collect();
        done.sort_by_key(|t| t.completed_at);
        done
    }

    pub fn duration(&self) -> Option<SnapshotDuration> {
        let mut times = self.tasks.iter().filter_map(|t| t.completed_at);
        let first = times.next()?;
        let (started_at, finished_at) =
            times.fold((first, first), |(lo, hi), t| (lo.min(t), hi.max(t)));
        Some(SnapshotDuration {
            started_at,
            finished_at,
            days: (finished_at / DAY_MS) - (started_at / DAY_MS) + 1,
        })
    }
}

/// A decision awaiting an explicit response from the confirmation channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingDecision {
    pub id: u64,
    pub task_id: String,
    pub confidence: f64,
    /// Criteria the scorer considers covered.
    pub proposed: Vec<String>,
    pub evidence_ids: Vec<String>,
    /// Resources changed by the contributing evidence.
    #[serde(default)]
    pub changed: Vec<String>,
    /// Latest contributing evidence timestamp; used as completion time on "yes".
    pub evidence_at: Timestamp,
    /// Id of the latest contributing evidence; recorded as `completed_by` on "yes".
    #[serde(default)]
    pub latest_event: Option<String>,
}

/// Applied evidence that referenced ids missing from the plan.
///
/// Kept until acknowledged. Once every reference names a known id the event
/// is replayed by the next batch and dropped from the set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedEvent {
    pub event: RawEvent,
    /// Unknown references, lower-cased.
    pub references: Vec<String>,
}

impl UnresolvedEvent {
    pub fn event_id(&self) -> &str {
        &self.event.id
    }
}

/// Response to a pending decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "answer", content = "criteria", rename_all = "snake_case")]
pub enum DecisionResponse {
    Yes,
    No,
    Partial(Vec<String>),
}

/// The root aggregate. Passed explicitly into every operation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Project {
    #[serde(default)]
    pub epics: Vec<Epic>,
    #[serde(default)]
    pub cursor: Option<EventCursor>,
    #[serde(default)]
    pub history: Vec<HistorySnapshot>,
    #[serde(default)]
    pub pending: Vec<PendingDecision>,
    #[serde(default)]
    pub next_decision_id: u64,
    /// Applied events whose references matched nothing, oldest first.
    #[serde(default)]
    pub unresolved: Vec<UnresolvedEvent>,
}

impl Project {
    pub fn new(epics: Vec<Epic>) -> Self {
        Self {
            epics,
            ..Default::default()
        }
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.epics
            .iter()
            .flat_map(|e| e.phases.iter())
            .flat_map(|p| p.tasks.iter())
    }

    pub fn progress(&self) -> Progress {
        self.epics
            .iter()
            .map(Epic::progress)
            .fold(Progress::default(), |acc, p| acc + p)
    }

    /// Record an unresolved event once. Returns false if it was already recorded.
    pub fn record_unresolved(&mut self, event: UnresolvedEvent) -> bool {
        if self.unresolved.iter().any(|u| u.event.id == event.event.id) {
            return false;
        }
        self.unresolved.push(event);
        true
    }
}
