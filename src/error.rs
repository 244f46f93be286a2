//! Structured error types for tracker operations.

use crate::types::TaskStatus;
use serde::Serialize;
use thiserror::Error;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Not found errors
    NotFound,
    DecisionNotFound,

    // State machine errors
    DependencyViolation,
    InvalidTransition,
    InvalidCriterion,

    // Cursor
    StaleCursor,

    // Plan validation
    InvalidPlan,
}

/// Kind of entity an identifier refers to.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Phase,
    Epic,
    Node,
    Event,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Task => "task",
            EntityKind::Phase => "phase",
            EntityKind::Epic => "epic",
            EntityKind::Node => "node",
            EntityKind::Event => "event",
        };
        f.write_str(s)
    }
}

/// Domain errors raised by the task graph store and the status updater.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackerError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("task {task_id} blocked by: {}", unmet.join(", "))]
    DependencyViolation { task_id: String, unmet: Vec<String> },

    #[error("cannot move task {task_id} from {from} to {to}: {reason}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
        reason: String,
    },

    #[error("task {task_id} has no acceptance criterion {criterion:?}")]
    InvalidCriterion { task_id: String, criterion: String },

    #[error("event {event_id} is at or before the committed cursor")]
    StaleCursor { event_id: String },

    #[error("invalid plan: {reason}")]
    InvalidPlan { reason: String },

    #[error("pending decision not found: {id}")]
    DecisionNotFound { id: u64 },
}

impl TrackerError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TrackerError::NotFound { .. } => ErrorCode::NotFound,
            TrackerError::DependencyViolation { .. } => ErrorCode::DependencyViolation,
            TrackerError::InvalidTransition { .. } => ErrorCode::InvalidTransition,
            TrackerError::InvalidCriterion { .. } => ErrorCode::InvalidCriterion,
            TrackerError::StaleCursor { .. } => ErrorCode::StaleCursor,
            TrackerError::InvalidPlan { .. } => ErrorCode::InvalidPlan,
            TrackerError::DecisionNotFound { .. } => ErrorCode::DecisionNotFound,
        }
    }

    // Convenience constructors

    pub fn task_not_found(id: &str) -> Self {
        TrackerError::NotFound {
            kind: EntityKind::Task,
            id: id.to_string(),
        }
    }

    pub fn not_found(kind: EntityKind, id: &str) -> Self {
        TrackerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn invalid_transition(
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        reason: impl Into<String>,
    ) -> Self {
        TrackerError::InvalidTransition {
            task_id: task_id.to_string(),
            from,
            to,
            reason: reason.into(),
        }
    }

    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        TrackerError::InvalidPlan {
            reason: reason.into(),
        }
    }

    pub fn deps_not_satisfied(task_id: &str, unmet: Vec<String>) -> Self {
        TrackerError::DependencyViolation {
            task_id: task_id.to_string(),
            unmet,
        }
    }

    /// Errors that keep the triggering evidence from counting as processed.
    pub fn blocks_cursor(&self) -> bool {
        matches!(
            self,
            TrackerError::NotFound { .. } | TrackerError::InvalidTransition { .. }
        )
    }
}

/// Result type for tracker operations.
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;
