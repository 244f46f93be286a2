//! Output formatting utilities for markdown and JSON.

use crate::report::{NextTask, ProjectReport, Projection};
use crate::types::{
    GroupStatus, HistorySnapshot, PendingDecision, SnapshotScope, TaskStatus, Timestamp,
    UnresolvedEvent,
};
use crate::updater::{BatchReport, OutcomeAction};
use anyhow::Result;
use serde::Serialize;

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    Json,
    #[default]
    Markdown,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(OutputFormat::Json),
            "markdown" | "md" => Some(OutputFormat::Markdown),
            _ => None,
        }
    }
}

/// Pretty JSON for any serializable result.
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Render a timestamp as a UTC date.
pub fn format_date(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn status_mark(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Completed => "[x]",
        TaskStatus::InProgress | TaskStatus::Partial => "[~]",
        TaskStatus::Blocked => "[!]",
        TaskStatus::Pending => "[ ]",
    }
}

fn group_label(status: GroupStatus) -> &'static str {
    match status {
        GroupStatus::Pending => "Pending",
        GroupStatus::InProgress => "In Progress",
        GroupStatus::Completed => "Completed",
    }
}

/// Full project status, in the layout of a STATUS.md file.
pub fn format_report_markdown(report: &ProjectReport) -> String {
    let mut md = String::new();

    md.push_str("# Project Status\n\n");
    md.push_str(&format!("**Overall Completion**: {}%\n", report.percent));
    md.push_str(&format!(
        "**Completed**: {} / {}\n",
        report.progress.completed, report.progress.total
    ));
    md.push_str(&format!(
        "**Last Updated**: [{}]\n",
        format_date(report.generated_at)
    ));
    md.push_str(&format!(
        "**Velocity**: {:.2} tasks/day over {} days\n",
        report.velocity.per_day, report.velocity.window_days
    ));
    md.push_str(&format!("**Projected Completion**: {}\n", format_projection(&report.projection)));
    if report.pending_decisions > 0 {
        md.push_str(&format!(
            "**Pending Decisions**: {}\n",
            report.pending_decisions
        ));
    }

    for epic in &report.epics {
        md.push_str(&format!(
            "\n## {}: {} ({}%, {})\n",
            epic.id,
            epic.title,
            epic.percent,
            group_label(epic.status)
        ));
        for phase in &epic.phases {
            md.push_str(&format!(
                "\n### {}: {} ({} / {}, {})\n\n",
                phase.id,
                phase.title,
                phase.progress.completed,
                phase.progress.total,
                group_label(phase.status)
            ));
            for task in &phase.tasks {
                md.push_str(&format!(
                    "- {} `{}` {}",
                    status_mark(task.status),
                    task.id,
                    task.title
                ));
                if task.criteria_total > 0 && task.status != TaskStatus::Completed {
                    md.push_str(&format!(
                        " ({}/{} criteria)",
                        task.criteria_satisfied, task.criteria_total
                    ));
                }
                if let Some(at) = task.completed_at {
                    md.push_str(&format!(" - done {}", format_date(at)));
                }
                if !task.blocked_by.is_empty() && task.status != TaskStatus::Completed {
                    let blockers: Vec<String> =
                        task.blocked_by.iter().map(|id| format!("`{}`", id)).collect();
                    md.push_str(&format!(" - blocked by {}", blockers.join(", ")));
                }
                md.push('\n');
            }
        }
    }

    if !report.next.is_empty() {
        md.push_str("\n## Next Tasks\n\n");
        md.push_str(&format_next_markdown(&report.next));
    }

    md
}

pub fn format_projection(projection: &Projection) -> String {
    match projection {
        Projection::Done { at } => format!("done ({})", format_date(*at)),
        Projection::Projected { at, days_remaining } => {
            format!("{} (~{:.1} days)", format_date(*at), days_remaining)
        }
        Projection::Undefined => "undefined (no completions in window)".to_string(),
    }
}

pub fn format_next_markdown(next: &[NextTask]) -> String {
    if next.is_empty() {
        return "No tasks are ready.\n".to_string();
    }
    let mut md = String::new();
    for (i, task) in next.iter().enumerate() {
        md.push_str(&format!(
            "{}. `{}` {} [{}] - {}/{}",
            i + 1,
            task.id,
            task.title,
            task.status,
            task.epic_id,
            task.phase_id
        ));
        if task.priority != 0 {
            md.push_str(&format!(" (priority {})", task.priority));
        }
        md.push('\n');
    }
    md
}

pub fn format_batch_markdown(report: &BatchReport) -> String {
    let mut md = String::new();
    md.push_str("# Update\n\n");
    md.push_str(&format!("- **processed**: {}\n", report.processed));
    if report.stale_skipped > 0 {
        md.push_str(&format!("- **already seen**: {}\n", report.stale_skipped));
    }
    if !report.retried.is_empty() {
        md.push_str(&format!("- **replayed**: {}\n", report.retried.join(", ")));
    }
    if let Some(ref cursor) = report.cursor_after {
        md.push_str(&format!(
            "- **cursor**: `{}` ({})\n",
            cursor.event_id,
            format_date(cursor.timestamp)
        ));
    }

    if !report.outcomes.is_empty() {
        md.push_str("\n## Tasks\n\n");
        for o in &report.outcomes {
            let action = match &o.action {
                OutcomeAction::Completed => "completed".to_string(),
                OutcomeAction::DependencyViolation { unmet, status } => {
                    format!("{} (waiting on {})", status, unmet.join(", "))
                }
                OutcomeAction::Queued { decision_id } => {
                    format!("needs confirmation (decision {})", decision_id)
                }
                OutcomeAction::Partial => "partial".to_string(),
                OutcomeAction::Dismissed => "dismissed".to_string(),
                OutcomeAction::Ignored => "ignored".to_string(),
                OutcomeAction::Rejected { error } => format!("rejected: {}", error),
            };
            md.push_str(&format!(
                "- `{}` {:.2} {}: {}\n",
                o.task_id,
                o.confidence,
                o.tier.as_str(),
                action
            ));
        }
    }

    if !report.unblocked.is_empty() {
        md.push_str(&format!("\n**Unblocked**: {}\n", report.unblocked.join(", ")));
    }
    if !report.snapshots_created.is_empty() {
        md.push_str(&format!(
            "\n**Snapshots**: {}\n",
            report.snapshots_created.join(", ")
        ));
    }
    if !report.unresolved.is_empty() {
        md.push_str("\n## Unresolved\n\n");
        for u in &report.unresolved {
            md.push_str(&format!("- `{}`: {}\n", u.event_id, u.error));
        }
        md.push_str("\nAcknowledge with `rpi-tracker ack <event>` once reviewed.\n");
    }
    md
}

pub fn format_unresolved_markdown(unresolved: &[UnresolvedEvent]) -> String {
    if unresolved.is_empty() {
        return "No unresolved events.\n".to_string();
    }
    let mut md = String::new();
    md.push_str(&format!("# Unresolved Events ({})\n\n", unresolved.len()));
    for u in unresolved {
        let refs: Vec<String> = u.references.iter().map(|r| format!("`{}`", r)).collect();
        md.push_str(&format!(
            "- `{}` ({}) references {}: {}\n",
            u.event.id,
            format_date(u.event.timestamp),
            refs.join(", "),
            u.event.message.lines().next().unwrap_or_default()
        ));
    }
    md
}

pub fn format_pending_markdown(pending: &[PendingDecision]) -> String {
    if pending.is_empty() {
        return "No pending decisions.\n".to_string();
    }
    let mut md = String::new();
    md.push_str(&format!("# Pending Decisions ({})\n\n", pending.len()));
    for d in pending {
        md.push_str(&format!(
            "- **{}** `{}` confidence {:.2}, evidence {} ({} files)\n",
            d.id,
            d.task_id,
            d.confidence,
            d.evidence_ids.join(", "),
            d.changed.len()
        ));
        for c in &d.proposed {
            md.push_str(&format!("  - {}\n", c));
        }
    }
    md
}

pub fn format_history_markdown(history: &[HistorySnapshot]) -> String {
    if history.is_empty() {
        return "No history snapshots.\n".to_string();
    }
    let mut md = String::new();
    md.push_str(&format!("# History ({})\n\n", history.len()));
    for snap in history {
        md.push_str(&format!(
            "- **{}** {} completed {} ({} tasks, {} events",
            snap.id,
            snap.scope,
            format_date(snap.created_at),
            snap.tasks.len(),
            snap.evidence_ids.len()
        ));
        if let Some(d) = snap.duration() {
            md.push_str(&format!(", {} days", d.days));
        }
        md.push_str(")\n");
    }
    md
}

/// One snapshot in full: overview, metrics, timeline and task list.
pub fn format_snapshot_markdown(snap: &HistorySnapshot) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Snapshot {}\n\n## Overview\n\n", snap.id));
    let kind = match snap.scope {
        SnapshotScope::Phase { .. } => "phase",
        SnapshotScope::Epic { .. } => "epic",
    };
    md.push_str(&format!("- **Scope**: {} `{}`\n", kind, snap.scope));
    md.push_str(&format!("- **Created**: {}\n", format_date(snap.created_at)));
    if let Some(d) = snap.duration() {
        md.push_str(&format!(
            "- **Duration**: {} to {} ({} days)\n",
            format_date(d.started_at),
            format_date(d.finished_at),
            d.days
        ));
    }

    let timeline = snap.timeline();
    md.push_str("\n## Metrics\n\n");
    md.push_str(&format!(
        "- **Tasks**: {} / {} completed\n",
        timeline.len(),
        snap.tasks.len()
    ));
    md.push_str(&format!("- **Evidence**: {} events\n", snap.evidence_ids.len()));
    md.push_str(&format!(
        "- **Files changed**: {}\n",
        snap.changed_resources().len()
    ));

    if !timeline.is_empty() {
        md.push_str("\n## Timeline\n\n");
        for task in &timeline {
            let when = task.completed_at.map(format_date).unwrap_or_else(|| "undated".into());
            let by = match &task.completed_by {
                Some(event) => format!("by `{}`", event),
                None => "manual".to_string(),
            };
            md.push_str(&format!("- {} `{}` {} ({})\n", when, task.id, task.title, by));
        }
    }

    md.push_str("\n## Tasks\n\n");
    for task in &snap.tasks {
        md.push_str(&format!(
            "- {} `{}` {}",
            status_mark(task.status),
            task.id,
            task.title
        ));
        if !task.criteria.is_empty() {
            md.push_str(&format!(
                " ({}/{} criteria)",
                task.satisfied.len(),
                task.criteria.len()
            ));
        }
        md.push('\n');
        if !task.evidence.is_empty() {
            let ids: Vec<&str> = task.evidence.iter().map(String::as_str).collect();
            md.push_str(&format!("  - evidence: {}\n", ids.join(", ")));
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::report::Reporter;
    use crate::types::{ConfidenceTier, DAY_MS, EventCursor, Epic, Phase, Project, RawEvent, Task};
    use crate::updater::{TaskOutcome, UnresolvedEvidence};
    use crate::error::TrackerError;

    fn snapshot() -> HistorySnapshot {
        let mut login = Task::new("task-001", "Login")
            .with_criteria(["file:src/auth.py modified", "tests added"])
            .with_status(TaskStatus::Completed);
        login.completed_at = Some(DAY_MS * 2);
        login.completed_by = Some("e2".into());
        login.satisfied.extend(login.criteria.clone());
        login.note_evidence(
            &["e1".to_string(), "e2".to_string()],
            &["src/auth.py".to_string(), "tests/test_auth.py".to_string()],
        );
        let mut setup = Task::new("task-000", "Setup").with_status(TaskStatus::Completed);
        setup.completed_at = Some(DAY_MS);

        HistorySnapshot {
            id: "snap-0001".into(),
            scope: SnapshotScope::Phase {
                epic_id: "epic-001".into(),
                phase_id: "phase-1".into(),
            },
            created_at: DAY_MS * 2,
            tasks: vec![login, setup],
            evidence_ids: vec!["e1".into(), "e2".into()],
        }
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date(0), "1970-01-01");
        assert_eq!(format_date(DAY_MS * 31), "1970-02-01");
    }

    #[test]
    fn test_report_markdown_has_status_header() {
        let phase = Phase::new("p1", "Setup").with_tasks(vec![
            Task::new("t1", "Scaffold").with_status(TaskStatus::Completed),
            Task::new("t2", "Wire").with_dependencies(["t1"]),
        ]);
        let project = Project::new(vec![Epic::new("e1", "Core").with_phases(vec![phase])]);
        let report = Reporter::default().report(&project, &FixedClock(0));
        let md = format_report_markdown(&report);

        assert!(md.contains("**Overall Completion**: 50%"));
        assert!(md.contains("**Completed**: 1 / 2"));
        assert!(md.contains("- [x] `t1` Scaffold"));
        assert!(md.contains("## Next Tasks"));
    }

    #[test]
    fn test_batch_markdown_lists_outcomes_and_unresolved() {
        let report = BatchReport {
            processed: 2,
            cursor_after: Some(EventCursor::new(0, "e2")),
            outcomes: vec![
                TaskOutcome {
                    task_id: "task-001".into(),
                    confidence: 1.0,
                    tier: ConfidenceTier::AutoComplete,
                    newly_satisfied: vec![],
                    action: OutcomeAction::Completed,
                },
                TaskOutcome {
                    task_id: "task-002".into(),
                    confidence: 0.5,
                    tier: ConfidenceTier::AskConfirmation,
                    newly_satisfied: vec![],
                    action: OutcomeAction::Queued { decision_id: 3 },
                },
            ],
            unresolved: vec![UnresolvedEvidence {
                event_id: "e1".into(),
                error: TrackerError::task_not_found("task-999"),
            }],
            snapshots_created: vec!["snap-0001".into()],
            retried: vec!["e0".into()],
            ..Default::default()
        };
        let md = format_batch_markdown(&report);

        assert!(md.contains("- **processed**: 2"));
        assert!(md.contains("- **replayed**: e0"));
        assert!(md.contains("- **cursor**: `e2` (1970-01-01)"));
        assert!(md.contains("- `task-001` 1.00 AUTO_COMPLETE: completed"));
        assert!(md.contains("needs confirmation (decision 3)"));
        assert!(md.contains("**Snapshots**: snap-0001"));
        assert!(md.contains("- `e1`: task not found: task-999"));
        assert!(md.contains("rpi-tracker ack"));
    }

    #[test]
    fn test_pending_markdown() {
        assert_eq!(format_pending_markdown(&[]), "No pending decisions.\n");

        let md = format_pending_markdown(&[PendingDecision {
            id: 1,
            task_id: "task-001".into(),
            confidence: 0.5,
            proposed: vec!["tests added".into()],
            evidence_ids: vec!["e1".into()],
            changed: vec!["tests/test_auth.py".into()],
            evidence_at: 0,
            latest_event: Some("e1".into()),
        }]);
        assert!(md.starts_with("# Pending Decisions (1)"));
        assert!(md.contains("- **1** `task-001` confidence 0.50, evidence e1 (1 files)"));
        assert!(md.contains("  - tests added"));
    }

    #[test]
    fn test_unresolved_markdown() {
        assert_eq!(format_unresolved_markdown(&[]), "No unresolved events.\n");
        let md = format_unresolved_markdown(&[UnresolvedEvent {
            event: RawEvent::new("abc", "see task-999\n\nbody", DAY_MS, &[]),
            references: vec!["task-999".into()],
        }]);
        assert!(md.contains("- `abc` (1970-01-02) references `task-999`: see task-999\n"));
    }

    #[test]
    fn test_history_markdown_one_line_per_snapshot() {
        assert_eq!(format_history_markdown(&[]), "No history snapshots.\n");
        let md = format_history_markdown(&[snapshot()]);
        assert!(md.contains(
            "- **snap-0001** epic-001/phase-1 completed 1970-01-03 (2 tasks, 2 events, 2 days)"
        ));
    }

    #[test]
    fn test_snapshot_markdown_has_detail_sections() {
        let md = format_snapshot_markdown(&snapshot());

        assert!(md.starts_with("# Snapshot snap-0001"));
        assert!(md.contains("- **Scope**: phase `epic-001/phase-1`"));
        assert!(md.contains("- **Duration**: 1970-01-02 to 1970-01-03 (2 days)"));
        assert!(md.contains("- **Tasks**: 2 / 2 completed"));
        assert!(md.contains("- **Evidence**: 2 events"));
        assert!(md.contains("- **Files changed**: 2"));

        let setup = md.find("- 1970-01-02 `task-000` Setup (manual)").unwrap();
        let login = md.find("- 1970-01-03 `task-001` Login (by `e2`)").unwrap();
        assert!(setup < login);

        assert!(md.contains("- [x] `task-001` Login (2/2 criteria)"));
        assert!(md.contains("  - evidence: e1, e2"));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::from_str("MD"), Some(OutputFormat::Markdown));
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("xml"), None);
    }
}
