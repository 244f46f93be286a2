//! End-to-end scenarios for the status updater.
//!
//! Each test builds a small project, feeds a batch of raw events through
//! `StatusUpdater::apply_batch` and checks the resulting graph, history and
//! batch report.

use rpi_tracker::config::Config;
use rpi_tracker::error::{ErrorCode, TrackerError};
use rpi_tracker::types::{
    ConfidenceTier, DecisionResponse, Epic, EventCursor, Phase, Project, RawEvent, SnapshotScope,
    Task, TaskStatus,
};
use rpi_tracker::updater::{OutcomeAction, StatusUpdater};

fn updater() -> StatusUpdater {
    StatusUpdater::new(&Config::default()).expect("default config builds an updater")
}

/// epic-001 has two phases: phase-1 holds task-001 and task-002 (which depends
/// on task-001), phase-2 holds task-003.
fn project() -> Project {
    let phase1 = Phase::new("phase-1", "Foundation").with_tasks(vec![
        Task::new("task-001", "Login endpoint")
            .with_criteria(["file:src/auth.py modified", "tests added"]),
        Task::new("task-002", "Sessions")
            .with_criteria(["file:src/session.py modified"])
            .with_dependencies(["task-001"]),
    ]);
    let phase2 = Phase::new("phase-2", "Hardening").with_tasks(vec![
        Task::new("task-003", "Rate limiting").with_criteria(["file:src/limits.py modified"]),
    ]);
    Project::new(vec![
        Epic::new("epic-001", "Authentication").with_phases(vec![phase1, phase2]),
    ])
}

fn complete_task_001() -> RawEvent {
    RawEvent::new(
        "e1",
        "feat: complete task-001 login",
        1_000,
        &["src/auth.py", "tests/test_auth.py"],
    )
}

mod scenario_a_auto_complete {
    use super::*;

    #[test]
    fn strong_evidence_completes_task() {
        let mut p = project();
        let report = updater().apply_batch(&mut p, &[complete_task_001()]);

        assert_eq!(report.completed().collect::<Vec<_>>(), vec!["task-001"]);
        let task = p.task("task-001").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.completed_at, Some(1_000));
        assert_eq!(task.completed_by.as_deref(), Some("e1"));
        assert_eq!(task.satisfied.len(), 2);

        assert_eq!(report.processed, 1);
        assert_eq!(report.cursor_after, Some(EventCursor::new(1_000, "e1")));
        assert_eq!(p.cursor, report.cursor_after);
        assert!(p.pending.is_empty());
    }

    #[test]
    fn unrelated_tasks_are_untouched() {
        let mut p = project();
        updater().apply_batch(&mut p, &[complete_task_001()]);

        assert_eq!(p.task("task-002").unwrap().status, TaskStatus::Pending);
        assert_eq!(p.task("task-003").unwrap().status, TaskStatus::Pending);
        // phase-1 still has task-002 open
        assert!(p.history.is_empty());
    }

    #[test]
    fn later_touch_does_not_move_completion_time() {
        let mut p = project();
        let events = vec![
            complete_task_001(),
            RawEvent::new("e2", "tidy auth module", 5_000, &["src/auth.py"]),
        ];
        updater().apply_batch(&mut p, &events);

        let task = p.task("task-001").unwrap();
        assert_eq!(task.completed_at, Some(1_000));
        assert_eq!(task.completed_by.as_deref(), Some("e1"));
        assert_eq!(task.evidence.len(), 2);
        assert_eq!(p.cursor, Some(EventCursor::new(5_000, "e2")));
    }

    #[test]
    fn completion_time_is_the_event_that_crossed_the_threshold() {
        let mut p = project();
        let events = vec![
            RawEvent::new("e1", "start task-001", 1_000, &[]),
            RawEvent::new("e2", "wip", 3_000, &["src/auth.py", "tests/test_auth.py"]),
        ];
        updater().apply_batch(&mut p, &events);

        let task = p.task("task-001").unwrap();
        assert!(task.is_completed());
        assert_eq!(task.completed_at, Some(3_000));
        assert_eq!(task.completed_by.as_deref(), Some("e2"));
    }

    #[test]
    fn dependent_completes_in_same_batch() {
        let mut p = project();
        let events = vec![
            complete_task_001(),
            RawEvent::new("e2", "complete task-002 sessions", 2_000, &["src/session.py"]),
        ];
        let report = updater().apply_batch(&mut p, &events);

        let mut completed: Vec<_> = report.completed().collect();
        completed.sort();
        assert_eq!(completed, vec!["task-001", "task-002"]);
        assert_eq!(report.snapshots_created, vec!["snap-0001".to_string()]);
    }
}

mod scenario_b_dependency_violation {
    use super::*;

    #[test]
    fn open_dependency_leaves_task_partial() {
        let mut p = project();
        let events = vec![RawEvent::new(
            "e1",
            "complete task-002 sessions",
            1_000,
            &["src/session.py"],
        )];
        let report = updater().apply_batch(&mut p, &events);

        assert_eq!(report.outcomes.len(), 1);
        match &report.outcomes[0].action {
            OutcomeAction::DependencyViolation { unmet, status } => {
                assert_eq!(unmet, &vec!["task-001".to_string()]);
                assert_eq!(*status, TaskStatus::Partial);
            }
            other => panic!("expected a dependency violation, got {:?}", other),
        }

        let task = p.task("task-002").unwrap();
        assert_eq!(task.status, TaskStatus::Partial);
        assert!(task.completed_at.is_none());
        assert!(task.satisfied.contains("file:src/session.py modified"));
    }

    #[test]
    fn no_coverage_blocks_then_unblocks() {
        let mut config = Config::default();
        config.scoring.auto_threshold = 0.5;
        let updater = StatusUpdater::new(&config).unwrap();

        let mut p = project();
        let report = updater.apply_batch(
            &mut p,
            &[RawEvent::new("e1", "done with task-002", 1_000, &[])],
        );
        assert!(matches!(
            report.outcomes[0].action,
            OutcomeAction::DependencyViolation {
                status: TaskStatus::Blocked,
                ..
            }
        ));
        assert_eq!(p.task("task-002").unwrap().status, TaskStatus::Blocked);

        let report = updater.apply_batch(
            &mut p,
            &[RawEvent::new(
                "e2",
                "feat: complete task-001 login",
                2_000,
                &["src/auth.py", "tests/test_auth.py"],
            )],
        );
        assert_eq!(report.unblocked, vec!["task-002".to_string()]);
        assert_eq!(p.task("task-002").unwrap().status, TaskStatus::InProgress);
    }
}

mod scenario_c_irrelevant_evidence {
    use super::*;

    #[test]
    fn evidence_with_no_task_signal_changes_nothing() {
        let mut p = project();
        let before = p.clone();
        let report = updater().apply_batch(
            &mut p,
            &[RawEvent::new("e1", "refactor logging setup", 1_000, &["src/logging.rs"])],
        );

        assert!(report.outcomes.is_empty());
        assert_eq!(report.processed, 1);
        assert_eq!(p.epics, before.epics);
        assert!(p.pending.is_empty());
        // the event was still consumed
        assert_eq!(p.cursor, Some(EventCursor::new(1_000, "e1")));
    }
}

mod scenario_d_phase_snapshot {
    use super::*;

    #[test]
    fn completing_last_task_snapshots_phase() {
        let mut p = project();
        let events = vec![
            complete_task_001(),
            RawEvent::new("e2", "complete task-002 sessions", 2_000, &["src/session.py"]),
        ];
        updater().apply_batch(&mut p, &events);

        assert_eq!(p.history.len(), 1);
        let snap = &p.history[0];
        assert_eq!(snap.id, "snap-0001");
        assert_eq!(
            snap.scope,
            SnapshotScope::Phase {
                epic_id: "epic-001".into(),
                phase_id: "phase-1".into(),
            }
        );
        assert_eq!(snap.created_at, 2_000);
        assert_eq!(snap.evidence_ids, vec!["e1".to_string(), "e2".to_string()]);
        assert!(snap.tasks.iter().all(|t| t.status == TaskStatus::Completed));

        let phase = p.phase("epic-001", "phase-1").unwrap();
        assert_eq!(phase.completed_at, Some(2_000));
        // phase-2 is open, so no epic snapshot yet
        assert!(p.epic("epic-001").unwrap().completed_at.is_none());
    }

    #[test]
    fn completing_every_phase_snapshots_epic() {
        let mut p = project();
        let events = vec![
            complete_task_001(),
            RawEvent::new("e2", "complete task-002 sessions", 2_000, &["src/session.py"]),
            RawEvent::new("e3", "finish task-003 limits", 3_000, &["src/limits.py"]),
        ];
        let report = updater().apply_batch(&mut p, &events);

        assert_eq!(
            report.snapshots_created,
            vec!["snap-0001".to_string(), "snap-0002".to_string(), "snap-0003".to_string()]
        );
        let epic_snap = p.history.last().unwrap();
        assert_eq!(
            epic_snap.scope,
            SnapshotScope::Epic {
                epic_id: "epic-001".into()
            }
        );
        assert_eq!(epic_snap.created_at, 3_000);
        assert_eq!(epic_snap.tasks.len(), 3);
    }

    #[test]
    fn archived_task_cannot_be_reopened() {
        let mut p = project();
        updater().apply_batch(
            &mut p,
            &[
                complete_task_001(),
                RawEvent::new("e2", "complete task-002 sessions", 2_000, &["src/session.py"]),
            ],
        );

        let err = updater()
            .override_status(&mut p, "task-001", TaskStatus::InProgress, 5_000)
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTransition { .. }));
        assert_eq!(p.task("task-001").unwrap().status, TaskStatus::Completed);
    }
}

mod scenario_e_idempotent_rerun {
    use super::*;

    #[test]
    fn replaying_a_batch_is_a_noop() {
        let mut p = project();
        let updater = updater();
        updater.apply_batch(&mut p, &[complete_task_001()]);
        let after_first = p.clone();

        let report = updater.apply_batch(&mut p, &[complete_task_001()]);

        assert!(report.is_noop());
        assert_eq!(report.stale_skipped, 1);
        assert_eq!(
            report.stale_error(),
            Some(TrackerError::StaleCursor {
                event_id: "e1".into()
            })
        );
        assert_eq!(p, after_first);
        assert_eq!(p.task("task-001").unwrap().completed_at, Some(1_000));
    }

    #[test]
    fn mixed_batch_applies_only_new_events() {
        let mut p = project();
        let updater = updater();
        updater.apply_batch(&mut p, &[complete_task_001()]);

        let report = updater.apply_batch(
            &mut p,
            &[
                complete_task_001(),
                RawEvent::new("e2", "complete task-002 sessions", 2_000, &["src/session.py"]),
            ],
        );
        assert_eq!(report.stale_skipped, 1);
        assert_eq!(report.processed, 1);
        assert!(report.stale_error().is_none());
        assert_eq!(p.task("task-001").unwrap().completed_at, Some(1_000));
        assert_eq!(p.task("task-002").unwrap().status, TaskStatus::Completed);
    }
}

mod unresolved_references {
    use super::*;

    fn foreign_reference() -> RawEvent {
        RawEvent::new("e0", "see task-999 in the other tracker", 500, &["src/other.py"])
    }

    #[test]
    fn unknown_task_does_not_stop_the_batch() {
        let mut p = project();
        let events = vec![
            foreign_reference(),
            complete_task_001(),
            RawEvent::new("e3", "complete task-003", 3_000, &["src/limits.py"]),
        ];
        let report = updater().apply_batch(&mut p, &events);

        assert_eq!(report.processed, 3);
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].event_id, "e0");
        assert_eq!(report.unresolved[0].error.code(), ErrorCode::NotFound);

        assert!(p.task("task-001").unwrap().is_completed());
        assert!(p.task("task-003").unwrap().is_completed());
        assert_eq!(p.cursor, Some(EventCursor::new(3_000, "e3")));
        assert_eq!(p.unresolved.len(), 1);
        assert_eq!(p.unresolved[0].references, vec!["task-999".to_string()]);
    }

    #[test]
    fn unknown_reference_still_counts_for_known_tasks() {
        let mut p = project();
        let report = updater().apply_batch(
            &mut p,
            &[RawEvent::new(
                "e1",
                "complete task-001, follow-up in task-999",
                1_000,
                &["src/auth.py", "tests/test_auth.py"],
            )],
        );

        assert_eq!(report.completed().collect::<Vec<_>>(), vec!["task-001"]);
        assert_eq!(p.unresolved[0].event_id(), "e1");
    }

    #[test]
    fn rerun_does_not_duplicate_unresolved() {
        let updater = updater();
        let mut p = project();
        let events = vec![foreign_reference(), complete_task_001()];
        updater.apply_batch(&mut p, &events);
        let report = updater.apply_batch(&mut p, &events);

        assert!(report.is_noop());
        assert!(report.unresolved.is_empty());
        assert_eq!(p.unresolved.len(), 1);
    }

    #[test]
    fn acknowledged_events_are_dropped() {
        let updater = updater();
        let mut p = project();
        updater.apply_batch(&mut p, &[foreign_reference()]);

        let removed = updater.acknowledge(&mut p, Some("e0")).unwrap();
        assert_eq!(removed, vec!["e0".to_string()]);
        assert!(p.unresolved.is_empty());

        let err = updater.acknowledge(&mut p, Some("e0")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}

mod confirmation_channel {
    use super::*;

    fn ask_event() -> RawEvent {
        // touches every resource but carries no keyword or reference
        RawEvent::new("e1", "wip", 1_000, &["src/auth.py", "tests/test_auth.py"])
    }

    #[test]
    fn ask_tier_queues_and_yes_completes() {
        let updater = updater();
        let mut p = project();
        let report = updater.apply_batch(&mut p, &[ask_event()]);
        let decision_id = match report.outcomes[0].action {
            OutcomeAction::Queued { decision_id } => decision_id,
            ref other => panic!("expected a queued decision, got {:?}", other),
        };
        // nothing is applied before the answer
        let task = p.task("task-001").unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.satisfied.is_empty());

        let outcome = updater
            .resolve(&mut p, decision_id, DecisionResponse::Yes)
            .unwrap();
        assert_eq!(outcome.action, OutcomeAction::Completed);
        assert!(p.pending.is_empty());
        let task = p.task("task-001").unwrap();
        assert_eq!(task.completed_at, Some(1_000));
        assert_eq!(task.completed_by.as_deref(), Some("e1"));
        assert_eq!(task.satisfied.len(), 2);
    }

    #[test]
    fn no_dismisses_and_keeps_status() {
        let updater = updater();
        let mut p = project();
        updater.apply_batch(&mut p, &[ask_event()]);
        let id = p.pending[0].id;

        let outcome = updater.resolve(&mut p, id, DecisionResponse::No).unwrap();
        assert_eq!(outcome.action, OutcomeAction::Dismissed);
        assert!(p.pending.is_empty());
        assert_eq!(p.task("task-001"), project().task("task-001"));
    }

    #[test]
    fn declined_proposal_does_not_boost_later_evidence() {
        let updater = updater();
        let mut p = project();
        updater.apply_batch(&mut p, &[ask_event()]);
        let id = p.pending[0].id;
        updater.resolve(&mut p, id, DecisionResponse::No).unwrap();

        let report = updater.apply_batch(
            &mut p,
            &[RawEvent::new("e2", "fixes task-001 typo", 2_000, &[])],
        );
        assert_eq!(report.outcomes[0].tier, ConfidenceTier::AskConfirmation);
        assert_eq!(report.outcomes[0].confidence, 0.5);
        assert!(!p.task("task-001").unwrap().is_completed());
    }

    #[test]
    fn partial_records_only_named_criteria() {
        let updater = updater();
        let mut p = project();
        updater.apply_batch(&mut p, &[ask_event()]);
        let id = p.pending[0].id;

        let outcome = updater
            .resolve(&mut p, id, DecisionResponse::Partial(vec!["tests added".into()]))
            .unwrap();
        assert_eq!(outcome.action, OutcomeAction::Partial);
        let task = p.task("task-001").unwrap();
        assert_eq!(task.status, TaskStatus::Partial);
        assert_eq!(task.satisfied.iter().collect::<Vec<_>>(), vec!["tests added"]);
    }

    #[test]
    fn partial_rejects_unknown_criterion() {
        let updater = updater();
        let mut p = project();
        updater.apply_batch(&mut p, &[ask_event()]);
        let id = p.pending[0].id;

        let err = updater
            .resolve(&mut p, id, DecisionResponse::Partial(vec!["docs written".into()]))
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidCriterion { .. }));
        // the decision is still pending
        assert_eq!(p.pending.len(), 1);
    }

    #[test]
    fn unknown_decision_is_an_error() {
        let mut p = project();
        let err = updater()
            .resolve(&mut p, 42, DecisionResponse::Yes)
            .unwrap_err();
        assert_eq!(err, TrackerError::DecisionNotFound { id: 42 });
    }
}
