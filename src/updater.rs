//! Status updater: applies scores to the project under the three-tier policy.
//!
//! Every mutating call works on a copy of the project and replaces the
//! caller's project only when the whole operation has been computed, so a
//! half-applied batch is never observable.

use crate::config::Config;
use crate::error::{EntityKind, TrackerError, TrackerResult};
use crate::evidence::EvidenceExtractor;
use crate::graph::Transition;
use crate::scoring::{CompletionScorer, ScoreResult};
use crate::types::{
    ConfidenceTier, DecisionResponse, Evidence, EventCursor, HistorySnapshot, PendingDecision,
    Project, RawEvent, SnapshotScope, Task, TaskStatus, Timestamp, UnresolvedEvent,
};
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// What happened to a task during a batch or decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutcomeAction {
    Completed,
    /// Completion was attempted but dependencies are open.
    DependencyViolation {
        unmet: Vec<String>,
        status: TaskStatus,
    },
    /// Waiting on the confirmation channel.
    Queued { decision_id: u64 },
    /// Criteria recorded and the task moved to partial.
    Partial,
    Dismissed,
    Ignored,
    Rejected { error: TrackerError },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub task_id: String,
    pub confidence: f64,
    pub tier: ConfidenceTier,
    pub newly_satisfied: Vec<String>,
    #[serde(flatten)]
    pub action: OutcomeAction,
}

/// Evidence whose references matched nothing in the plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnresolvedEvidence {
    pub event_id: String,
    pub error: TrackerError,
}

/// Summary of one `apply_batch` call.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct BatchReport {
    pub cursor_before: Option<EventCursor>,
    pub cursor_after: Option<EventCursor>,
    pub processed: usize,
    /// Events at or before the cursor. Skipping them is a no-op.
    pub stale_skipped: usize,
    /// Fresh events referencing unknown ids. They are still applied to the
    /// tasks they are relevant to and kept in `Project::unresolved`.
    pub unresolved: Vec<UnresolvedEvidence>,
    /// Earlier unresolved events replayed because their references now resolve.
    pub retried: Vec<String>,
    pub outcomes: Vec<TaskOutcome>,
    pub unblocked: Vec<String>,
    pub snapshots_created: Vec<String>,
}

impl BatchReport {
    pub fn completed(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.action == OutcomeAction::Completed)
            .map(|o| o.task_id.as_str())
    }

    pub fn is_noop(&self) -> bool {
        self.processed == 0 && self.retried.is_empty()
    }

    /// The stale-cursor condition, when every event in the batch was already seen.
    pub fn stale_error(&self) -> Option<TrackerError> {
        match &self.cursor_before {
            Some(cursor) if self.is_noop() && self.stale_skipped > 0 && self.unresolved.is_empty() => {
                Some(TrackerError::StaleCursor {
                    event_id: cursor.event_id.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Result of resolving a pending decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecisionOutcome {
    pub decision_id: u64,
    pub task_id: String,
    #[serde(flatten)]
    pub action: OutcomeAction,
    pub unblocked: Vec<String>,
    pub snapshots_created: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct StatusUpdater {
    extractor: EvidenceExtractor,
    scorer: CompletionScorer,
    auto_unblock: bool,
}

impl StatusUpdater {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::from_parts(
            EvidenceExtractor::new(&config.scoring)?,
            CompletionScorer::new(&config.scoring),
            config.updater.auto_unblock,
        ))
    }

    pub fn from_parts(
        extractor: EvidenceExtractor,
        scorer: CompletionScorer,
        auto_unblock: bool,
    ) -> Self {
        Self {
            extractor,
            scorer,
            auto_unblock,
        }
    }

    pub fn scorer(&self) -> &CompletionScorer {
        &self.scorer
    }

    pub fn extractor(&self) -> &EvidenceExtractor {
        &self.extractor
    }

    /// Process one batch of raw events.
    ///
    /// Stale events are skipped. Evidence referencing unknown ids is applied
    /// like any other and recorded in `Project::unresolved`; recorded events
    /// whose references have since resolved are replayed with this batch.
    /// The cursor moves to the last fresh event.
    pub fn apply_batch(&self, project: &mut Project, raw: &[RawEvent]) -> BatchReport {
        let mut work = project.clone();
        let mut report = BatchReport {
            cursor_before: work.cursor.clone(),
            ..Default::default()
        };

        let known = known_ids(&work);
        let mut replay: Vec<RawEvent> = Vec::new();
        work.unresolved.retain(|u| {
            let resolved = u.references.iter().all(|r| known.contains(r.as_str()));
            if resolved {
                replay.push(u.event.clone());
            }
            !resolved
        });
        let replayed: Vec<Evidence> = self.extractor.extract(&replay).collect();
        report.retried = replayed.iter().map(|e| e.id.clone()).collect();

        let mut fresh: Vec<Evidence> = Vec::new();

        for ev in self.extractor.extract(raw) {
            if work.cursor.as_ref().is_some_and(|c| ev.cursor() <= *c) {
                debug!(event_id = %ev.id, "skipping stale event");
                report.stale_skipped += 1;
                continue;
            }
            let unknown: Vec<String> = ev
                .references
                .iter()
                .filter(|r| !known.contains(r.as_str()))
                .cloned()
                .collect();
            if let Some(first) = unknown.first() {
                warn!(event_id = %ev.id, references = ?unknown, "evidence references unknown task");
                report.unresolved.push(UnresolvedEvidence {
                    event_id: ev.id.clone(),
                    error: TrackerError::task_not_found(first),
                });
                let source = raw
                    .iter()
                    .find(|r| r.id == ev.id && r.timestamp == ev.timestamp);
                if let Some(event) = source {
                    work.record_unresolved(UnresolvedEvent {
                        event: event.clone(),
                        references: unknown,
                    });
                }
            }
            fresh.push(ev);
        }

        if fresh.is_empty() && replayed.is_empty() {
            debug!(skipped = report.stale_skipped, "nothing new to apply");
            report.cursor_after = report.cursor_before.clone();
            return report;
        }

        let mut unblocked = Vec::new();
        let scored: Vec<Evidence> = replayed.into_iter().chain(fresh.iter().cloned()).collect();

        for task_id in work.dependency_order() {
            let Ok(task) = work.task(&task_id) else { continue };
            if task.is_completed() {
                continue;
            }
            let score = self.scorer.score(task, &scored);
            if !score.is_relevant() {
                continue;
            }

            let outcome = self.apply_score(&mut work, &score);
            if outcome.action == OutcomeAction::Completed && self.auto_unblock {
                unblocked.extend(unblock_dependents(&mut work, &task_id));
            }
            report.outcomes.push(outcome);
        }

        if let Some(last) = fresh.last() {
            work.cursor = Some(last.cursor());
        }
        let batch_at = scored.iter().map(|e| e.timestamp).max().unwrap_or_default();
        report.snapshots_created = finalize_groups(&mut work, batch_at);
        report.unblocked = unblocked;
        report.processed = fresh.len();
        report.cursor_after = work.cursor.clone();

        info!(
            processed = report.processed,
            stale = report.stale_skipped,
            unresolved = report.unresolved.len(),
            retried = report.retried.len(),
            completed = report.completed().count(),
            snapshots = report.snapshots_created.len(),
            "batch applied"
        );

        *project = work;
        report
    }

    fn apply_score(&self, work: &mut Project, score: &ScoreResult) -> TaskOutcome {
        let mut outcome = TaskOutcome {
            task_id: score.task_id.clone(),
            confidence: score.confidence,
            tier: score.tier,
            newly_satisfied: Vec::new(),
            action: OutcomeAction::Ignored,
        };
        if score.tier == ConfidenceTier::Ignore {
            return outcome;
        }

        let Ok(loc) = work.locate(&score.task_id) else {
            outcome.action = OutcomeAction::Rejected {
                error: TrackerError::task_not_found(&score.task_id),
            };
            return outcome;
        };

        outcome.action = match score.tier {
            ConfidenceTier::AutoComplete => {
                let task = work.task_at_mut(loc);
                outcome.newly_satisfied = task.record_satisfied(&score.newly_covered);
                task.note_evidence(&score.evidence_ids, &score.touched);

                let trigger = score.triggered_by.as_ref().or(score.latest.as_ref());
                attempt_completion(
                    work,
                    &score.task_id,
                    trigger.map(|c| c.timestamp).unwrap_or_default(),
                    trigger.map(|c| c.event_id.as_str()),
                )
            }
            // Nothing changes on the task until the decision is answered
            ConfidenceTier::AskConfirmation => OutcomeAction::Queued {
                decision_id: queue_decision(work, score),
            },
            ConfidenceTier::Ignore => OutcomeAction::Ignored,
        };

        debug!(
            task_id = %score.task_id,
            confidence = score.confidence,
            tier = score.tier.as_str(),
            "task scored"
        );
        outcome
    }

    /// Apply an explicit response to a pending decision.
    pub fn resolve(
        &self,
        project: &mut Project,
        decision_id: u64,
        response: DecisionResponse,
    ) -> TrackerResult<DecisionOutcome> {
        let idx = project
            .pending
            .iter()
            .position(|d| d.id == decision_id)
            .ok_or(TrackerError::DecisionNotFound { id: decision_id })?;

        let mut work = project.clone();
        let decision = work.pending.remove(idx);
        let task_id = decision.task_id.clone();
        let loc = work.locate(&task_id)?;
        let mut unblocked = Vec::new();

        let action = match response {
            DecisionResponse::No => OutcomeAction::Dismissed,
            DecisionResponse::Yes => {
                let task = work.task_at_mut(loc);
                task.record_satisfied(&decision.proposed);
                task.note_evidence(&decision.evidence_ids, &decision.changed);
                let action = attempt_completion(
                    &mut work,
                    &task_id,
                    decision.evidence_at,
                    decision.latest_event.as_deref(),
                );
                if action == OutcomeAction::Completed && self.auto_unblock {
                    unblocked = unblock_dependents(&mut work, &task_id);
                }
                action
            }
            DecisionResponse::Partial(criteria) => {
                let task = work.task(&task_id)?;
                if let Some(bad) = criteria.iter().find(|c| !task.criteria.contains(c)) {
                    return Err(TrackerError::InvalidCriterion {
                        task_id,
                        criterion: bad.clone(),
                    });
                }
                let task = work.task_at_mut(loc);
                task.record_satisfied(&criteria);
                task.note_evidence(&decision.evidence_ids, &decision.changed);
                work.update_status(&task_id, TaskStatus::Partial, decision.evidence_at)?;
                OutcomeAction::Partial
            }
        };

        let snapshots_created = finalize_groups(&mut work, decision.evidence_at);

        info!(decision_id, task_id = %task_id, "decision resolved");
        *project = work;

        Ok(DecisionOutcome {
            decision_id,
            task_id,
            action,
            unblocked,
            snapshots_created,
        })
    }

    /// Hand override of a task status.
    pub fn override_status(
        &self,
        project: &mut Project,
        task_id: &str,
        status: TaskStatus,
        at: Timestamp,
    ) -> TrackerResult<Transition> {
        let mut work = project.clone();
        let transition = work.force_status(task_id, status, at)?;

        if transition != Transition::Unchanged && status == TaskStatus::Completed {
            work.pending.retain(|d| d.task_id != task_id);
            if self.auto_unblock {
                unblock_dependents(&mut work, task_id);
            }
            finalize_groups(&mut work, at);
        }

        info!(task_id = %task_id, status = %status, "status overridden");
        *project = work;
        Ok(transition)
    }

    /// Drop unresolved events: the one named, or all of them when `event_id`
    /// is `None`. Returns the ids removed.
    pub fn acknowledge(
        &self,
        project: &mut Project,
        event_id: Option<&str>,
    ) -> TrackerResult<Vec<String>> {
        let removed: Vec<String> = match event_id {
            Some(id) => {
                let idx = project
                    .unresolved
                    .iter()
                    .position(|u| u.event_id() == id)
                    .ok_or_else(|| TrackerError::not_found(EntityKind::Event, id))?;
                vec![project.unresolved.remove(idx).event.id]
            }
            None => project.unresolved.drain(..).map(|u| u.event.id).collect(),
        };
        info!(acknowledged = removed.len(), "unresolved events acknowledged");
        Ok(removed)
    }
}

/// Ids that references may name, lower-cased.
fn known_ids(project: &Project) -> HashSet<String> {
    let mut ids = HashSet::new();
    for epic in &project.epics {
        ids.insert(epic.id.to_lowercase());
        for phase in &epic.phases {
            ids.insert(phase.id.to_lowercase());
            for task in &phase.tasks {
                ids.insert(task.id.to_lowercase());
            }
        }
    }
    ids
}

/// Try to complete a task at `at`, crediting event `by`. Open dependencies
/// leave it partial when some criteria are satisfied and blocked otherwise.
fn attempt_completion(
    work: &mut Project,
    task_id: &str,
    at: Timestamp,
    by: Option<&str>,
) -> OutcomeAction {
    match work.update_status(task_id, TaskStatus::Completed, at) {
        Ok(_) => {
            if let Ok(loc) = work.locate(task_id) {
                work.task_at_mut(loc).completed_by = by.map(String::from);
            }
            work.pending.retain(|d| d.task_id != task_id);
            OutcomeAction::Completed
        }
        Err(TrackerError::DependencyViolation { unmet, .. }) => {
            let has_coverage = work
                .task(task_id)
                .map(|t| !t.satisfied.is_empty())
                .unwrap_or(false);
            let fallback = if has_coverage {
                TaskStatus::Partial
            } else {
                TaskStatus::Blocked
            };
            if let Err(e) = work.update_status(task_id, fallback, at) {
                warn!(task_id = %task_id, error = %e, "could not record dependency fallback");
            }
            let status = work.task(task_id).map(|t| t.status).unwrap_or(fallback);
            warn!(task_id = %task_id, unmet = ?unmet, "completion blocked by dependencies");
            OutcomeAction::DependencyViolation { unmet, status }
        }
        Err(error) => OutcomeAction::Rejected { error },
    }
}

/// Queue a decision, replacing any earlier one for the same task.
fn queue_decision(work: &mut Project, score: &ScoreResult) -> u64 {
    work.pending.retain(|d| d.task_id != score.task_id);
    work.next_decision_id += 1;
    let id = work.next_decision_id;
    work.pending.push(PendingDecision {
        id,
        task_id: score.task_id.clone(),
        confidence: score.confidence,
        proposed: score.covered.iter().cloned().collect(),
        evidence_ids: score.evidence_ids.clone(),
        changed: score.touched.iter().cloned().collect(),
        evidence_at: score.latest.as_ref().map(|c| c.timestamp).unwrap_or_default(),
        latest_event: score.latest.as_ref().map(|c| c.event_id.clone()),
    });
    id
}

/// Return blocked dependents of `task_id` to work once nothing blocks them.
fn unblock_dependents(work: &mut Project, task_id: &str) -> Vec<String> {
    let mut unblocked = Vec::new();
    for dependent in work.dependents_of(task_id) {
        let Ok(task) = work.task(&dependent) else { continue };
        if task.status != TaskStatus::Blocked {
            continue;
        }
        let target = if task.satisfied.is_empty() {
            TaskStatus::InProgress
        } else {
            TaskStatus::Partial
        };
        let ready = work
            .unmet_dependencies(&dependent)
            .map(|u| u.is_empty())
            .unwrap_or(false);
        if !ready {
            continue;
        }
        let at = work
            .task(task_id)
            .ok()
            .and_then(|t| t.completed_at)
            .unwrap_or_default();
        match work.update_status(&dependent, target, at) {
            Ok(_) => {
                debug!(task_id = %dependent, status = %target, "task unblocked");
                unblocked.push(dependent);
            }
            Err(e) => warn!(task_id = %dependent, error = %e, "could not unblock task"),
        }
    }
    unblocked
}

/// Snapshot and finalize every phase at 100%, then every epic whose phases are
/// all finalized. Returns the ids of the snapshots created.
///
/// A group is stamped with its latest completion time, or with `fallback_at`
/// when none of its tasks carries one.
fn finalize_groups(work: &mut Project, fallback_at: Timestamp) -> Vec<String> {
    let mut created = Vec::new();

    for ei in 0..work.epics.len() {
        for pi in 0..work.epics[ei].phases.len() {
            let phase = &work.epics[ei].phases[pi];
            if phase.is_finalized() || !phase.progress().is_done() {
                continue;
            }
            let created_at = phase
                .tasks
                .iter()
                .filter_map(|t| t.completed_at)
                .max()
                .unwrap_or(fallback_at);
            let snapshot = HistorySnapshot {
                id: next_snapshot_id(work),
                scope: SnapshotScope::Phase {
                    epic_id: work.epics[ei].id.clone(),
                    phase_id: phase.id.clone(),
                },
                created_at,
                tasks: phase.tasks.clone(),
                evidence_ids: evidence_for(&phase.tasks),
            };
            info!(snapshot_id = %snapshot.id, scope = %snapshot.scope, "phase completed");
            created.push(snapshot.id.clone());
            work.history.push(snapshot);
            work.epics[ei].phases[pi].completed_at = Some(created_at);
        }

        let epic = &work.epics[ei];
        if epic.completed_at.is_some() || !epic.all_phases_completed() {
            continue;
        }
        let created_at = epic
            .phases
            .iter()
            .filter_map(|p| p.completed_at)
            .max()
            .unwrap_or(fallback_at);
        let tasks: Vec<_> = epic.phases.iter().flat_map(|p| p.tasks.iter().cloned()).collect();
        let snapshot = HistorySnapshot {
            id: next_snapshot_id(work),
            scope: SnapshotScope::Epic {
                epic_id: epic.id.clone(),
            },
            created_at,
            evidence_ids: evidence_for(&tasks),
            tasks,
        };
        info!(snapshot_id = %snapshot.id, scope = %snapshot.scope, "epic completed");
        created.push(snapshot.id.clone());
        work.history.push(snapshot);
        work.epics[ei].completed_at = Some(created_at);
    }

    created
}

fn next_snapshot_id(work: &Project) -> String {
    format!("snap-{:04}", work.history.len() + 1)
}

fn evidence_for(tasks: &[Task]) -> Vec<String> {
    let ids: BTreeSet<&String> = tasks.iter().flat_map(|t| t.evidence.iter()).collect();
    ids.into_iter().cloned().collect()
}
