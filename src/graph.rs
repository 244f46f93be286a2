//! Task graph store: lookups, status transitions, and roll-ups over a [`Project`].
//!
//! Progress values are never stored. Every roll-up here is recomputed from task
//! statuses on each call.

use crate::error::{EntityKind, TrackerError, TrackerResult};
use crate::types::{Epic, GroupStatus, Phase, Progress, Project, Task, TaskStatus, Timestamp};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use tracing::debug;

/// Borrowed view of any node in the graph.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Task(&'a Task),
    Phase(&'a Phase),
    Epic(&'a Epic),
}

impl NodeRef<'_> {
    pub fn id(&self) -> &str {
        match self {
            NodeRef::Task(t) => &t.id,
            NodeRef::Phase(p) => &p.id,
            NodeRef::Epic(e) => &e.id,
        }
    }
}

/// Index path of a task inside the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaskLocation {
    pub epic: usize,
    pub phase: usize,
    pub task: usize,
}

/// Result of a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    /// The task was already in the requested state.
    Unchanged,
    Changed { from: TaskStatus, to: TaskStatus },
}

/// Progress of one phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseRollup {
    pub id: String,
    pub progress: Progress,
    pub status: GroupStatus,
}

/// Progress of one epic and its phases.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicRollup {
    pub id: String,
    pub progress: Progress,
    pub status: GroupStatus,
    pub phases: Vec<PhaseRollup>,
}

/// Project-wide roll-ups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rollups {
    pub project: Progress,
    pub epics: Vec<EpicRollup>,
}

impl Project {
    /// Find where a task lives.
    pub fn locate(&self, task_id: &str) -> TrackerResult<TaskLocation> {
        for (ei, epic) in self.epics.iter().enumerate() {
            for (pi, phase) in epic.phases.iter().enumerate() {
                if let Some(ti) = phase.tasks.iter().position(|t| t.id == task_id) {
                    return Ok(TaskLocation {
                        epic: ei,
                        phase: pi,
                        task: ti,
                    });
                }
            }
        }
        Err(TrackerError::task_not_found(task_id))
    }

    pub fn task(&self, task_id: &str) -> TrackerResult<&Task> {
        let loc = self.locate(task_id)?;
        Ok(&self.epics[loc.epic].phases[loc.phase].tasks[loc.task])
    }

    pub(crate) fn task_at_mut(&mut self, loc: TaskLocation) -> &mut Task {
        &mut self.epics[loc.epic].phases[loc.phase].tasks[loc.task]
    }

    pub fn epic(&self, epic_id: &str) -> TrackerResult<&Epic> {
        self.epics
            .iter()
            .find(|e| e.id == epic_id)
            .ok_or_else(|| TrackerError::not_found(EntityKind::Epic, epic_id))
    }

    /// Phase ids are only unique within their epic.
    pub fn phase(&self, epic_id: &str, phase_id: &str) -> TrackerResult<&Phase> {
        self.epic(epic_id)?
            .phases
            .iter()
            .find(|p| p.id == phase_id)
            .ok_or_else(|| TrackerError::not_found(EntityKind::Phase, &format!("{}/{}", epic_id, phase_id)))
    }

    /// Look up any node.
    ///
    /// Accepts a task id, an epic id, an `epic/phase` path, or a bare phase id
    /// when it is unambiguous.
    pub fn get(&self, id: &str) -> TrackerResult<NodeRef<'_>> {
        if let Ok(task) = self.task(id) {
            return Ok(NodeRef::Task(task));
        }
        if let Ok(epic) = self.epic(id) {
            return Ok(NodeRef::Epic(epic));
        }
        if let Some((epic_id, phase_id)) = id.split_once('/') {
            return self.phase(epic_id, phase_id).map(NodeRef::Phase);
        }

        let mut matches = self
            .epics
            .iter()
            .flat_map(|e| e.phases.iter())
            .filter(|p| p.id == id);
        match (matches.next(), matches.next()) {
            (Some(phase), None) => Ok(NodeRef::Phase(phase)),
            _ => Err(TrackerError::not_found(EntityKind::Node, id)),
        }
    }

    /// Dependencies of `task_id` that are not completed, in id order.
    pub fn unmet_dependencies(&self, task_id: &str) -> TrackerResult<Vec<String>> {
        let task = self.task(task_id)?;
        let mut unmet = Vec::new();
        for dep in &task.depends_on {
            let done = self.task(dep).map(Task::is_completed).unwrap_or(false);
            if !done {
                unmet.push(dep.clone());
            }
        }
        Ok(unmet)
    }

    /// Tasks that declare a dependency on `task_id`, in declared order.
    pub fn dependents_of(&self, task_id: &str) -> Vec<String> {
        self.tasks()
            .filter(|t| t.depends_on.contains(task_id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Task ids with every task after its dependencies, otherwise in declared order.
    pub fn dependency_order(&self) -> Vec<String> {
        fn visit<'a>(
            project: &'a Project,
            task: &'a Task,
            seen: &mut HashSet<&'a str>,
            out: &mut Vec<String>,
        ) {
            if !seen.insert(task.id.as_str()) {
                return;
            }
            for dep in &task.depends_on {
                if let Ok(dep_task) = project.task(dep) {
                    visit(project, dep_task, seen, out);
                }
            }
            out.push(task.id.clone());
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for task in self.tasks() {
            visit(self, task, &mut seen, &mut out);
        }
        out
    }

    /// A task is archived once its phase has been finalized by a snapshot.
    pub fn is_archived(&self, task_id: &str) -> TrackerResult<bool> {
        let loc = self.locate(task_id)?;
        Ok(self.epics[loc.epic].phases[loc.phase].is_finalized())
    }

    /// Move a task to `to`, enforcing the state machine and dependencies.
    ///
    /// Completion stamps `at` (an evidence timestamp, not wall-clock time).
    /// Requesting the current status is a no-op.
    pub fn update_status(
        &mut self,
        task_id: &str,
        to: TaskStatus,
        at: Timestamp,
    ) -> TrackerResult<Transition> {
        self.apply_status(task_id, to, at, false)
    }

    /// Hand override: skips the dependency check and the transition table.
    /// Archived tasks still cannot change.
    pub fn force_status(
        &mut self,
        task_id: &str,
        to: TaskStatus,
        at: Timestamp,
    ) -> TrackerResult<Transition> {
        self.apply_status(task_id, to, at, true)
    }

    fn apply_status(
        &mut self,
        task_id: &str,
        to: TaskStatus,
        at: Timestamp,
        forced: bool,
    ) -> TrackerResult<Transition> {
        let loc = self.locate(task_id)?;
        let from = self.epics[loc.epic].phases[loc.phase].tasks[loc.task].status;

        if from == to {
            return Ok(Transition::Unchanged);
        }

        if self.epics[loc.epic].phases[loc.phase].is_finalized() {
            return Err(TrackerError::invalid_transition(
                task_id,
                from,
                to,
                "task is archived in a finalized history snapshot",
            ));
        }

        if !forced {
            if !from.can_transition_to(to) {
                return Err(TrackerError::invalid_transition(
                    task_id,
                    from,
                    to,
                    "transition not allowed",
                ));
            }
            if to == TaskStatus::Completed {
                let unmet = self.unmet_dependencies(task_id)?;
                if !unmet.is_empty() {
                    return Err(TrackerError::deps_not_satisfied(task_id, unmet));
                }
            }
        }

        let task = self.task_at_mut(loc);
        task.status = to;
        if to == TaskStatus::Completed {
            task.completed_at = Some(at);
        } else if from == TaskStatus::Completed {
            task.completed_at = None;
            task.completed_by = None;
        }

        debug!(task_id = %task_id, from = %from, to = %to, forced, "task status changed");
        Ok(Transition::Changed { from, to })
    }

    /// Recompute every phase and epic roll-up from task statuses.
    pub fn recompute_rollups(&self) -> Rollups {
        let epics: Vec<EpicRollup> = self
            .epics
            .iter()
            .map(|epic| EpicRollup {
                id: epic.id.clone(),
                progress: epic.progress(),
                status: epic.status(),
                phases: epic
                    .phases
                    .iter()
                    .map(|phase| PhaseRollup {
                        id: phase.id.clone(),
                        progress: phase.progress(),
                        status: phase.status(),
                    })
                    .collect(),
            })
            .collect();

        Rollups {
            project: self.progress(),
            epics,
        }
    }

    /// Structural checks: unique ids, no empty epics or phases, known
    /// dependencies, no cycles, and satisfied criteria drawn from each task's
    /// own criteria.
    pub fn validate(&self) -> TrackerResult<()> {
        let mut epic_ids = HashSet::new();
        let mut task_ids = HashSet::new();

        for epic in &self.epics {
            if !epic_ids.insert(epic.id.as_str()) {
                return Err(TrackerError::invalid_plan(format!("duplicate epic id {}", epic.id)));
            }
            if epic.phases.is_empty() {
                return Err(TrackerError::invalid_plan(format!("epic {} has no phases", epic.id)));
            }
            let mut phase_ids = HashSet::new();
            for phase in &epic.phases {
                if phase.tasks.is_empty() {
                    return Err(TrackerError::invalid_plan(format!(
                        "phase {} in epic {} has no tasks",
                        phase.id, epic.id
                    )));
                }
                if !phase_ids.insert(phase.id.as_str()) {
                    return Err(TrackerError::invalid_plan(format!(
                        "duplicate phase id {} in epic {}",
                        phase.id, epic.id
                    )));
                }
                for task in &phase.tasks {
                    if !task_ids.insert(task.id.as_str()) {
                        return Err(TrackerError::invalid_plan(format!(
                            "duplicate task id {}",
                            task.id
                        )));
                    }
                    if let Some(extra) = task.satisfied.iter().find(|c| !task.criteria.contains(c)) {
                        return Err(TrackerError::InvalidCriterion {
                            task_id: task.id.clone(),
                            criterion: extra.clone(),
                        });
                    }
                }
            }
        }

        for task in self.tasks() {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(TrackerError::invalid_plan(format!(
                        "task {} depends on itself",
                        task.id
                    )));
                }
                if !task_ids.contains(dep.as_str()) {
                    return Err(TrackerError::invalid_plan(format!(
                        "task {} depends on unknown task {}",
                        task.id, dep
                    )));
                }
            }
        }

        if let Some(cycle_member) = self.find_dependency_cycle() {
            return Err(TrackerError::invalid_plan(format!(
                "dependency cycle through task {}",
                cycle_member
            )));
        }

        Ok(())
    }

    /// Kahn's algorithm over dependency edges. Returns a task on a cycle, if any.
    fn find_dependency_cycle(&self) -> Option<String> {
        let mut indegree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for task in self.tasks() {
            indegree.entry(task.id.as_str()).or_insert(0);
            for dep in &task.depends_on {
                *indegree.entry(task.id.as_str()).or_insert(0) += 1;
                dependents.entry(dep.as_str()).or_default().push(task.id.as_str());
            }
        }

        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited: BTreeSet<&str> = BTreeSet::new();

        while let Some(current) = queue.pop_front() {
            visited.insert(current);
            for next in dependents.get(current).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(next) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*next);
                    }
                }
            }
        }

        indegree
            .keys()
            .find(|id| !visited.contains(*id))
            .map(|id| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn project() -> Project {
        let phase = Phase::new("phase-1", "Foundation").with_tasks(vec![
            Task::new("t1", "first").with_criteria(["file:a.py modified"]),
            Task::new("t2", "second").with_dependencies(["t1"]),
        ]);
        Project::new(vec![Epic::new("epic-1", "Epic").with_phases(vec![phase])])
    }

    #[test]
    fn get_resolves_every_node_kind() {
        let p = project();
        assert!(matches!(p.get("t1").unwrap(), NodeRef::Task(_)));
        assert!(matches!(p.get("epic-1").unwrap(), NodeRef::Epic(_)));
        assert!(matches!(p.get("phase-1").unwrap(), NodeRef::Phase(_)));
        assert!(matches!(p.get("epic-1/phase-1").unwrap(), NodeRef::Phase(_)));
        assert_eq!(p.get("missing").unwrap_err().code(), ErrorCode::NotFound);
    }

    #[test]
    fn completion_stamps_given_timestamp_and_is_idempotent() {
        let mut p = project();
        let first = p.update_status("t1", TaskStatus::Completed, 1_000).unwrap();
        assert_eq!(
            first,
            Transition::Changed {
                from: TaskStatus::Pending,
                to: TaskStatus::Completed
            }
        );
        let again = p.update_status("t1", TaskStatus::Completed, 9_999).unwrap();
        assert_eq!(again, Transition::Unchanged);
        assert_eq!(p.task("t1").unwrap().completed_at, Some(1_000));
    }

    #[test]
    fn completion_with_unmet_dependency_is_rejected() {
        let mut p = project();
        let err = p.update_status("t2", TaskStatus::Completed, 5).unwrap_err();
        assert_eq!(
            err,
            TrackerError::deps_not_satisfied("t2", vec!["t1".to_string()])
        );
        assert_eq!(p.task("t2").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn force_skips_dependency_check() {
        let mut p = project();
        p.force_status("t2", TaskStatus::Completed, 5).unwrap();
        assert!(p.task("t2").unwrap().is_completed());
    }

    #[test]
    fn reopen_requires_override_and_clears_timestamp() {
        let mut p = project();
        p.update_status("t1", TaskStatus::Completed, 10).unwrap();
        let err = p.update_status("t1", TaskStatus::InProgress, 11).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTransition);

        p.force_status("t1", TaskStatus::InProgress, 11).unwrap();
        assert_eq!(p.task("t1").unwrap().completed_at, None);
    }

    #[test]
    fn archived_tasks_reject_changes() {
        let mut p = project();
        p.update_status("t1", TaskStatus::Completed, 10).unwrap();
        p.epics[0].phases[0].completed_at = Some(10);

        assert_eq!(
            p.update_status("t1", TaskStatus::Completed, 20).unwrap(),
            Transition::Unchanged
        );
        let err = p.force_status("t1", TaskStatus::InProgress, 20).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidTransition);
    }

    #[test]
    fn rollups_follow_task_statuses() {
        let mut p = project();
        assert_eq!(p.recompute_rollups().project, Progress { completed: 0, total: 2 });
        p.update_status("t1", TaskStatus::Completed, 1).unwrap();
        let rollups = p.recompute_rollups();
        assert_eq!(rollups.epics[0].phases[0].progress.percent(), 50);
        assert_eq!(rollups.epics[0].status, GroupStatus::InProgress);
    }

    #[test]
    fn validate_rejects_cycles_and_unknown_deps() {
        let mut p = project();
        p.validate().unwrap();

        p.epics[0].phases[0].tasks[0].depends_on.insert("t2".into());
        let err = p.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));

        let mut q = project();
        q.epics[0].phases[0].tasks[0].depends_on.insert("ghost".into());
        assert!(q.validate().unwrap_err().to_string().contains("unknown task ghost"));
    }

    #[test]
    fn validate_rejects_empty_groups() {
        let mut p = project();
        p.epics[0].phases.push(Phase::new("empty", "Empty"));
        let err = p.validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPlan);
        assert!(err.to_string().contains("phase empty in epic"));

        let mut q = project();
        q.epics.push(Epic::new("bare", "Bare"));
        assert!(q.validate().unwrap_err().to_string().contains("epic bare has no phases"));
    }

    #[test]
    fn dependency_order_puts_prerequisites_first() {
        let phase = Phase::new("p", "p").with_tasks(vec![
            Task::new("late", "late").with_dependencies(["early"]),
            Task::new("early", "early"),
            Task::new("free", "free"),
        ]);
        let p = Project::new(vec![Epic::new("e", "e").with_phases(vec![phase])]);
        assert_eq!(p.dependency_order(), vec!["early", "late", "free"]);
    }

    #[test]
    fn dependents_are_listed() {
        let p = project();
        assert_eq!(p.dependents_of("t1"), vec!["t2".to_string()]);
        assert_eq!(p.unmet_dependencies("t2").unwrap(), vec!["t1".to_string()]);
    }
}
