//! Read-side reporting: hierarchy, velocity, projection and next tasks.
//!
//! Everything here is a pure function of a committed [`Project`] and a clock.

use crate::clock::Clock;
use crate::config::ReportConfig;
use crate::types::{
    DAY_MS, GroupStatus, Priority, Progress, Project, Task, TaskStatus, Timestamp,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskView {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub criteria_satisfied: usize,
    pub criteria_total: usize,
    pub completed_at: Option<Timestamp>,
    /// Dependencies that are not completed yet.
    pub blocked_by: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseView {
    pub id: String,
    pub title: String,
    pub status: GroupStatus,
    pub progress: Progress,
    pub percent: u32,
    pub completed_at: Option<Timestamp>,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpicView {
    pub id: String,
    pub title: String,
    pub status: GroupStatus,
    pub progress: Progress,
    pub percent: u32,
    pub completed_at: Option<Timestamp>,
    pub phases: Vec<PhaseView>,
}

/// Tasks completed per day over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Velocity {
    pub window_days: u32,
    pub completed_in_window: usize,
    pub per_day: f64,
}

/// Projected completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Projection {
    /// Nothing left to do.
    Done { at: Timestamp },
    Projected { at: Timestamp, days_remaining: f64 },
    /// Work remains but nothing was completed in the window.
    Undefined,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextTask {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub epic_id: String,
    pub phase_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectReport {
    pub generated_at: Timestamp,
    pub progress: Progress,
    pub percent: u32,
    pub epics: Vec<EpicView>,
    pub velocity: Velocity,
    pub projection: Projection,
    pub next: Vec<NextTask>,
    pub pending_decisions: usize,
    pub snapshots: usize,
}

#[derive(Debug, Clone)]
pub struct Reporter {
    window_days: u32,
    next_limit: usize,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(&ReportConfig::default())
    }
}

impl Reporter {
    pub fn new(config: &ReportConfig) -> Self {
        Self {
            window_days: config.window_days.max(1),
            next_limit: config.next_limit,
        }
    }

    pub fn with_limit(mut self, next_limit: usize) -> Self {
        self.next_limit = next_limit;
        self
    }

    pub fn report(&self, project: &Project, clock: &dyn Clock) -> ProjectReport {
        let now = clock.now_ms();
        let progress = project.progress();
        let velocity = self.velocity(project, now);

        ProjectReport {
            generated_at: now,
            progress,
            percent: progress.percent(),
            epics: hierarchy(project),
            velocity,
            projection: project_completion(progress, velocity, now),
            next: self.next_tasks(project),
            pending_decisions: project.pending.len(),
            snapshots: project.history.len(),
        }
    }

    /// Completions in `(now - window, now]`.
    pub fn velocity(&self, project: &Project, now: Timestamp) -> Velocity {
        let start = now - i64::from(self.window_days) * DAY_MS;
        let completed_in_window = project
            .tasks()
            .filter_map(|t| t.completed_at)
            .filter(|at| *at > start && *at <= now)
            .count();
        Velocity {
            window_days: self.window_days,
            completed_in_window,
            per_day: completed_in_window as f64 / f64::from(self.window_days),
        }
    }

    /// Open tasks whose dependencies are all completed.
    ///
    /// Active tasks come first, then higher priority, then declared order;
    /// the id breaks any remaining tie.
    pub fn next_tasks(&self, project: &Project) -> Vec<NextTask> {
        let mut ready: Vec<(usize, NextTask)> = Vec::new();
        let mut order = 0;

        for epic in &project.epics {
            for phase in &epic.phases {
                for task in &phase.tasks {
                    order += 1;
                    if task.is_completed() || !dependencies_met(project, task) {
                        continue;
                    }
                    ready.push((
                        order,
                        NextTask {
                            id: task.id.clone(),
                            title: task.title.clone(),
                            status: task.status,
                            priority: task.priority,
                            epic_id: epic.id.clone(),
                            phase_id: phase.id.clone(),
                        },
                    ));
                }
            }
        }

        ready.sort_by(|(ao, a), (bo, b)| {
            b.status
                .is_active()
                .cmp(&a.status.is_active())
                .then_with(|| b.priority.cmp(&a.priority))
                .then_with(|| ao.cmp(bo))
                .then_with(|| a.id.cmp(&b.id))
        });

        ready
            .into_iter()
            .take(self.next_limit)
            .map(|(_, t)| t)
            .collect()
    }
}

fn dependencies_met(project: &Project, task: &Task) -> bool {
    task.depends_on
        .iter()
        .all(|d| project.task(d).map(Task::is_completed).unwrap_or(false))
}

fn hierarchy(project: &Project) -> Vec<EpicView> {
    project
        .epics
        .iter()
        .map(|epic| {
            let progress = epic.progress();
            EpicView {
                id: epic.id.clone(),
                title: epic.title.clone(),
                status: epic.status(),
                progress,
                percent: progress.percent(),
                completed_at: epic.completed_at,
                phases: epic
                    .phases
                    .iter()
                    .map(|phase| {
                        let progress = phase.progress();
                        PhaseView {
                            id: phase.id.clone(),
                            title: phase.title.clone(),
                            status: phase.status(),
                            progress,
                            percent: progress.percent(),
                            completed_at: phase.completed_at,
                            tasks: phase.tasks.iter().map(|t| task_view(project, t)).collect(),
                        }
                    })
                    .collect(),
            }
        })
        .collect()
}

fn task_view(project: &Project, task: &Task) -> TaskView {
    TaskView {
        id: task.id.clone(),
        title: task.title.clone(),
        status: task.status,
        priority: task.priority,
        criteria_satisfied: task.satisfied.len(),
        criteria_total: task.criteria.len(),
        completed_at: task.completed_at,
        blocked_by: project.unmet_dependencies(&task.id).unwrap_or_default(),
    }
}

fn project_completion(progress: Progress, velocity: Velocity, now: Timestamp) -> Projection {
    let remaining = progress.remaining();
    if remaining == 0 {
        return Projection::Done { at: now };
    }
    if velocity.per_day <= 0.0 {
        return Projection::Undefined;
    }
    let days_remaining = remaining as f64 / velocity.per_day;
    Projection::Projected {
        at: now + (days_remaining * DAY_MS as f64).ceil() as i64,
        days_remaining,
    }
}
