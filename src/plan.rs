//! YAML plan files: the declared epic → phase → task graph.
//!
//! ```yaml
//! epics:
//!   - id: epic-001
//!     title: Authentication
//!     phases:
//!       - id: phase-1
//!         title: Foundation
//!         tasks:
//!           - id: task-001
//!             title: Login endpoint
//!             priority: 2
//!             criteria:
//!               - "file:src/auth.py modified"
//!               - tests added
//!           - id: task-002
//!             title: Sessions
//!             depends_on: [task-001]
//! ```

use crate::error::TrackerError;
use crate::types::{Epic, Phase, Priority, Project, Task, TaskStatus};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    #[serde(default)]
    pub epics: Vec<PlanEpic>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanEpic {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub phases: Vec<PlanPhase>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanPhase {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub tasks: Vec<PlanTask>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanTask {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub criteria: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Starting status; defaults to pending.
    #[serde(default)]
    pub status: Option<String>,
    /// RFC 3339 completion time for tasks declared as already completed.
    #[serde(default)]
    pub completed_at: Option<String>,
}

impl PlanFile {
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read plan {}", path.display()))?;
        Self::from_yaml(&content).with_context(|| format!("failed to parse plan {}", path.display()))
    }

    /// Build and validate the project graph.
    pub fn into_project(self) -> Result<Project, TrackerError> {
        let mut epics = Vec::with_capacity(self.epics.len());
        for epic in self.epics {
            let mut phases = Vec::with_capacity(epic.phases.len());
            for phase in epic.phases {
                let tasks = phase
                    .tasks
                    .into_iter()
                    .map(PlanTask::into_task)
                    .collect::<Result<Vec<_>, _>>()?;
                phases.push(Phase::new(phase.id, phase.title).with_tasks(tasks));
            }
            epics.push(Epic::new(epic.id, epic.title).with_phases(phases));
        }

        let project = Project::new(epics);
        project.validate()?;
        Ok(project)
    }
}

impl PlanTask {
    fn into_task(self) -> Result<Task, TrackerError> {
        let status = match self.status.as_deref() {
            None => TaskStatus::Pending,
            Some(s) => TaskStatus::from_str(s).ok_or_else(|| {
                TrackerError::invalid_plan(format!("task {} has unknown status {:?}", self.id, s))
            })?,
        };

        let completed_at = match self.completed_at.as_deref() {
            None => None,
            Some(s) => Some(
                chrono::DateTime::parse_from_rfc3339(s)
                    .map_err(|e| {
                        TrackerError::invalid_plan(format!(
                            "task {} has invalid completed_at {:?}: {}",
                            self.id, s, e
                        ))
                    })?
                    .timestamp_millis(),
            ),
        };

        if completed_at.is_some() && status != TaskStatus::Completed {
            return Err(TrackerError::invalid_plan(format!(
                "task {} has completed_at but status {}",
                self.id, status
            )));
        }

        let mut task = Task::new(self.id, self.title)
            .with_priority(self.priority)
            .with_criteria(self.criteria)
            .with_status(status);
        task.depends_on = self.depends_on.into_iter().collect::<BTreeSet<_>>();
        task.completed_at = completed_at;
        Ok(task)
    }
}

/// Read a plan file and build the project.
pub fn load_plan(path: &Path) -> Result<Project> {
    Ok(PlanFile::load(path)?.into_project()?)
}
