//! Tracker service: the single writer in front of a [`ProjectStore`].
//!
//! Readers take [`Tracker::snapshot`] and get an `Arc<Project>` that never
//! changes underneath them. A write clones the committed project, applies
//! the operation, saves it, and only then publishes the new `Arc`. When the
//! save fails nothing is published.

use crate::clock::Clock;
use crate::config::Config;
use crate::db::ProjectStore;
use crate::graph::Transition;
use crate::report::{ProjectReport, Reporter};
use crate::source::EventSource;
use crate::types::{DecisionResponse, Project, RawEvent, TaskStatus, Timestamp};
use crate::updater::{BatchReport, DecisionOutcome, StatusUpdater};
use anyhow::{Result, anyhow};
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct Tracker<S: ProjectStore> {
    store: S,
    current: ArcSwap<Project>,
    updater: StatusUpdater,
    reporter: Reporter,
    write_lock: Mutex<()>,
}

impl<S: ProjectStore> Tracker<S> {
    /// Open the project already held by `store`.
    pub fn open(store: S, config: &Config) -> Result<Self> {
        let project = store
            .load()?
            .ok_or_else(|| anyhow!("no project found; run `rpi-tracker init --plan <file>` first"))?;
        Self::with_project(store, config, project)
    }

    /// Save `project` as the new committed state and open it.
    pub fn initialize(store: S, config: &Config, project: Project) -> Result<Self> {
        project.validate()?;
        store.save(&project)?;
        info!(tasks = project.tasks().count(), "project initialized");
        Self::with_project(store, config, project)
    }

    fn with_project(store: S, config: &Config, project: Project) -> Result<Self> {
        Ok(Self {
            store,
            current: ArcSwap::from_pointee(project),
            updater: StatusUpdater::new(config)?,
            reporter: Reporter::new(&config.report),
            write_lock: Mutex::new(()),
        })
    }

    /// Consistent view of the committed project.
    pub fn snapshot(&self) -> Arc<Project> {
        self.current.load_full()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn report(&self, clock: &dyn Clock) -> ProjectReport {
        self.reporter.report(&self.snapshot(), clock)
    }

    /// Pull new events from `source` and apply them as one batch.
    pub fn update(&self, source: &dyn EventSource) -> Result<BatchReport> {
        let cursor = self.snapshot().cursor.clone();
        let events = source.events_since(cursor.as_ref())?;
        info!(source = %source.describe(), events = events.len(), "fetched events");
        self.apply_events(&events)
    }

    pub fn apply_events(&self, events: &[RawEvent]) -> Result<BatchReport> {
        self.write(|updater, project| Ok(updater.apply_batch(project, events)))
    }

    pub fn decide(&self, decision_id: u64, response: DecisionResponse) -> Result<DecisionOutcome> {
        self.write(|updater, project| Ok(updater.resolve(project, decision_id, response)?))
    }

    pub fn set_status(&self, task_id: &str, status: TaskStatus, at: Timestamp) -> Result<Transition> {
        self.write(|updater, project| Ok(updater.override_status(project, task_id, status, at)?))
    }

    /// Acknowledge one unresolved event, or all of them with `None`.
    pub fn acknowledge(&self, event_id: Option<&str>) -> Result<Vec<String>> {
        self.write(|updater, project| Ok(updater.acknowledge(project, event_id)?))
    }

    fn write<T>(&self, op: impl FnOnce(&StatusUpdater, &mut Project) -> Result<T>) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("tracker write lock poisoned"))?;

        let mut next = Project::clone(&self.current.load());
        let out = op(&self.updater, &mut next)?;
        self.store.save(&next)?;
        self.current.store(Arc::new(next));
        Ok(out)
    }
}
