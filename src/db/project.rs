//! Project persistence: the whole aggregate is loaded and saved as one unit.

use super::Database;
use super::history::{append_snapshot, read_history};
use crate::types::{
    Epic, EventCursor, PendingDecision, Phase, Project, RawEvent, Task, TaskStatus,
    UnresolvedEvent,
};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, OptionalExtension, params};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

// Children first so foreign keys never dangle mid-transaction
const GRAPH_TABLES: [&str; 7] = [
    "dependencies",
    "task_criteria",
    "tasks",
    "phases",
    "epics",
    "pending_decisions",
    "unresolved_events",
];

impl Database {
    /// Load the committed project, or `None` if nothing was ever saved.
    pub fn load_project(&self) -> Result<Option<Project>> {
        self.with_conn(|conn| {
            let state: Option<(Option<i64>, Option<String>, i64)> = conn
                .query_row(
                    "SELECT cursor_timestamp, cursor_event_id, next_decision_id
                     FROM tracker_state WHERE id = 1",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;

            let Some((cursor_ts, cursor_id, next_decision_id)) = state else {
                return Ok(None);
            };

            let cursor = match (cursor_ts, cursor_id) {
                (Some(ts), Some(id)) => Some(EventCursor::new(ts, id)),
                _ => None,
            };

            Ok(Some(Project {
                epics: read_graph(conn)?,
                cursor,
                history: read_history(conn)?,
                pending: read_pending(conn)?,
                next_decision_id: u64::try_from(next_decision_id)?,
                unresolved: read_unresolved(conn)?,
            }))
        })
    }

    /// Replace the stored project in a single transaction.
    ///
    /// History is append-only: snapshots already stored are left untouched.
    pub fn save_project(&self, project: &Project) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            for table in GRAPH_TABLES {
                tx.execute(&format!("DELETE FROM {}", table), [])?;
            }

            write_graph(&tx, project)?;
            write_pending(&tx, &project.pending)?;
            write_unresolved(&tx, &project.unresolved)?;

            let mut appended = 0;
            for snapshot in &project.history {
                if append_snapshot(&tx, snapshot)? {
                    appended += 1;
                }
            }

            tx.execute(
                "INSERT OR REPLACE INTO tracker_state
                    (id, cursor_timestamp, cursor_event_id, next_decision_id)
                 VALUES (1, ?1, ?2, ?3)",
                params![
                    project.cursor.as_ref().map(|c| c.timestamp),
                    project.cursor.as_ref().map(|c| c.event_id.as_str()),
                    i64::try_from(project.next_decision_id)?,
                ],
            )?;

            tx.commit()?;
            debug!(snapshots_appended = appended, "project saved");
            Ok(())
        })
    }

    /// Remove everything, history included. Used when re-initializing from a plan.
    pub fn reset(&self) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            for table in GRAPH_TABLES {
                tx.execute(&format!("DELETE FROM {}", table), [])?;
            }
            tx.execute("DELETE FROM history_snapshots", [])?;
            tx.execute("DELETE FROM tracker_state", [])?;
            tx.commit()?;
            Ok(())
        })
    }
}

fn write_graph(conn: &Connection, project: &Project) -> Result<()> {
    for (ei, epic) in project.epics.iter().enumerate() {
        conn.execute(
            "INSERT INTO epics (id, title, position, completed_at) VALUES (?1, ?2, ?3, ?4)",
            params![epic.id, epic.title, ei as i64, epic.completed_at],
        )?;

        for (pi, phase) in epic.phases.iter().enumerate() {
            conn.execute(
                "INSERT INTO phases (epic_id, id, title, position, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![epic.id, phase.id, phase.title, pi as i64, phase.completed_at],
            )?;

            for (ti, task) in phase.tasks.iter().enumerate() {
                conn.execute(
                    "INSERT INTO tasks
                        (id, epic_id, phase_id, position, title, priority, status, completed_at,
                         completed_by, evidence, touched)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        task.id,
                        epic.id,
                        phase.id,
                        ti as i64,
                        task.title,
                        task.priority,
                        task.status.as_str(),
                        task.completed_at,
                        task.completed_by,
                        serde_json::to_string(&task.evidence)?,
                        serde_json::to_string(&task.touched)?,
                    ],
                )?;

                for (ci, criterion) in task.criteria.iter().enumerate() {
                    conn.execute(
                        "INSERT INTO task_criteria (task_id, position, criterion, satisfied)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![
                            task.id,
                            ci as i64,
                            criterion,
                            task.satisfied.contains(criterion)
                        ],
                    )?;
                }
            }
        }
    }

    // Dependencies last: every task row exists by now
    for task in project.tasks() {
        for dep in &task.depends_on {
            conn.execute(
                "INSERT INTO dependencies (from_task_id, to_task_id) VALUES (?1, ?2)",
                params![dep, task.id],
            )?;
        }
    }

    Ok(())
}

fn read_graph(conn: &Connection) -> Result<Vec<Epic>> {
    let mut criteria: HashMap<String, (Vec<String>, BTreeSet<String>)> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT task_id, criterion, satisfied FROM task_criteria ORDER BY task_id, position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
            ))
        })?;
        for row in rows {
            let (task_id, criterion, satisfied) = row?;
            let entry = criteria.entry(task_id).or_default();
            if satisfied {
                entry.1.insert(criterion.clone());
            }
            entry.0.push(criterion);
        }
    }

    let mut deps: HashMap<String, BTreeSet<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare("SELECT from_task_id, to_task_id FROM dependencies")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (from, to) = row?;
            deps.entry(to).or_default().insert(from);
        }
    }

    let mut epic_stmt =
        conn.prepare("SELECT id, title, completed_at FROM epics ORDER BY position")?;
    let mut epics: Vec<Epic> = epic_stmt
        .query_map([], |row| {
            Ok(Epic {
                id: row.get(0)?,
                title: row.get(1)?,
                phases: Vec::new(),
                completed_at: row.get(2)?,
            })
        })?
        .collect::<rusqlite::Result<_>>()?;

    let mut phase_stmt = conn.prepare(
        "SELECT id, title, completed_at FROM phases WHERE epic_id = ?1 ORDER BY position",
    )?;
    let mut task_stmt = conn.prepare(
        "SELECT id, title, priority, status, completed_at, completed_by, evidence, touched
         FROM tasks WHERE epic_id = ?1 AND phase_id = ?2 ORDER BY position",
    )?;

    for epic in &mut epics {
        epic.phases = phase_stmt
            .query_map(params![epic.id], |row| {
                Ok(Phase {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    tasks: Vec::new(),
                    completed_at: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;

        for phase in &mut epic.phases {
            let rows = task_stmt
                .query_map(params![epic.id, phase.id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i32>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<i64>>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            for (id, title, priority, status, completed_at, completed_by, evidence, touched) in rows {
                let status = TaskStatus::from_str(&status)
                    .ok_or_else(|| anyhow!("task {} has unknown status {:?}", id, status))?;
                let (criteria, satisfied) = criteria.remove(&id).unwrap_or_default();
                phase.tasks.push(Task {
                    depends_on: deps.remove(&id).unwrap_or_default(),
                    id,
                    title,
                    priority,
                    criteria,
                    status,
                    completed_at,
                    satisfied,
                    completed_by,
                    evidence: serde_json::from_str(&evidence)?,
                    touched: serde_json::from_str(&touched)?,
                });
            }
        }
    }

    Ok(epics)
}

fn write_pending(conn: &Connection, pending: &[PendingDecision]) -> Result<()> {
    for d in pending {
        conn.execute(
            "INSERT INTO pending_decisions
                (id, task_id, confidence, proposed, evidence_ids, evidence_at, changed,
                 latest_event)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                i64::try_from(d.id)?,
                d.task_id,
                d.confidence,
                serde_json::to_string(&d.proposed)?,
                serde_json::to_string(&d.evidence_ids)?,
                d.evidence_at,
                serde_json::to_string(&d.changed)?,
                d.latest_event,
            ],
        )?;
    }
    Ok(())
}

fn read_pending(conn: &Connection) -> Result<Vec<PendingDecision>> {
    let mut stmt = conn.prepare(
        "SELECT id, task_id, confidence, proposed, evidence_ids, evidence_at, changed,
                latest_event
         FROM pending_decisions ORDER BY id",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, Option<String>>(7)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, task_id, confidence, proposed, evidence_ids, evidence_at, changed, latest_event)| {
            Ok(PendingDecision {
                id: u64::try_from(id)?,
                task_id,
                confidence,
                proposed: serde_json::from_str(&proposed)?,
                evidence_ids: serde_json::from_str(&evidence_ids)?,
                changed: serde_json::from_str(&changed)?,
                evidence_at,
                latest_event,
            })
        })
        .collect()
}

fn write_unresolved(conn: &Connection, unresolved: &[UnresolvedEvent]) -> Result<()> {
    for u in unresolved {
        conn.execute(
            "INSERT INTO unresolved_events
                (event_id, event_at, message, changed, author, references_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                u.event.id,
                u.event.timestamp,
                u.event.message,
                serde_json::to_string(&u.event.changed)?,
                u.event.author,
                serde_json::to_string(&u.references)?,
            ],
        )?;
    }
    Ok(())
}

fn read_unresolved(conn: &Connection) -> Result<Vec<UnresolvedEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, event_at, message, changed, author, references_json
         FROM unresolved_events ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, timestamp, message, changed, author, references)| {
            Ok(UnresolvedEvent {
                event: RawEvent {
                    id,
                    message,
                    timestamp,
                    changed: serde_json::from_str(&changed)?,
                    author,
                },
                references: serde_json::from_str(&references)?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ProjectStore;

    fn sample() -> Project {
        let mut t1 = Task::new("t1", "first")
            .with_criteria(["file:a.py modified", "tests added"])
            .with_priority(3)
            .with_status(TaskStatus::Completed);
        t1.completed_at = Some(100);
        t1.completed_by = Some("abc".into());
        t1.satisfied.insert("tests added".into());
        t1.note_evidence(&["abc".to_string()], &["src/a.py".to_string()]);
        let t2 = Task::new("t2", "second").with_dependencies(["t1"]);
        let phase = Phase::new("p1", "Phase").with_tasks(vec![t1, t2]);
        let mut project = Project::new(vec![Epic::new("e1", "Epic").with_phases(vec![phase])]);
        project.cursor = Some(EventCursor::new(100, "abc"));
        project.next_decision_id = 4;
        project.pending.push(PendingDecision {
            id: 4,
            task_id: "t2".into(),
            confidence: 0.5,
            proposed: vec![],
            evidence_ids: vec!["abc".into()],
            changed: vec!["b.py".into()],
            evidence_at: 100,
            latest_event: Some("abc".into()),
        });
        project.record_unresolved(UnresolvedEvent {
            event: RawEvent::new("def", "see task-999", 90, &["src/x.py"]),
            references: vec!["task-999".into()],
        });
        project
    }

    #[test]
    fn test_empty_database_has_no_project() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load().unwrap().is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let project = sample();
        db.save(&project).unwrap();
        assert_eq!(db.load().unwrap(), Some(project));
    }

    #[test]
    fn test_resave_replaces_graph() {
        let db = Database::open_in_memory().unwrap();
        let mut project = sample();
        db.save(&project).unwrap();

        project.epics[0].phases[0].tasks.pop();
        project.pending.clear();
        project.unresolved.clear();
        db.save(&project).unwrap();

        let loaded = db.load().unwrap().unwrap();
        assert_eq!(loaded.tasks().count(), 1);
        assert!(loaded.pending.is_empty());
        assert!(loaded.unresolved.is_empty());
    }

    #[test]
    fn test_reset_clears_everything() {
        let db = Database::open_in_memory().unwrap();
        db.save(&sample()).unwrap();
        db.reset().unwrap();
        assert!(db.load().unwrap().is_none());
    }
}
