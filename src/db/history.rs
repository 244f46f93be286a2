//! Append-only history snapshot storage.

use super::Database;
use crate::types::{HistorySnapshot, SnapshotScope};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row, params};

fn parse_snapshot_row(row: &Row) -> rusqlite::Result<(String, String, String, Option<String>, i64, String, String)> {
    Ok((
        row.get("id")?,
        row.get("scope_kind")?,
        row.get("epic_id")?,
        row.get("phase_id")?,
        row.get("created_at")?,
        row.get("tasks")?,
        row.get("evidence_ids")?,
    ))
}

pub(crate) fn read_history(conn: &Connection) -> Result<Vec<HistorySnapshot>> {
    let mut stmt = conn.prepare(
        "SELECT id, scope_kind, epic_id, phase_id, created_at, tasks, evidence_ids
         FROM history_snapshots ORDER BY seq",
    )?;
    let rows = stmt
        .query_map([], parse_snapshot_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    rows.into_iter()
        .map(|(id, kind, epic_id, phase_id, created_at, tasks, evidence_ids)| {
            let scope = match (kind.as_str(), phase_id) {
                ("phase", Some(phase_id)) => SnapshotScope::Phase { epic_id, phase_id },
                ("epic", _) => SnapshotScope::Epic { epic_id },
                (other, _) => return Err(anyhow!("snapshot {} has unknown scope {:?}", id, other)),
            };
            Ok(HistorySnapshot {
                id,
                scope,
                created_at,
                tasks: serde_json::from_str(&tasks)?,
                evidence_ids: serde_json::from_str(&evidence_ids)?,
            })
        })
        .collect()
}

/// Insert a snapshot unless one with the same id is already stored.
/// Returns whether a row was written.
pub(crate) fn append_snapshot(conn: &Connection, snapshot: &HistorySnapshot) -> Result<bool> {
    let (kind, epic_id, phase_id) = match &snapshot.scope {
        SnapshotScope::Phase { epic_id, phase_id } => ("phase", epic_id, Some(phase_id)),
        SnapshotScope::Epic { epic_id } => ("epic", epic_id, None),
    };
    let written = conn.execute(
        "INSERT INTO history_snapshots
            (id, scope_kind, epic_id, phase_id, created_at, tasks, evidence_ids)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO NOTHING",
        params![
            snapshot.id,
            kind,
            epic_id,
            phase_id,
            snapshot.created_at,
            serde_json::to_string(&snapshot.tasks)?,
            serde_json::to_string(&snapshot.evidence_ids)?,
        ],
    )?;
    Ok(written > 0)
}

impl Database {
    /// All snapshots in creation order.
    pub fn list_history(&self) -> Result<Vec<HistorySnapshot>> {
        self.with_conn(read_history)
    }
}
