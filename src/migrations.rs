//! Schema upgrades for the next-action store.
//!
//! Each step is an embedded SQL file applied in its own transaction and
//! recorded by number and name in `schema_version`. A store written by a newer
//! build is refused rather than modified.

use std::path::PathBuf;

use rusqlite::{params, Connection, DatabaseName};
use thiserror::Error;

struct SchemaStep {
    version: i32,
    name: &'static str,
    sql: &'static str,
}

const STEPS: &[SchemaStep] = &[
    SchemaStep {
        version: 1,
        name: "baseline",
        sql: include_str!("migrations/001_baseline.sql"),
    },
    SchemaStep {
        version: 2,
        name: "attribution_snapshots",
        sql: include_str!("migrations/002_attribution_snapshots.sql"),
    },
    SchemaStep {
        version: 3,
        name: "append_only_runs",
        sql: include_str!("migrations/003_append_only_runs.sql"),
    },
];

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Store schema v{found} is newer than this build supports (v{supported}); upgrade nextaction")]
    TooNew { found: i32, supported: i32 },

    #[error("Schema step v{version} ({name}) failed: {source}")]
    Step {
        version: i32,
        name: &'static str,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Could not snapshot the store to {path} before upgrading: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Schema bookkeeping failed: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

fn latest_version() -> i32 {
    STEPS.last().map_or(0, |s| s.version)
}

/// Highest version recorded in `schema_version`, creating the table on first use.
fn recorded_version(conn: &Connection) -> Result<i32, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )?;
    let version = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })?;
    Ok(version)
}

/// Copy a file-backed store to `<db>.v<version>.bak` before changing it.
/// Returns the snapshot path, or `None` for fresh and in-memory stores.
fn snapshot_store(conn: &Connection, version: i32) -> Result<Option<PathBuf>, MigrationError> {
    let Some(db_path) = conn.path().filter(|p| !p.is_empty()) else {
        return Ok(None);
    };
    if version == 0 {
        return Ok(None);
    }

    let snapshot = PathBuf::from(format!("{db_path}.v{version}.bak"));
    conn.backup(DatabaseName::Main, &snapshot, None)
        .map_err(|source| MigrationError::Snapshot {
            path: snapshot.display().to_string(),
            source,
        })?;
    log::info!("Snapshot of schema v{} written to {}", version, snapshot.display());
    Ok(Some(snapshot))
}

fn apply(conn: &Connection, step: &SchemaStep) -> Result<(), MigrationError> {
    let as_step_error = |source: rusqlite::Error| MigrationError::Step {
        version: step.version,
        name: step.name,
        source,
    };
    let tx = conn.unchecked_transaction().map_err(as_step_error)?;
    tx.execute_batch(step.sql).map_err(as_step_error)?;
    tx.execute(
        "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
        params![step.version, step.name],
    )
    .map_err(as_step_error)?;
    tx.commit().map_err(as_step_error)?;
    log::info!("Applied schema v{} ({})", step.version, step.name);
    Ok(())
}

/// Bring the store up to the latest schema. Returns how many steps ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    let current = recorded_version(conn)?;
    if current > latest_version() {
        return Err(MigrationError::TooNew {
            found: current,
            supported: latest_version(),
        });
    }

    let pending: Vec<&SchemaStep> = STEPS.iter().filter(|s| s.version > current).collect();
    if pending.is_empty() {
        return Ok(0);
    }

    snapshot_store(conn, current)?;
    for step in &pending {
        apply(conn, step)?;
    }
    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    fn insert_action(conn: &Connection, id: &str, dedupe_key: &str, priority: &str) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO next_actions (id, dedupe_key, title, priority, source_type,
             entity_type, entity_id, created_by_rule, created_at, updated_at)
             VALUES (?1, ?2, 'T', ?3, 'reminder', 'command_center', 'cc', 'r', 'x', 'x')",
            params![id, dedupe_key, priority],
        )
    }

    #[test]
    fn test_fresh_store_reaches_latest() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn).expect("migrate"), STEPS.len());
        assert_eq!(recorded_version(&conn).unwrap(), latest_version());

        let names: Vec<String> = conn
            .prepare("SELECT name FROM schema_version ORDER BY version")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(names, vec!["baseline", "attribution_snapshots", "append_only_runs"]);

        assert_eq!(run_migrations(&conn).expect("second run"), 0);
    }

    #[test]
    fn test_schema_constraints() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();

        insert_action(&conn, "nba-1", "nba:r:command_center:cc", "high").unwrap();
        assert!(
            insert_action(&conn, "nba-2", "nba:r:command_center:cc", "high").is_err(),
            "dedupe_key is unique"
        );
        assert!(insert_action(&conn, "nba-3", "k", "urgent").is_err(), "unknown priority");

        for n in 0..2 {
            conn.execute(
                "INSERT INTO next_action_runs (id, run_key, mode, entity_type, entity_id, ran_at)
                 VALUES (?1, 'same-key', 'manual', 'command_center', 'cc', 'x')",
                params![format!("nbr-{n}")],
            )
            .expect("run_key repeats are allowed");
        }
    }

    #[test]
    fn test_newer_store_is_refused() {
        let conn = mem_db();
        recorded_version(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", []).unwrap();

        match run_migrations(&conn) {
            Err(MigrationError::TooNew { found, supported }) => {
                assert_eq!(found, 999);
                assert_eq!(supported, latest_version());
            }
            other => panic!("expected TooNew, got {other:?}"),
        }
    }

    #[test]
    fn test_failed_step_leaves_no_partial_schema() {
        let conn = mem_db();
        recorded_version(&conn).unwrap();
        let broken = SchemaStep {
            version: 1,
            name: "broken",
            sql: "CREATE TABLE half_done (id TEXT); SELECT * FROM missing_table;",
        };

        let err = apply(&conn, &broken).unwrap_err();
        assert!(err.to_string().contains("v1 (broken)"), "{err}");
        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE name = 'half_done'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 0);
        assert_eq!(recorded_version(&conn).unwrap(), 0);
    }

    #[test]
    fn test_upgrade_keeps_runs_and_snapshots_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("upgrade.db");
        let conn = Connection::open(&db_path).expect("open db");

        recorded_version(&conn).unwrap();
        for step in &STEPS[..2] {
            apply(&conn, step).unwrap();
        }
        conn.execute(
            "INSERT INTO next_action_runs (run_key, mode, entity_type, entity_id, meta,
             run_count, first_run_at, last_run_at)
             VALUES ('k', 'manual', 'command_center', 'cc', '{\"created\":2}', 4, 'a', 'b')",
            [],
        )
        .unwrap();

        assert_eq!(run_migrations(&conn).expect("upgrade"), 1);
        assert!(dir.path().join("upgrade.db.v2.bak").exists());

        let (id, meta, ran_at): (String, String, String) = conn
            .query_row("SELECT id, meta, ran_at FROM next_action_runs WHERE run_key = 'k'", [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .unwrap();
        assert!(id.starts_with("nbr-"));
        assert_eq!(meta, "{\"created\":2}");
        assert_eq!(ran_at, "b");
    }
}
