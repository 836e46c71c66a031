use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use sqlgrader_types::{EvalRun, Scorecard};

mod artifacts;
mod database;

pub use artifacts::{save_example, SavedExample};
pub use database::Database;

/// Run history: one `runs` row per eval run and one `scorecards` row per example.
#[derive(Debug)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEntity {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub agent: String,
    pub metadata: Option<serde_json::Value>,
}

impl Store {
    /// Open a new store at the given path (e.g., "runs.db")
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                agent TEXT NOT NULL,
                metadata TEXT
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS scorecards (
                id INTEGER PRIMARY KEY,
                run_id INTEGER NOT NULL,
                example_id TEXT NOT NULL,
                difficulty TEXT NOT NULL,
                answer_quality_score REAL NOT NULL,
                answer_quality_reasoning TEXT NOT NULL,
                sql_validity REAL NOT NULL,
                tool_efficiency REAL NOT NULL,
                error_recovery REAL NOT NULL,
                agent_sql TEXT,
                agent_csv TEXT,
                answer TEXT NOT NULL,
                elapsed_secs REAL NOT NULL,
                agent_error INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY(run_id) REFERENCES runs(id)
            )",
            [],
        )?;

        Ok(())
    }

    /// Create a new run entry
    pub fn create_run(&self, agent: &str, metadata: Option<serde_json::Value>) -> Result<i64> {
        let conn = self.lock()?;
        let now = Utc::now();

        conn.execute(
            "INSERT INTO runs (created_at, agent, metadata) VALUES (?1, ?2, ?3)",
            params![now.to_rfc3339(), agent, metadata.map(|v| v.to_string())],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Save every scorecard of a finished run in one transaction.
    pub fn save_scorecards(&self, run_id: i64, run: &EvalRun) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        for sc in run.scorecards() {
            tx.execute(
                "INSERT INTO scorecards (
                    run_id, example_id, difficulty, answer_quality_score, answer_quality_reasoning,
                    sql_validity, tool_efficiency, error_recovery, agent_sql, agent_csv, answer, elapsed_secs,
                    agent_error
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                params![
                    run_id,
                    sc.id,
                    sc.difficulty.as_str(),
                    sc.answer_quality_score,
                    sc.answer_quality_reasoning,
                    sc.sql_validity,
                    sc.tool_efficiency,
                    sc.error_recovery,
                    sc.agent_sql,
                    sc.agent_csv,
                    sc.answer,
                    sc.elapsed_secs,
                    sc.agent_error,
                ],
            )?;
        }

        tx.commit()?;
        Ok(run.cases.len())
    }

    pub fn get_run(&self, run_id: i64) -> Result<Option<RunEntity>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, created_at, agent, metadata FROM runs WHERE id = ?1")?;
        let mut rows = stmt.query(params![run_id])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let created_at: String = row.get(1)?;
        let metadata: Option<String> = row.get(3)?;
        Ok(Some(RunEntity {
            id: row.get(0)?,
            created_at: DateTime::parse_from_rfc3339(&created_at)?.with_timezone(&Utc),
            agent: row.get(2)?,
            metadata: metadata.map(|m| serde_json::from_str(&m)).transpose()?,
        }))
    }

    /// Scorecards of one run, in the order they were saved.
    pub fn load_scorecards(&self, run_id: i64) -> Result<Vec<Scorecard>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT example_id, difficulty, answer_quality_score, answer_quality_reasoning,
                    sql_validity, tool_efficiency, error_recovery, agent_sql, agent_csv, answer, elapsed_secs,
                    agent_error
             FROM scorecards WHERE run_id = ?1 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![run_id])?;
        let mut cards = Vec::new();
        while let Some(row) = rows.next()? {
            let difficulty: String = row.get(1)?;
            cards.push(Scorecard {
                id: row.get(0)?,
                difficulty: difficulty.parse().map_err(|e: String| anyhow!(e))?,
                answer_quality_score: row.get(2)?,
                answer_quality_reasoning: row.get(3)?,
                sql_validity: row.get(4)?,
                tool_efficiency: row.get(5)?,
                error_recovery: row.get(6)?,
                agent_sql: row.get(7)?,
                agent_csv: row.get(8)?,
                answer: row.get(9)?,
                elapsed_secs: row.get(10)?,
                agent_error: row.get(11)?,
            });
        }
        Ok(cards)
    }
}
