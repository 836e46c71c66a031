use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use sqlgrader_types::{check_artifact_id, Difficulty, Example, CSV_ARTIFACT_DIR, SQL_ARTIFACT_DIR};

use crate::Database;

/// What `save_example` wrote, plus the dataset entry built from it.
#[derive(Debug, Clone)]
pub struct SavedExample {
    pub example: Example,
    pub sql_path: PathBuf,
    pub csv_path: PathBuf,
    pub rows: usize,
}

/// Record a new reference example: run `sql` against `db`, then write
/// `<id>.sql` and `<id>.csv` under the artifacts directory.
///
/// The SQL runs before anything is written, so a failing statement leaves no
/// partial artifacts behind.
pub fn save_example(
    db: &Database,
    artifacts_dir: impl AsRef<Path>,
    id: &str,
    question: &str,
    sql: &str,
    difficulty: Difficulty,
    expected_tables: Vec<String>,
) -> Result<SavedExample> {
    check_artifact_id(id)?;
    let result = db
        .query(sql)
        .with_context(|| format!("reference SQL for {id} failed"))?;
    let csv = result.to_csv();

    let base = artifacts_dir.as_ref();
    let sql_dir = base.join(SQL_ARTIFACT_DIR);
    let csv_dir = base.join(CSV_ARTIFACT_DIR);
    fs::create_dir_all(&sql_dir).with_context(|| format!("Failed to create {:?}", sql_dir))?;
    fs::create_dir_all(&csv_dir).with_context(|| format!("Failed to create {:?}", csv_dir))?;

    let sql_path = sql_dir.join(format!("{id}.sql"));
    fs::write(&sql_path, sql).with_context(|| format!("Failed to write {:?}", sql_path))?;
    let csv_path = csv_dir.join(format!("{id}.csv"));
    fs::write(&csv_path, &csv).with_context(|| format!("Failed to write {:?}", csv_path))?;
    info!(id, rows = result.row_count(), "saved reference example");

    Ok(SavedExample {
        example: Example::new(id, question, sql, csv, difficulty).with_expected_tables(expected_tables),
        sql_path,
        csv_path,
        rows: result.row_count(),
    })
}
