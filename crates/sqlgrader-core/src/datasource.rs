use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::EvalError;
use sqlgrader_types::{check_artifact_id, Difficulty, Example, CSV_ARTIFACT_DIR as CSV_DIR, SQL_ARTIFACT_DIR as SQL_DIR};

#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Vec<Example>>;
}

pub struct VecDataSource {
    examples: Vec<Example>,
}

impl VecDataSource {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples }
    }
}

#[async_trait]
impl DataSource for VecDataSource {
    async fn load(&self) -> Result<Vec<Example>> {
        Ok(self.examples.clone())
    }
}

#[derive(Debug, Deserialize)]
struct ExampleLine {
    id: String,
    question: String,
    #[serde(default)]
    reference_sql: Option<String>,
    #[serde(default)]
    expected_answer: Option<String>,
    difficulty: Difficulty,
    #[serde(default)]
    expected_tables: Vec<String>,
}

/// Read JSONL where each line is
/// `{"id", "question", "reference_sql"?, "expected_answer"?, "difficulty", "expected_tables"?}`.
///
/// With an artifacts directory, a missing `reference_sql` is read from
/// `eval_answer_sqls/<id>.sql` and a missing `expected_answer` from
/// `eval_answer_csvs/<id>.csv`.
pub struct JsonlDataSource {
    path: PathBuf,
    artifacts_dir: Option<PathBuf>,
}

impl JsonlDataSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), artifacts_dir: None }
    }

    pub fn with_artifacts_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.artifacts_dir = Some(dir.into());
        self
    }

    async fn resolve(
        &self,
        inline: Option<String>,
        subdir: &str,
        id: &str,
        ext: &str,
        line_no: usize,
        what: &str,
    ) -> Result<String> {
        if let Some(v) = inline {
            return Ok(v);
        }
        let dir = self
            .artifacts_dir
            .as_ref()
            .ok_or_else(|| {
                EvalError::Dataset(format!("Line {}: missing '{}' and no artifacts directory", line_no, what))
            })?;
        let path = dir.join(subdir).join(format!("{id}.{ext}"));
        tokio_fs_read_to_string(&path)
            .await
            .with_context(|| format!("Line {}: missing '{}'", line_no, what))
    }
}

#[async_trait]
impl DataSource for JsonlDataSource {
    async fn load(&self) -> Result<Vec<Example>> {
        let content = tokio_fs_read_to_string(&self.path).await?;
        let mut examples = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = idx + 1;
            let raw: ExampleLine = serde_json::from_str(line)
                .with_context(|| format!("Invalid example on line {}", line_no))?;
            check_artifact_id(&raw.id)
                .map_err(|e| EvalError::Dataset(format!("Line {}: {}", line_no, e)))?;

            let reference_sql = self
                .resolve(raw.reference_sql, SQL_DIR, &raw.id, "sql", line_no, "reference_sql")
                .await?;
            let expected_answer = self
                .resolve(raw.expected_answer, CSV_DIR, &raw.id, "csv", line_no, "expected_answer")
                .await?;

            examples.push(
                Example::new(raw.id, raw.question, reference_sql, expected_answer, raw.difficulty)
                    .with_expected_tables(raw.expected_tables),
            );
        }
        Ok(examples)
    }
}

#[cfg(not(feature = "sync-fs"))]
async fn tokio_fs_read_to_string(path: &Path) -> Result<String> {
    use tokio::fs;
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

#[cfg(feature = "sync-fs")]
async fn tokio_fs_read_to_string(path: &Path) -> Result<String> {
    use std::fs;
    use tokio::task;
    let path_clone = path.to_path_buf();
    let content = task::spawn_blocking(move || {
        fs::read_to_string(&path_clone).with_context(|| format!("Failed to read {:?}", path_clone))
    })
    .await
    .map_err(|e| anyhow::anyhow!(e))??;
    Ok(content)
}
