use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::EvalError;
use crate::executor::SqlExecutor;

/// Instructions sent alongside every judge request.
pub const JUDGE_RUBRIC: &str = "\
Rate how well the agent answered a data analysis question.

Evaluate both the SQL approach and the output data holistically.

For the SQL query, ignore superficial differences such as:
- Aliases and formatting
- JOIN syntax variations
- Column order
- Equivalent date functions
- Additional ORDER BY/LIMIT clauses

For the output data, ignore superficial differences such as:
- Different column names for the same data (e.g. \"store\" vs \"store_name\")
- Different row ordering
- Minor rounding differences (e.g. 14.7 vs 14.71)
- Extra columns that don't change the core answer
- Different date/time formatting (e.g. \"2025-11\" vs \"2025-11-01\")

Consider the answer incorrect only if the core logic or data differs:
- Wrong GROUP BY, aggregations, filters, or JOINs
- Significantly different row counts or wrong values
- Missing key columns that the question asked for

Return a score between 0 and 1 and a brief explanation of the score.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub question: String,
    pub reference_sql: String,
    pub agent_sql: String,
    pub expected_csv: String,
    pub agent_csv: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    pub reasoning: String,
}

/// External semantic scorer.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn score(&self, request: &JudgeRequest) -> Result<JudgeVerdict>;
}

/// Wrap an async closure as a `Judge`.
pub fn judge_fn<F, Fut>(f: F) -> Arc<dyn Judge>
where
    F: Send + Sync + 'static + Fn(JudgeRequest) -> Fut,
    Fut: Future<Output = Result<JudgeVerdict>> + Send + 'static,
{
    struct ClosureJudge<F> {
        f: F,
    }

    #[async_trait]
    impl<F, Fut> Judge for ClosureJudge<F>
    where
        F: Send + Sync + 'static + Fn(JudgeRequest) -> Fut,
        Fut: Future<Output = Result<JudgeVerdict>> + Send + 'static,
    {
        async fn score(&self, request: &JudgeRequest) -> Result<JudgeVerdict> {
            (self.f)(request.clone()).await
        }
    }

    Arc::new(ClosureJudge { f })
}

/// Outcome of answer-quality scoring for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerQuality {
    pub score: f64,
    pub reasoning: String,
    /// Full, untruncated result of the candidate SQL when it executed.
    pub agent_csv: Option<String>,
}

impl AnswerQuality {
    fn failed(reasoning: String, agent_csv: Option<String>) -> Self {
        Self { score: 0.0, reasoning, agent_csv }
    }
}

/// Runs candidate SQL, trims both result sets for the prompt and asks the judge.
pub struct SemanticJudge {
    judge: Arc<dyn Judge>,
    executor: Arc<dyn SqlExecutor>,
    max_rows: usize,
}

impl SemanticJudge {
    pub fn new(judge: Arc<dyn Judge>, executor: Arc<dyn SqlExecutor>) -> Self {
        Self { judge, executor, max_rows: 50 }
    }

    pub fn max_rows(mut self, n: usize) -> Self {
        self.max_rows = n;
        self
    }

    pub async fn answer_quality(
        &self,
        agent_sql: Option<&str>,
        reference_sql: &str,
        expected_csv: &str,
        question: &str,
    ) -> AnswerQuality {
        let Some(agent_sql) = agent_sql else {
            return AnswerQuality::failed("No analytical SQL found".to_string(), None);
        };

        let agent_csv = match self.executor.execute(agent_sql).await {
            Ok(result) => result.to_csv(),
            Err(err) => {
                warn!(error = %err, "candidate SQL failed to execute");
                return AnswerQuality::failed(err.to_string(), None);
            }
        };

        let request = JudgeRequest {
            question: question.to_string(),
            reference_sql: reference_sql.to_string(),
            agent_sql: agent_sql.to_string(),
            expected_csv: truncate_csv(expected_csv, self.max_rows),
            agent_csv: truncate_csv(&agent_csv, self.max_rows),
        };

        match self.judge.score(&request).await {
            Ok(verdict) => {
                debug!(score = verdict.score, "judge verdict");
                AnswerQuality {
                    score: clamp_score(verdict.score),
                    reasoning: verdict.reasoning,
                    agent_csv: Some(agent_csv),
                }
            }
            Err(err) => {
                warn!(error = %err, "judge call failed");
                AnswerQuality::failed(
                    EvalError::JudgeInvocation(err.to_string()).to_string(),
                    Some(agent_csv),
                )
            }
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Keep the header and the first `max_rows` data rows. When rows are dropped,
/// append `... (N total rows)`.
pub fn truncate_csv(csv: &str, max_rows: usize) -> String {
    let records = csv_records(csv.trim());
    let keep = max_rows.saturating_add(1);
    if records.len() <= keep {
        return csv.to_string();
    }
    format!("{}\n... ({} total rows)", records[..keep].join("\n"), records.len() - 1)
}

/// Split on record-ending newlines. Line breaks inside quoted fields stay put.
fn csv_records(text: &str) -> Vec<&str> {
    let mut records = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\n' if !in_quotes => {
                records.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    records.push(&text[start..]);
    records
}
