use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tabled::Tabled;
use thiserror::Error;

pub mod table;

pub use table::{escape_csv_field, parse_csv, CsvError, QueryResult};

/// Tool name the agent uses to run SQL against the database.
pub const EXECUTE_SQL_TOOL: &str = "execute_sql";

/// Tool name that terminates a trajectory.
pub const FINISH_TOOL: &str = "finish";

/// Prefix the SQL tool puts on an observation when the statement failed.
/// Every automatic metric keys off this exact string.
pub const SQL_ERROR_MARKER: &str = "SQL Error:";

/// Reference SQL files live at `<artifacts>/eval_answer_sqls/<id>.sql`.
pub const SQL_ARTIFACT_DIR: &str = "eval_answer_sqls";

/// Expected results live at `<artifacts>/eval_answer_csvs/<id>.csv`.
pub const CSV_ARTIFACT_DIR: &str = "eval_answer_csvs";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("example id {0:?} cannot be used as a file name")]
pub struct InvalidArtifactId(pub String);

/// Example ids become file names (`<id>.sql`, `<id>.csv`, `<id>.md`), so they
/// must be a single path component.
pub fn check_artifact_id(id: &str) -> Result<(), InvalidArtifactId> {
    let bad = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(|c: char| matches!(c, '/' | '\\' | '\0'));
    if bad {
        return Err(InvalidArtifactId(id.to_string()));
    }
    Ok(())
}

/// Raw agent trace, keyed by `"{field}_{index}"` (`thought_0`, `tool_name_0`, ...).
///
/// The harness only reads it; decoding into [`Step`]s happens once, up front.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Trajectory(pub Map<String, Value>);

impl Trajectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `"{field}_{index}"`.
    pub fn field(&self, field: &str, index: usize) -> Option<&Value> {
        self.0.get(&format!("{field}_{index}"))
    }

    pub fn insert(&mut self, field: &str, index: usize, value: impl Into<Value>) {
        self.0.insert(format!("{field}_{index}"), value.into());
    }

    /// Builder-style helper for assembling one full step.
    pub fn with_step(
        mut self,
        index: usize,
        thought: &str,
        tool_name: &str,
        tool_args: Value,
        observation: Option<&str>,
    ) -> Self {
        self.insert("thought", index, thought);
        self.insert("tool_name", index, tool_name);
        self.insert("tool_args", index, tool_args);
        if let Some(obs) = observation {
            self.insert("observation", index, obs);
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    ExecuteSql,
    Finish,
    Other(String),
}

impl ToolName {
    pub fn parse(name: &str) -> Self {
        match name {
            EXECUTE_SQL_TOOL => ToolName::ExecuteSql,
            FINISH_TOOL => ToolName::Finish,
            other => ToolName::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ToolName::ExecuteSql => EXECUTE_SQL_TOOL,
            ToolName::Finish => FINISH_TOOL,
            ToolName::Other(name) => name,
        }
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool arguments, resolved once when the trajectory is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolArgs {
    Structured(Map<String, Value>),
    /// Text that did not decode to a JSON object; kept verbatim for display.
    Raw(String),
}

impl ToolArgs {
    /// String argument by key. Raw arguments have no keys.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self {
            ToolArgs::Structured(map) => map.get(key).and_then(Value::as_str),
            ToolArgs::Raw(_) => None,
        }
    }
}

/// One decoded trajectory index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub thought: String,
    pub tool_name: ToolName,
    pub tool_args: ToolArgs,
    pub observation: Option<String>,
}

impl Step {
    pub fn is_sql_call(&self) -> bool {
        self.tool_name == ToolName::ExecuteSql
    }

    pub fn is_finish(&self) -> bool {
        self.tool_name == ToolName::Finish
    }

    /// SQL call whose observation carries the error marker.
    pub fn is_sql_error(&self) -> bool {
        self.is_sql_call()
            && self
                .observation
                .as_deref()
                .is_some_and(|obs| obs.starts_with(SQL_ERROR_MARKER))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
    Impossible,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
            Difficulty::Impossible => "impossible",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            "impossible" => Ok(Difficulty::Impossible),
            other => Err(format!("unknown difficulty '{other}'")),
        }
    }
}

/// One dataset entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub id: String,
    pub question: String,
    pub reference_sql: String,
    /// Expected result as CSV text with a header row.
    pub expected_answer: String,
    pub difficulty: Difficulty,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expected_tables: Vec<String>,
    #[serde(default)]
    pub impossible: bool,
}

impl Example {
    pub fn new(
        id: impl Into<String>,
        question: impl Into<String>,
        reference_sql: impl Into<String>,
        expected_answer: impl Into<String>,
        difficulty: Difficulty,
    ) -> Self {
        Self {
            id: id.into(),
            question: question.into(),
            reference_sql: reference_sql.into(),
            expected_answer: expected_answer.into(),
            difficulty,
            expected_tables: Vec::new(),
            impossible: difficulty == Difficulty::Impossible,
        }
    }

    pub fn with_expected_tables<I, S>(mut self, tables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_tables = tables.into_iter().map(Into::into).collect();
        self
    }
}

/// Per-example result. Built once by the example scorer and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scorecard {
    pub id: String,
    pub difficulty: Difficulty,
    pub answer_quality_score: f64,
    pub answer_quality_reasoning: String,
    pub sql_validity: f64,
    pub tool_efficiency: f64,
    pub error_recovery: f64,
    pub agent_sql: Option<String>,
    pub agent_csv: Option<String>,
    pub answer: String,
    pub elapsed_secs: f64,
    /// Set when the agent itself failed and no trace was scored.
    #[serde(default)]
    pub agent_error: bool,
}

/// Token accounting for one model, passed through from the agent/judge layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_details: Option<CostDetails>,
}

impl ModelUsage {
    pub fn cached_tokens(&self) -> u64 {
        self.prompt_tokens_details
            .as_ref()
            .and_then(|d| d.cached_tokens)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default)]
    pub cached_tokens: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostDetails {
    #[serde(default)]
    pub upstream_inference_prompt_cost: Option<f64>,
    #[serde(default)]
    pub upstream_inference_completions_cost: Option<f64>,
}

/// Usage per model name.
pub type UsageRecord = BTreeMap<String, ModelUsage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot aggregate an empty run")]
pub struct EmptyRun;

/// Averages of the numeric scorecard fields across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub avg_answer_quality: f64,
    pub avg_sql_validity: f64,
    pub avg_tool_efficiency: f64,
    pub avg_error_recovery: f64,
    pub total_elapsed_secs: f64,
}

impl RunSummary {
    pub fn from_scorecards(cards: &[Scorecard]) -> Result<Self, EmptyRun> {
        if cards.is_empty() {
            return Err(EmptyRun);
        }
        let n = cards.len() as f64;
        let mean = |f: fn(&Scorecard) -> f64| cards.iter().map(f).sum::<f64>() / n;

        Ok(Self {
            total: cards.len(),
            avg_answer_quality: mean(|c| c.answer_quality_score),
            avg_sql_validity: mean(|c| c.sql_validity),
            avg_tool_efficiency: mean(|c| c.tool_efficiency),
            avg_error_recovery: mean(|c| c.error_recovery),
            total_elapsed_secs: cards.iter().map(|c| c.elapsed_secs).sum(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub example: Example,
    pub scorecard: Scorecard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRun {
    pub cases: Vec<CaseResult>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Tabled)]
struct SummaryRow {
    #[tabled(rename = "#")]
    index: usize,
    id: String,
    difficulty: String,
    efficiency: String,
    sql_valid: String,
    recovery: String,
    answer_quality: String,
    elapsed: String,
}

impl EvalRun {
    pub fn scorecards(&self) -> impl Iterator<Item = &Scorecard> {
        self.cases.iter().map(|c| &c.scorecard)
    }

    pub fn summary_table(&self) -> String {
        use tabled::Table;
        let rows: Vec<SummaryRow> = self
            .scorecards()
            .enumerate()
            .map(|(i, sc)| SummaryRow {
                index: i + 1,
                id: truncate(&sc.id, 48),
                difficulty: sc.difficulty.to_string(),
                efficiency: format!("{:.2}", sc.tool_efficiency),
                sql_valid: format!("{:.2}", sc.sql_validity),
                recovery: format!("{:.2}", sc.error_recovery),
                answer_quality: format!("{:.2}", sc.answer_quality_score),
                elapsed: format!("{:.1}s", sc.elapsed_secs),
            })
            .collect();

        let table_str = Table::new(rows).to_string();

        let s = &self.summary;
        let summary_text = format!(
            "Total: {}  Efficiency: {:.2}  SQL validity: {:.2}  Recovery: {:.2}  Answer quality: {:.2}  Time: {:.0}s",
            s.total,
            s.avg_tool_efficiency,
            s.avg_sql_validity,
            s.avg_error_recovery,
            s.avg_answer_quality,
            s.total_elapsed_secs
        );

        format!("{}\n\n{}\n", table_str, summary_text)
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let mut truncated = s.chars().take(max_len.saturating_sub(1)).collect::<String>();
    truncated.push('…');
    truncated
}
