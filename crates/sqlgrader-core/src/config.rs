use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::EvalError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalConfig {
    pub agent: AgentConfig,
    pub judge: JudgeConfig,
    pub data: DataConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub policy: ScoringPolicy,
    #[serde(default)]
    pub output: OutputConfig,
}

impl EvalConfig {
    pub fn from_yaml_str(s: &str) -> Result<Self, EvalError> {
        serde_yaml::from_str(s).map_err(|e| EvalError::Config(e.to_string()))
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, EvalError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| EvalError::Config(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_yaml_str(&content)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_name")]
    pub name: String,
    /// Forwarded verbatim with every invocation.
    #[serde(default)]
    pub config: Value,
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
}

fn default_agent_name() -> String {
    "agent".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    #[serde(flatten)]
    pub endpoint: EndpointConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum EndpointConfig {
    Http { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    pub path: PathBuf,
    /// Directory holding `eval_answer_sqls/` and `eval_answer_csvs/`.
    #[serde(default)]
    pub artifacts_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub json: Option<PathBuf>,
    #[serde(default)]
    pub html: Option<PathBuf>,
    #[serde(default)]
    pub trajectories_dir: Option<PathBuf>,
    #[serde(default)]
    pub store: Option<PathBuf>,
}

/// Which steps count toward the tool-efficiency breakpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCounting {
    /// Steps that produced an observation; a bare `finish` is not counted.
    #[default]
    Observed,
    /// Every decoded step, `finish` included.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringPolicy {
    #[serde(default = "default_recovery_partial_credit")]
    pub recovery_partial_credit: f64,
    #[serde(default = "default_no_answer_placeholder")]
    pub no_answer_placeholder: String,
    #[serde(default)]
    pub step_counting: StepCounting,
    #[serde(default = "default_judge_max_rows")]
    pub judge_max_rows: usize,
    #[serde(default = "default_exploratory_prefixes")]
    pub exploratory_prefixes: Vec<String>,
}

fn default_recovery_partial_credit() -> f64 {
    0.75
}

fn default_no_answer_placeholder() -> String {
    "(No response)".to_string()
}

fn default_judge_max_rows() -> usize {
    50
}

fn default_exploratory_prefixes() -> Vec<String> {
    vec!["SHOW".to_string(), "DESCRIBE".to_string()]
}

impl Default for ScoringPolicy {
    fn default() -> Self {
        Self {
            recovery_partial_credit: default_recovery_partial_credit(),
            no_answer_placeholder: default_no_answer_placeholder(),
            step_counting: StepCounting::default(),
            judge_max_rows: default_judge_max_rows(),
            exploratory_prefixes: default_exploratory_prefixes(),
        }
    }
}
