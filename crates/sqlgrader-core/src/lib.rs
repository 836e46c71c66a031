//! sqlgrader-core: scoring for text-to-SQL agents.
//! Decode each agent trajectory, compute the automatic metrics, ask a judge
//! about the answer, and aggregate the scorecards of a run.

pub mod agent;
pub mod config;
pub mod datasource;
pub mod error;
pub mod executor;
pub mod http;
pub mod judge;
pub mod markdown;
pub mod progress;
pub mod report;
pub mod runner;
pub mod scorer;
pub mod testing;
pub mod trajectory;

pub mod scorers {
    pub mod error_recovery;
    pub mod sql_validity;
    pub mod tool_efficiency;
}

pub use agent::{agent_fn, Agent, AgentResponse};
pub use config::{EvalConfig, ScoringPolicy, StepCounting};
pub use datasource::{DataSource, JsonlDataSource, VecDataSource};
pub use error::EvalError;
pub use executor::SqlExecutor;
pub use http::{HttpAgent, HttpJudge};
pub use judge::{judge_fn, AnswerQuality, Judge, JudgeRequest, JudgeVerdict, SemanticJudge};
pub use runner::{Eval, EvalBuilder};
pub use scorer::{MetricInput, TrajectoryMetric};
pub use scorers::{
    error_recovery::ErrorRecoveryMetric, sql_validity::SqlValidityMetric,
    tool_efficiency::ToolEfficiencyMetric,
};
pub use sqlgrader_types::{
    CaseResult, Difficulty, EvalRun, Example, QueryResult, RunSummary, Scorecard, Step, Trajectory,
};
