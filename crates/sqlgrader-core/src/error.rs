use thiserror::Error;

pub use sqlgrader_types::EmptyRun;

/// Failures the pipeline distinguishes. Everything except `EmptyDataset`,
/// `Dataset` and `Config` is caught per example and turned into a score.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("Agent error: {0}")]
    AgentInvocation(String),

    #[error("SQL execution error: {0}")]
    SqlExecution(String),

    #[error("Judge error: {0}")]
    JudgeInvocation(String),

    #[error("empty dataset: {0}")]
    EmptyDataset(#[from] EmptyRun),

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("config error: {0}")]
    Config(String),
}
