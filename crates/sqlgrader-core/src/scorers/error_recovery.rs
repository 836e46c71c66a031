use crate::config::ScoringPolicy;
use crate::scorer::{MetricInput, TrajectoryMetric};

/// Did the agent still answer after hitting SQL errors?
///
/// No errors scores 1.0. Errors followed by a real answer earn partial credit.
/// Errors with an empty or placeholder answer score 0.0.
pub struct ErrorRecoveryMetric {
    partial_credit: f64,
    no_answer_placeholder: String,
}

impl ErrorRecoveryMetric {
    pub fn new(partial_credit: f64, no_answer_placeholder: impl Into<String>) -> Self {
        Self {
            partial_credit,
            no_answer_placeholder: no_answer_placeholder.into(),
        }
    }

    pub fn from_policy(policy: &ScoringPolicy) -> Self {
        Self::new(policy.recovery_partial_credit, policy.no_answer_placeholder.clone())
    }
}

impl Default for ErrorRecoveryMetric {
    fn default() -> Self {
        Self::from_policy(&ScoringPolicy::default())
    }
}

impl TrajectoryMetric for ErrorRecoveryMetric {
    fn name(&self) -> &'static str {
        "error_recovery"
    }

    fn score(&self, input: &MetricInput<'_>) -> f64 {
        let errors = input.steps.iter().filter(|s| s.is_sql_error()).count();
        if errors == 0 {
            return 1.0;
        }
        if !input.answer.is_empty() && input.answer != self.no_answer_placeholder {
            return self.partial_credit;
        }
        0.0
    }
}
