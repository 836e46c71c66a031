use crate::scorer::{MetricInput, TrajectoryMetric};

/// Fraction of completed SQL tool calls whose observation is not an error.
/// A trajectory with no SQL calls is vacuously valid.
pub struct SqlValidityMetric;

impl TrajectoryMetric for SqlValidityMetric {
    fn name(&self) -> &'static str {
        "sql_validity"
    }

    fn score(&self, input: &MetricInput<'_>) -> f64 {
        let attempts = input
            .steps
            .iter()
            .filter(|s| s.is_sql_call() && s.observation.is_some());
        let (total, errors) = attempts.fold((0usize, 0usize), |(total, errors), s| {
            (total + 1, errors + usize::from(s.is_sql_error()))
        });
        if total == 0 {
            return 1.0;
        }
        (total - errors) as f64 / total as f64
    }
}
