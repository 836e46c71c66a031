use sqlgrader_types::Step;

/// Input shared by every automatic metric.
#[derive(Debug, Clone, Copy)]
pub struct MetricInput<'a> {
    pub steps: &'a [Step],
    /// The agent's final answer text.
    pub answer: &'a str,
}

/// A deterministic score over a decoded trajectory.
pub trait TrajectoryMetric: Send + Sync {
    fn name(&self) -> &'static str;
    fn score(&self, input: &MetricInput<'_>) -> f64;
}
