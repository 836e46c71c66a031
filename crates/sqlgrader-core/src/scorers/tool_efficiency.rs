use crate::config::StepCounting;
use crate::scorer::{MetricInput, TrajectoryMetric};

/// Fewer steps is better: up to 4 scores 1.0, up to 7 scores 0.5, beyond that 0.25.
pub struct ToolEfficiencyMetric {
    counting: StepCounting,
}

impl ToolEfficiencyMetric {
    pub fn new(counting: StepCounting) -> Self {
        Self { counting }
    }

    pub fn step_count(&self, input: &MetricInput<'_>) -> usize {
        match self.counting {
            StepCounting::Observed => input.steps.iter().filter(|s| s.observation.is_some()).count(),
            StepCounting::All => input.steps.len(),
        }
    }
}

impl Default for ToolEfficiencyMetric {
    fn default() -> Self {
        Self::new(StepCounting::default())
    }
}

pub fn efficiency_for(steps: usize) -> f64 {
    match steps {
        0..=4 => 1.0,
        5..=7 => 0.5,
        _ => 0.25,
    }
}

impl TrajectoryMetric for ToolEfficiencyMetric {
    fn name(&self) -> &'static str {
        "tool_efficiency"
    }

    fn score(&self, input: &MetricInput<'_>) -> f64 {
        efficiency_for(self.step_count(input))
    }
}
