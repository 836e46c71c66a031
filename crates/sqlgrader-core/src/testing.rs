use anyhow::Result;
use sqlgrader_types::EvalRun;

use crate::runner::REFUSED_REASONING;

/// Helper to assert the average answer quality meets a threshold.
///
/// Use this in your `#[tokio::test]` functions.
///
/// # Example
/// ```ignore
/// #[tokio::test]
/// async fn test_my_agent() -> Result<()> {
///     let mut eval = Eval::builder()
///         .data_source(data)
///         .agent(agent)
///         .judge(judge)
///         .executor(db)
///         .build()?;
///
///     let run = eval.run().await?;
///     assert_avg_answer_quality(&run, 0.8)?;
///     Ok(())
/// }
/// ```
pub fn assert_avg_answer_quality(run: &EvalRun, min: f64) -> Result<()> {
    if run.summary.avg_answer_quality < min {
        anyhow::bail!(
            "Evaluation failed: avg answer quality {:.3} is below threshold {:.3}\n{}",
            run.summary.avg_answer_quality,
            min,
            run.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert average SQL validity meets a threshold.
pub fn assert_avg_sql_validity(run: &EvalRun, min: f64) -> Result<()> {
    if run.summary.avg_sql_validity < min {
        anyhow::bail!(
            "Evaluation failed: avg SQL validity {:.3} is below threshold {:.3}\n{}",
            run.summary.avg_sql_validity,
            min,
            run.summary_table()
        );
    }
    Ok(())
}

/// Helper to assert no example failed inside the agent itself.
pub fn assert_no_agent_errors(run: &EvalRun) -> Result<()> {
    let failed: Vec<&str> = run
        .scorecards()
        .filter(|sc| sc.agent_error)
        .map(|sc| sc.id.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!(
            "Evaluation failed: agent errored on {}/{} examples ({})\n{}",
            failed.len(),
            run.summary.total,
            failed.join(", "),
            run.summary_table()
        );
    }
    Ok(())
}

/// Count of impossible questions the agent refused to answer with SQL.
pub fn refused_count(run: &EvalRun) -> usize {
    run.scorecards()
        .filter(|sc| sc.answer_quality_reasoning == REFUSED_REASONING)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlgrader_types::{CaseResult, Difficulty, Example, RunSummary, Scorecard};

    fn card(id: &str, quality: f64, reasoning: &str) -> Scorecard {
        Scorecard {
            id: id.into(),
            difficulty: Difficulty::Easy,
            answer_quality_score: quality,
            answer_quality_reasoning: reasoning.into(),
            sql_validity: 1.0,
            tool_efficiency: 1.0,
            error_recovery: 1.0,
            agent_sql: None,
            agent_csv: None,
            answer: String::new(),
            elapsed_secs: 0.5,
            agent_error: false,
        }
    }

    fn failed(id: &str, reasoning: &str) -> Scorecard {
        Scorecard { agent_error: true, ..card(id, 0.0, reasoning) }
    }

    fn run_of(cards: Vec<Scorecard>) -> EvalRun {
        let summary = RunSummary::from_scorecards(&cards).unwrap();
        let cases = cards
            .into_iter()
            .map(|scorecard| CaseResult {
                example: Example::new(scorecard.id.clone(), "q", "SELECT 1", "x\n1\n", Difficulty::Easy),
                scorecard,
            })
            .collect();
        EvalRun { cases, summary }
    }

    #[test]
    fn answer_quality_threshold() {
        let run = run_of(vec![card("a", 1.0, "ok"), card("b", 0.5, "meh")]);
        assert!(assert_avg_answer_quality(&run, 0.75).is_ok());
        let err = assert_avg_answer_quality(&run, 0.8).unwrap_err();
        assert!(err.to_string().contains("0.750"));
        assert!(assert_avg_sql_validity(&run, 1.0).is_ok());
    }

    #[test]
    fn agent_errors_are_listed() {
        let run = run_of(vec![card("a", 1.0, "ok"), failed("b", "Agent error: timeout")]);
        let err = assert_no_agent_errors(&run).unwrap_err();
        assert!(err.to_string().contains("1/2"));
        assert!(err.to_string().contains("(b)"));
    }

    #[test]
    fn agent_errors_follow_the_flag_not_the_reasoning() {
        let run = run_of(vec![
            card("a", 0.0, "Agent error: mentioned by the judge"),
            failed("b", "upstream returned 503"),
        ]);
        let err = assert_no_agent_errors(&run).unwrap_err();
        assert!(err.to_string().contains("1/2"));
        assert!(err.to_string().contains("(b)"));
        assert!(assert_no_agent_errors(&run_of(vec![card("a", 0.0, "Agent error: judge text")])).is_ok());
    }

    #[test]
    fn counts_refusals() {
        let run = run_of(vec![card("a", 1.0, REFUSED_REASONING), card("b", 1.0, "ok")]);
        assert_eq!(refused_count(&run), 1);
        assert!(assert_no_agent_errors(&run).is_ok());
    }
}
