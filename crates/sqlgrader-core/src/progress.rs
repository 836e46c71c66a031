use std::io::{self, Write};

use sqlgrader_types::{RunSummary, Scorecard};

const RULE_WIDTH: usize = 100;

/// Fixed-width results table written row by row while a run progresses.
pub struct ProgressTable {
    out: Box<dyn Write + Send>,
}

impl ProgressTable {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    pub fn header(&mut self, total: usize, agent_name: &str) -> io::Result<()> {
        writeln!(self.out, "Running eval on {total} examples with {agent_name}\n")?;
        writeln!(
            self.out,
            "{:<3} {:<35} {:<12} {:<12} {:<10} {:<10} {:<10}",
            "#", "ID", "Difficulty", "Efficiency", "SQLValid", "Recovery", "Answer Quality"
        )?;
        writeln!(self.out, "{}", "-".repeat(RULE_WIDTH))?;
        self.out.flush()
    }

    pub fn row(&mut self, index: usize, sc: &Scorecard) -> io::Result<()> {
        writeln!(
            self.out,
            "{:<3} {:<35} {:<12} {:<12.2} {:<10.2} {:<10.2} {:<10.2} ({:.1}s)",
            index + 1,
            sc.id,
            sc.difficulty.as_str(),
            sc.tool_efficiency,
            sc.sql_validity,
            sc.error_recovery,
            sc.answer_quality_score,
            sc.elapsed_secs
        )?;
        self.out.flush()
    }

    pub fn footer(&mut self, summary: &RunSummary) -> io::Result<()> {
        writeln!(self.out, "{}", "-".repeat(RULE_WIDTH))?;
        writeln!(
            self.out,
            "{:<3} {:<35} {:<12} {:<12.2} {:<10.2} {:<10.2} {:<10.2} ({:.0}s)",
            "AVG",
            "",
            "",
            summary.avg_tool_efficiency,
            summary.avg_sql_validity,
            summary.avg_error_recovery,
            summary.avg_answer_quality,
            summary.total_elapsed_secs
        )?;
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::SharedBuf;
    use sqlgrader_types::Difficulty;

    #[test]
    fn writes_fixed_columns() {
        let buf = SharedBuf::default();
        let mut table = ProgressTable::new(Box::new(buf.clone()));
        let sc = Scorecard {
            id: "03_top_stores".into(),
            difficulty: Difficulty::Medium,
            answer_quality_score: 0.8,
            answer_quality_reasoning: String::new(),
            sql_validity: 1.0,
            tool_efficiency: 0.5,
            error_recovery: 0.75,
            agent_sql: None,
            agent_csv: None,
            answer: String::new(),
            elapsed_secs: 4.0,
            agent_error: false,
        };
        table.header(1, "react").unwrap();
        table.row(0, &sc).unwrap();
        table.footer(&RunSummary::from_scorecards(std::slice::from_ref(&sc)).unwrap()).unwrap();

        let text = buf.contents();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Running eval on 1 examples with react");
        assert!(lines[2].starts_with("#   ID                                  Difficulty   Efficiency"));
        assert_eq!(lines[3].len(), 100);
        assert_eq!(
            lines[4],
            format!("1   {:<35} medium       0.50         1.00       0.75       0.80       (4.0s)", "03_top_stores")
        );
        assert!(lines[6].starts_with("AVG"));
        assert!(lines[6].ends_with("(4s)"));
    }
}
