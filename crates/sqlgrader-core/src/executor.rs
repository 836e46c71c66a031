use async_trait::async_trait;

use sqlgrader_types::QueryResult;

use crate::error::EvalError;

/// Live database handle the candidate SQL is executed against.
///
/// Implementations report malformed or failing statements as
/// [`EvalError::SqlExecution`].
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<QueryResult, EvalError>;
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use sqlgrader_store::Database;

    #[async_trait]
    impl SqlExecutor for Database {
        async fn execute(&self, sql: &str) -> Result<QueryResult, EvalError> {
            self.query(sql).map_err(|e| EvalError::SqlExecution(e.to_string()))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn executes_against_sqlite() {
            let db = Database::open_in_memory().unwrap();
            db.execute_batch("CREATE TABLE t (a INTEGER); INSERT INTO t VALUES (1), (2);")
                .unwrap();
            let result = db.execute("SELECT a FROM t ORDER BY a").await.unwrap();
            assert_eq!(result.to_csv(), "a\n1\n2\n");
        }

        #[tokio::test]
        async fn candidate_writes_are_rejected() {
            let db = Database::open_in_memory().unwrap();
            db.execute_batch("CREATE TABLE orders (id INTEGER); INSERT INTO orders VALUES (1), (2), (3);")
                .unwrap();
            let err = db.execute("DELETE FROM orders").await.unwrap_err();
            assert!(matches!(err, EvalError::SqlExecution(_)));
            let result = db.execute("SELECT COUNT(*) AS n FROM orders").await.unwrap();
            assert_eq!(result.to_csv(), "n\n3\n");
        }

        #[tokio::test]
        async fn one_example_cannot_alter_data_for_the_next() {
            use crate::agent::{agent_fn, AgentResponse};
            use crate::datasource::VecDataSource;
            use crate::judge::{judge_fn, JudgeVerdict};
            use crate::runner::Eval;
            use serde_json::json;
            use sqlgrader_types::{Difficulty, Example, Trajectory};
            use std::sync::Arc;

            let db = Database::open_in_memory().unwrap();
            db.execute_batch("CREATE TABLE orders (id INTEGER); INSERT INTO orders VALUES (1), (2), (3);")
                .unwrap();

            let agent = agent_fn(|question, _cfg| async move {
                let sql = if question.starts_with("Delete") {
                    "DELETE FROM orders"
                } else {
                    "SELECT COUNT(*) AS n FROM orders"
                };
                Ok(AgentResponse {
                    answer: "done".into(),
                    trajectory: Trajectory::new().with_step(0, "run", "execute_sql", json!({ "sql": sql }), Some("ok")),
                    usage: None,
                })
            });
            let judge = judge_fn(|req| async move {
                let score = if req.agent_csv == req.expected_csv { 1.0 } else { 0.0 };
                Ok(JudgeVerdict { score, reasoning: String::new() })
            });
            let examples = vec![
                Example::new("01_delete", "Delete every order", "SELECT 1", "1\n1\n", Difficulty::Easy),
                Example::new("02_count", "How many orders?", "SELECT COUNT(*) AS n FROM orders", "n\n3\n", Difficulty::Easy),
            ];
            let mut eval = Eval::builder()
                .data_source(Arc::new(VecDataSource::new(examples)))
                .agent(agent)
                .judge(judge)
                .executor(Arc::new(db.clone()))
                .build()
                .unwrap();

            let run = eval.run().await.unwrap();
            let first = &run.cases[0].scorecard;
            assert_eq!(first.answer_quality_score, 0.0);
            assert!(first.answer_quality_reasoning.starts_with("SQL execution error:"));
            let second = &run.cases[1].scorecard;
            assert_eq!(second.agent_csv.as_deref(), Some("n\n3\n"));
            assert_eq!(second.answer_quality_score, 1.0);
        }

        #[tokio::test]
        async fn malformed_sql_is_an_execution_error() {
            let db = Database::open_in_memory().unwrap();
            let err = db.execute("SELEC nonsense").await.unwrap_err();
            assert!(matches!(err, EvalError::SqlExecution(_)));
        }
    }
}
