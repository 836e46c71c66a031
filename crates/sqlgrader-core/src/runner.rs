use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use sqlgrader_types::{
	CaseResult, EvalRun, Example, RunSummary, Scorecard, Step, UsageRecord,
};

use crate::agent::Agent;
use crate::config::ScoringPolicy;
use crate::datasource::DataSource;
use crate::error::EvalError;
use crate::executor::SqlExecutor;
use crate::judge::{Judge, SemanticJudge};
use crate::markdown::save_trajectory;
use crate::progress::ProgressTable;
use crate::scorer::{MetricInput, TrajectoryMetric};
use crate::scorers::{
	error_recovery::ErrorRecoveryMetric, sql_validity::SqlValidityMetric,
	tool_efficiency::ToolEfficiencyMetric,
};
use crate::trajectory::{decode, extract_sqls, last_analytical_sql};

const ANSWER_MAX_CHARS: usize = 200;
pub const REFUSED_REASONING: &str = "Impossible question: agent correctly refused";

pub struct EvalBuilder {
	data_source: Option<Arc<dyn DataSource>>,
	agent: Option<Arc<dyn Agent>>,
	judge: Option<Arc<dyn Judge>>,
	executor: Option<Arc<dyn SqlExecutor>>,
	policy: ScoringPolicy,
	agent_config: Value,
	agent_name: String,
	progress: Option<ProgressTable>,
	trajectories_dir: Option<PathBuf>,
}

impl EvalBuilder {
	pub fn new() -> Self {
		Self {
			data_source: None,
			agent: None,
			judge: None,
			executor: None,
			policy: ScoringPolicy::default(),
			agent_config: Value::Null,
			agent_name: "agent".to_string(),
			progress: None,
			trajectories_dir: None,
		}
	}

	pub fn data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
		self.data_source = Some(data_source);
		self
	}

	pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
		self.agent = Some(agent);
		self
	}

	pub fn judge(mut self, judge: Arc<dyn Judge>) -> Self {
		self.judge = Some(judge);
		self
	}

	pub fn executor(mut self, executor: Arc<dyn SqlExecutor>) -> Self {
		self.executor = Some(executor);
		self
	}

	pub fn policy(mut self, policy: ScoringPolicy) -> Self {
		self.policy = policy;
		self
	}

	/// Forwarded to every agent invocation.
	pub fn agent_config(mut self, config: Value) -> Self {
		self.agent_config = config;
		self
	}

	pub fn agent_name(mut self, name: impl Into<String>) -> Self {
		self.agent_name = name.into();
		self
	}

	/// Stream one table row per example as it completes.
	pub fn progress(mut self, table: ProgressTable) -> Self {
		self.progress = Some(table);
		self
	}

	/// Write each example's rendered trajectory to `<dir>/<id>.md`.
	pub fn trajectories_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.trajectories_dir = Some(dir.into());
		self
	}

	pub fn build(self) -> Result<Eval> {
		let judge = self.judge.ok_or_else(|| anyhow::anyhow!("judge must be set"))?;
		let executor = self.executor.ok_or_else(|| anyhow::anyhow!("executor must be set"))?;
		Ok(Eval {
			data_source: self.data_source.ok_or_else(|| anyhow::anyhow!("data_source must be set"))?,
			agent: self.agent.ok_or_else(|| anyhow::anyhow!("agent must be set"))?,
			semantic: SemanticJudge::new(judge, executor).max_rows(self.policy.judge_max_rows),
			validity: SqlValidityMetric,
			efficiency: ToolEfficiencyMetric::new(self.policy.step_counting),
			recovery: ErrorRecoveryMetric::from_policy(&self.policy),
			policy: self.policy,
			agent_config: self.agent_config,
			agent_name: self.agent_name,
			progress: self.progress,
			trajectories_dir: self.trajectories_dir,
		})
	}
}

impl Default for EvalBuilder {
	fn default() -> Self {
		Self::new()
	}
}

pub struct Eval {
	data_source: Arc<dyn DataSource>,
	agent: Arc<dyn Agent>,
	semantic: SemanticJudge,
	validity: SqlValidityMetric,
	efficiency: ToolEfficiencyMetric,
	recovery: ErrorRecoveryMetric,
	policy: ScoringPolicy,
	agent_config: Value,
	agent_name: String,
	progress: Option<ProgressTable>,
	trajectories_dir: Option<PathBuf>,
}

/// A scorecard plus the decoded trace it was computed from.
struct Scored {
	scorecard: Scorecard,
	steps: Vec<Step>,
	usage: Option<UsageRecord>,
}

impl Eval {
	pub fn builder() -> EvalBuilder {
		EvalBuilder::new()
	}

	/// Score every example in order, one at a time. Fails only when the
	/// dataset cannot be loaded or is empty.
	pub async fn run(&mut self) -> Result<EvalRun> {
		let examples = self.data_source.load().await?;
		info!(examples = examples.len(), agent = %self.agent_name, "starting eval run");
		if let Some(table) = self.progress.as_mut() {
			if let Err(err) = table.header(examples.len(), &self.agent_name) {
				warn!(error = %err, "failed to write progress header");
			}
		}

		let mut cases = Vec::with_capacity(examples.len());
		for (i, example) in examples.into_iter().enumerate() {
			let span = info_span!("example", id = %example.id, difficulty = %example.difficulty);
			let scored = self.score_case(&example).instrument(span).await;

			// A failed agent leaves no trace worth rendering.
			if let Some(dir) = self.trajectories_dir.as_ref().filter(|_| !scored.scorecard.agent_error) {
				if let Err(err) = save_trajectory(dir, &example.id, &scored.steps, scored.usage.as_ref()).await {
					warn!(id = %example.id, error = %err, "failed to save trajectory");
				}
			}
			if let Some(table) = self.progress.as_mut() {
				if let Err(err) = table.row(i, &scored.scorecard) {
					warn!(error = %err, "failed to write progress row");
				}
			}
			cases.push(CaseResult { example, scorecard: scored.scorecard });
		}

		let cards: Vec<Scorecard> = cases.iter().map(|c| c.scorecard.clone()).collect();
		let summary = RunSummary::from_scorecards(&cards).map_err(EvalError::from)?;
		if let Some(table) = self.progress.as_mut() {
			if let Err(err) = table.footer(&summary) {
				warn!(error = %err, "failed to write progress footer");
			}
		}
		info!(
			answer_quality = summary.avg_answer_quality,
			total_secs = summary.total_elapsed_secs,
			"eval run finished"
		);
		Ok(EvalRun { cases, summary })
	}

	/// Run the agent on one example and score it. Never fails: every error is
	/// folded into the scorecard.
	pub async fn score_example(&self, example: &Example) -> Scorecard {
		self.score_case(example).await.scorecard
	}

	async fn score_case(&self, example: &Example) -> Scored {
		let started = Instant::now();

		let response = match self.agent.invoke(&example.question, &self.agent_config).await {
			Ok(response) => response,
			Err(cause) => {
				let err = EvalError::AgentInvocation(cause.to_string());
				warn!(error = %err, "agent invocation failed");
				return Scored {
					scorecard: Scorecard {
						id: example.id.clone(),
						difficulty: example.difficulty,
						answer_quality_score: 0.0,
						answer_quality_reasoning: err.to_string(),
						sql_validity: 0.0,
						tool_efficiency: 0.0,
						error_recovery: 0.0,
						agent_sql: None,
						agent_csv: None,
						answer: truncate_chars(&cause.to_string(), ANSWER_MAX_CHARS),
						elapsed_secs: elapsed_secs(started),
						agent_error: true,
					},
					steps: Vec::new(),
					usage: None,
				};
			}
		};

		let steps = decode(&response.trajectory);
		let agent_sql = last_analytical_sql(&extract_sqls(&steps), &self.policy.exploratory_prefixes);
		debug!(steps = steps.len(), agent_sql = ?agent_sql, "decoded trajectory");

		if example.impossible && agent_sql.is_none() {
			return Scored {
				scorecard: Scorecard {
					id: example.id.clone(),
					difficulty: example.difficulty,
					answer_quality_score: 1.0,
					answer_quality_reasoning: REFUSED_REASONING.to_string(),
					sql_validity: 1.0,
					tool_efficiency: 1.0,
					error_recovery: 1.0,
					agent_sql: None,
					agent_csv: None,
					answer: truncate_chars(&response.answer, ANSWER_MAX_CHARS),
					elapsed_secs: elapsed_secs(started),
					agent_error: false,
				},
				steps,
				usage: response.usage,
			};
		}

		let quality = self
			.semantic
			.answer_quality(
				agent_sql.as_deref(),
				&example.reference_sql,
				&example.expected_answer,
				&example.question,
			)
			.await;

		let input = MetricInput { steps: &steps, answer: &response.answer };
		let sql_validity = self.validity.score(&input);
		let tool_efficiency = self.efficiency.score(&input);
		let error_recovery = self.recovery.score(&input);
		debug!(
			sql_validity,
			tool_efficiency,
			error_recovery,
			answer_quality = quality.score,
			"scored example"
		);

		let scorecard = Scorecard {
			id: example.id.clone(),
			difficulty: example.difficulty,
			answer_quality_score: quality.score,
			answer_quality_reasoning: quality.reasoning,
			sql_validity,
			tool_efficiency,
			error_recovery,
			agent_sql,
			agent_csv: quality.agent_csv,
			answer: truncate_chars(&response.answer, ANSWER_MAX_CHARS),
			elapsed_secs: elapsed_secs(started),
			agent_error: false,
		};
		Scored { scorecard, steps, usage: response.usage }
	}
}

fn elapsed_secs(started: Instant) -> f64 {
	(started.elapsed().as_secs_f64() * 10.0).round() / 10.0
}

fn truncate_chars(s: &str, max: usize) -> String {
	s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::agent::{agent_fn, AgentResponse};
	use crate::datasource::VecDataSource;
	use crate::judge::{judge_fn, JudgeVerdict};
	use crate::test_support::{SharedBuf, StaticExecutor};
	use serde_json::json;
	use sqlgrader_types::{Difficulty, QueryResult, Trajectory};
	use std::sync::atomic::{AtomicUsize, Ordering};

	fn answering_agent(trajectory: Trajectory, answer: &'static str) -> Arc<dyn Agent> {
		agent_fn(move |_q, _cfg| {
			let trajectory = trajectory.clone();
			async move {
				Ok(AgentResponse { answer: answer.to_string(), trajectory, usage: None })
			}
		})
	}

	fn perfect_judge() -> Arc<dyn Judge> {
		judge_fn(|_req| async { Ok(JudgeVerdict { score: 1.0, reasoning: "equivalent".into() }) })
	}

	fn orders_result() -> QueryResult {
		QueryResult::new(vec!["n".into()], vec![vec![json!(10)]])
	}

	fn eval_for(examples: Vec<Example>, agent: Arc<dyn Agent>, judge: Arc<dyn Judge>) -> Eval {
		Eval::builder()
			.data_source(Arc::new(VecDataSource::new(examples)))
			.agent(agent)
			.judge(judge)
			.executor(Arc::new(StaticExecutor::new(orders_result())))
			.build()
			.unwrap()
	}

	fn easy() -> Example {
		Example::new("01_count", "How many orders?", "SELECT COUNT(*) AS n FROM orders", "n\n10\n", Difficulty::Easy)
	}

	fn impossible() -> Example {
		Example::new("99_weather", "What was the weather?", "", "", Difficulty::Impossible)
	}

	fn clean_trajectory() -> Trajectory {
		Trajectory::new()
			.with_step(0, "check schema", "execute_sql", json!({"sql": "SHOW TABLES"}), Some("orders"))
			.with_step(1, "count", "execute_sql", json!({"sql": "SELECT COUNT(*) AS n FROM orders"}), Some("n\n10"))
			.with_step(2, "done", "finish", json!({}), None)
	}

	#[tokio::test]
	async fn scores_clean_run() {
		let eval = eval_for(vec![easy()], answering_agent(clean_trajectory(), "10 orders"), perfect_judge());
		let sc = eval.score_example(&easy()).await;
		assert_eq!(sc.answer_quality_score, 1.0);
		assert_eq!(sc.answer_quality_reasoning, "equivalent");
		assert_eq!(sc.sql_validity, 1.0);
		assert_eq!(sc.tool_efficiency, 1.0);
		assert_eq!(sc.error_recovery, 1.0);
		assert_eq!(sc.agent_sql.as_deref(), Some("SELECT COUNT(*) AS n FROM orders"));
		assert_eq!(sc.agent_csv.as_deref(), Some("n\n10\n"));
		assert_eq!(sc.answer, "10 orders");
	}

	#[tokio::test]
	async fn agent_error_zeroes_everything() {
		let agent = agent_fn(|_q, _cfg| async { Err(anyhow::anyhow!("model overloaded")) });
		let eval = eval_for(vec![easy()], agent, perfect_judge());
		let sc = eval.score_example(&easy()).await;
		assert_eq!(sc.answer_quality_score, 0.0);
		assert_eq!(sc.sql_validity, 0.0);
		assert_eq!(sc.tool_efficiency, 0.0);
		assert_eq!(sc.error_recovery, 0.0);
		assert_eq!(sc.answer_quality_reasoning, "Agent error: model overloaded");
		assert_eq!(sc.answer, "model overloaded");
		assert!(sc.agent_error);
		assert!(sc.elapsed_secs >= 0.0);
	}

	#[tokio::test]
	async fn impossible_refusal_is_perfect_regardless_of_trace() {
		let noisy = Trajectory::new()
			.with_step(0, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(1, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(2, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(3, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(4, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(5, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(6, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(7, "hmm", "search_docs", json!({"q": "weather"}), Some("nothing"))
			.with_step(8, "no data", "finish", json!({}), None);
		let judge_calls = Arc::new(AtomicUsize::new(0));
		let calls = judge_calls.clone();
		let judge = judge_fn(move |_req| {
			calls.fetch_add(1, Ordering::SeqCst);
			async { Ok(JudgeVerdict { score: 0.0, reasoning: String::new() }) }
		});

		let eval = eval_for(vec![impossible()], answering_agent(noisy, "I can't answer that"), judge);
		let sc = eval.score_example(&impossible()).await;
		assert_eq!(
			(sc.answer_quality_score, sc.sql_validity, sc.tool_efficiency, sc.error_recovery),
			(1.0, 1.0, 1.0, 1.0)
		);
		assert_eq!(sc.answer_quality_reasoning, REFUSED_REASONING);
		assert_eq!(judge_calls.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn impossible_with_sql_is_judged_normally() {
		let eval = eval_for(
			vec![impossible()],
			answering_agent(clean_trajectory(), "10"),
			judge_fn(|_req| async { Ok(JudgeVerdict { score: 0.0, reasoning: "should refuse".into() }) }),
		);
		let sc = eval.score_example(&impossible()).await;
		assert_eq!(sc.answer_quality_score, 0.0);
		assert_eq!(sc.sql_validity, 1.0);
	}

	#[tokio::test]
	async fn missing_sql_on_answerable_question_scores_zero_quality() {
		let t = Trajectory::new().with_step(0, "guess", "finish", json!({}), None);
		let eval = eval_for(vec![easy()], answering_agent(t, "probably 10"), perfect_judge());
		let sc = eval.score_example(&easy()).await;
		assert_eq!(sc.answer_quality_score, 0.0);
		assert_eq!(sc.answer_quality_reasoning, "No analytical SQL found");
		assert!(sc.agent_csv.is_none());
		assert_eq!(sc.sql_validity, 1.0);
	}

	#[tokio::test]
	async fn recovered_errors_earn_partial_credit() {
		let t = Trajectory::new()
			.with_step(0, "try", "execute_sql", json!({"sql": "SELECT COUNT(*) FROM order"}), Some("SQL Error: no such table: order"))
			.with_step(1, "retry", "execute_sql", json!({"sql": "SELECT COUNT(*) AS n FROM orders"}), Some("n\n10"))
			.with_step(2, "done", "finish", json!({}), None);
		let eval = eval_for(vec![easy()], answering_agent(t, "10"), perfect_judge());
		let sc = eval.score_example(&easy()).await;
		assert_eq!(sc.sql_validity, 0.5);
		assert_eq!(sc.error_recovery, 0.75);
	}

	#[tokio::test]
	async fn answer_is_capped_at_200_chars() {
		let long: &'static str = Box::leak("é".repeat(300).into_boxed_str());
		let eval = eval_for(vec![easy()], answering_agent(clean_trajectory(), long), perfect_judge());
		let sc = eval.score_example(&easy()).await;
		assert_eq!(sc.answer.chars().count(), 200);
	}

	#[tokio::test]
	async fn run_streams_rows_and_averages() {
		let buf = SharedBuf::default();
		let mut eval = Eval::builder()
			.data_source(Arc::new(VecDataSource::new(vec![easy(), impossible()])))
			.agent(answering_agent(Trajectory::new().with_step(0, "no", "finish", json!({}), None), "cannot"))
			.judge(perfect_judge())
			.executor(Arc::new(StaticExecutor::new(orders_result())))
			.agent_name("react")
			.progress(ProgressTable::new(Box::new(buf.clone())))
			.build()
			.unwrap();

		let run = eval.run().await.unwrap();
		assert_eq!(run.cases.len(), 2);
		assert_eq!(run.cases[0].scorecard.answer_quality_score, 0.0);
		assert_eq!(run.cases[1].scorecard.answer_quality_score, 1.0);
		assert_eq!(run.summary.avg_answer_quality, 0.5);

		let text = buf.contents();
		assert!(text.starts_with("Running eval on 2 examples with react"));
		assert!(text.lines().any(|l| l.starts_with("1   01_count")));
		assert!(text.lines().any(|l| l.starts_with("2   99_weather")));
		assert!(text.lines().last().unwrap().starts_with("AVG"));
	}

	#[tokio::test]
	async fn single_example_run_does_not_fail() {
		let mut eval = eval_for(vec![easy()], answering_agent(clean_trajectory(), "10"), perfect_judge());
		let run = eval.run().await.unwrap();
		assert_eq!(run.summary.total, 1);
		assert_eq!(run.summary.avg_answer_quality, run.cases[0].scorecard.answer_quality_score);
	}

	#[tokio::test]
	async fn empty_dataset_is_an_error() {
		let mut eval = eval_for(vec![], answering_agent(clean_trajectory(), "10"), perfect_judge());
		let err = eval.run().await.unwrap_err();
		assert!(matches!(err.downcast_ref::<EvalError>(), Some(EvalError::EmptyDataset(_))));
	}

	#[tokio::test]
	async fn saves_trajectories_when_configured() {
		let dir = tempfile::tempdir().unwrap();
		let mut eval = Eval::builder()
			.data_source(Arc::new(VecDataSource::new(vec![easy()])))
			.agent(answering_agent(clean_trajectory(), "10"))
			.judge(perfect_judge())
			.executor(Arc::new(StaticExecutor::new(orders_result())))
			.trajectories_dir(dir.path())
			.build()
			.unwrap();
		eval.run().await.unwrap();
		let md = std::fs::read_to_string(dir.path().join("01_count.md")).unwrap();
		assert!(md.contains("SELECT COUNT(*) AS n FROM orders"));
	}

	#[tokio::test]
	async fn agent_failure_writes_no_trajectory() {
		let dir = tempfile::tempdir().unwrap();
		let agent = agent_fn(|q, _cfg| {
			let fails = q.starts_with("How many");
			async move {
				if fails {
					return Err(anyhow::anyhow!("connection reset"));
				}
				Ok(AgentResponse { answer: "none".into(), trajectory: Trajectory::new(), usage: None })
			}
		});
		let mut eval = Eval::builder()
			.data_source(Arc::new(VecDataSource::new(vec![easy(), impossible()])))
			.agent(agent)
			.judge(perfect_judge())
			.executor(Arc::new(StaticExecutor::new(orders_result())))
			.trajectories_dir(dir.path())
			.build()
			.unwrap();
		let run = eval.run().await.unwrap();
		assert!(run.cases[0].scorecard.agent_error);
		assert!(!run.cases[1].scorecard.agent_error);
		assert!(!dir.path().join("01_count.md").exists());
		assert!(dir.path().join("99_weather.md").exists());
	}

	#[test]
	fn build_requires_collaborators() {
		assert!(Eval::builder().build().is_err());
	}
}
