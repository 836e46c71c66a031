use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use sqlgrader_core::config::{
	AgentConfig, DataConfig, DatabaseConfig, EndpointConfig, JudgeConfig, OutputConfig,
};
use sqlgrader_core::markdown::save_trajectory;
use sqlgrader_core::progress::ProgressTable;
use sqlgrader_core::report::generate_html_report;
use sqlgrader_core::trajectory::decode;
use sqlgrader_core::{
	AgentResponse, Difficulty, Eval, EvalConfig, HttpAgent, HttpJudge, JsonlDataSource,
	ScoringPolicy,
};
use sqlgrader_store::{save_example, Database, Store};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sqlgrader", about = "Score text-to-SQL agent trajectories")]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
	/// Run the agent over a dataset and score every example
	Run(RunArgs),
	/// Execute a reference query and save it as a new dataset example
	SaveExample(SaveExampleArgs),
	/// Render a saved agent response as a Markdown trace
	RenderTrajectory(RenderArgs),
}

#[derive(Debug, Clone, Parser)]
struct RunArgs {
	/// YAML run configuration. Flags below override its values.
	#[arg(long)]
	config: Option<PathBuf>,

	/// JSONL dataset: { "id", "question", "reference_sql"?, "expected_answer"?, "difficulty", "expected_tables"? }
	#[arg(long)]
	data: Option<PathBuf>,

	/// Directory with eval_answer_sqls/ and eval_answer_csvs/
	#[arg(long)]
	artifacts: Option<PathBuf>,

	/// SQLite database the candidate SQL runs against
	#[arg(long)]
	database: Option<PathBuf>,

	/// Agent endpoint. Receives { "question", "config" } and returns { "answer", "trajectory", "usage"? }
	#[arg(long)]
	agent_url: Option<String>,

	/// Label for the agent in progress output and stored runs
	#[arg(long)]
	agent_name: Option<String>,

	/// Judge endpoint. Receives the judge request and returns { "score", "reasoning" }
	#[arg(long)]
	judge_url: Option<String>,

	/// Output JSON result to a file
	#[arg(long)]
	json_out: Option<PathBuf>,

	/// Output an HTML report to a file
	#[arg(long)]
	html_out: Option<PathBuf>,

	/// Write one Markdown trace per example into this directory
	#[arg(long)]
	trajectories_dir: Option<PathBuf>,

	/// Append the run to a SQLite run store
	#[arg(long)]
	store: Option<PathBuf>,
}

#[derive(Debug, Clone, Parser)]
struct SaveExampleArgs {
	#[arg(long)]
	database: PathBuf,

	#[arg(long)]
	artifacts: PathBuf,

	/// Identifier such as "17_orders_by_store"; used as the file name
	#[arg(long)]
	id: String,

	#[arg(long)]
	question: String,

	/// Reference SQL
	#[arg(long)]
	sql: String,

	/// easy, medium, hard or impossible
	#[arg(long, default_value = "medium")]
	difficulty: Difficulty,

	/// Comma-separated tables the query reads
	#[arg(long, value_delimiter = ',')]
	tables: Vec<String>,
}

#[derive(Debug, Clone, Parser)]
struct RenderArgs {
	/// JSON agent response: { "answer", "trajectory", "usage"? }
	#[arg(long)]
	input: PathBuf,

	#[arg(long, default_value = ".")]
	out_dir: PathBuf,

	/// Output file name without extension; defaults to the input file stem
	#[arg(long)]
	name: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	match cli.command {
		Commands::Run(args) => run(args).await?,
		Commands::SaveExample(args) => save(args)?,
		Commands::RenderTrajectory(args) => render(args).await?,
	}
	Ok(())
}

fn resolve_config(args: &RunArgs) -> Result<EvalConfig> {
	let base = match &args.config {
		Some(path) => Some(EvalConfig::from_yaml_file(path)?),
		None => None,
	};
	let required = |flag: &str| anyhow::anyhow!("--{flag} is required without --config");

	let mut cfg = match base {
		Some(cfg) => cfg,
		None => EvalConfig {
			agent: AgentConfig {
				name: "agent".to_string(),
				config: serde_json::Value::Null,
				endpoint: EndpointConfig::Http {
					url: args.agent_url.clone().ok_or_else(|| required("agent-url"))?,
				},
			},
			judge: JudgeConfig {
				endpoint: EndpointConfig::Http {
					url: args.judge_url.clone().ok_or_else(|| required("judge-url"))?,
				},
			},
			data: DataConfig {
				path: args.data.clone().ok_or_else(|| required("data"))?,
				artifacts_dir: None,
			},
			database: DatabaseConfig {
				path: args.database.clone().ok_or_else(|| required("database"))?,
			},
			policy: ScoringPolicy::default(),
			output: OutputConfig::default(),
		},
	};

	if let Some(url) = &args.agent_url {
		cfg.agent.endpoint = EndpointConfig::Http { url: url.clone() };
	}
	if let Some(name) = &args.agent_name {
		cfg.agent.name = name.clone();
	}
	if let Some(url) = &args.judge_url {
		cfg.judge.endpoint = EndpointConfig::Http { url: url.clone() };
	}
	if let Some(path) = &args.data {
		cfg.data.path = path.clone();
	}
	if let Some(dir) = &args.artifacts {
		cfg.data.artifacts_dir = Some(dir.clone());
	}
	if let Some(path) = &args.database {
		cfg.database.path = path.clone();
	}
	if args.json_out.is_some() {
		cfg.output.json = args.json_out.clone();
	}
	if args.html_out.is_some() {
		cfg.output.html = args.html_out.clone();
	}
	if args.trajectories_dir.is_some() {
		cfg.output.trajectories_dir = args.trajectories_dir.clone();
	}
	if args.store.is_some() {
		cfg.output.store = args.store.clone();
	}
	Ok(cfg)
}

async fn run(args: RunArgs) -> Result<()> {
	let cfg = resolve_config(&args)?;

	let mut data = JsonlDataSource::new(&cfg.data.path);
	if let Some(dir) = &cfg.data.artifacts_dir {
		data = data.with_artifacts_dir(dir);
	}
	let EndpointConfig::Http { url: agent_url } = &cfg.agent.endpoint;
	let EndpointConfig::Http { url: judge_url } = &cfg.judge.endpoint;
	let db = Database::open_read_only(&cfg.database.path)
		.with_context(|| format!("failed to open database {:?}", cfg.database.path))?;

	let mut builder = Eval::builder()
		.data_source(Arc::new(data))
		.agent(Arc::new(HttpAgent::new(agent_url.clone())))
		.judge(Arc::new(HttpJudge::new(judge_url.clone())))
		.executor(Arc::new(db))
		.policy(cfg.policy.clone())
		.agent_config(cfg.agent.config.clone())
		.agent_name(cfg.agent.name.clone())
		.progress(ProgressTable::stdout());
	if let Some(dir) = &cfg.output.trajectories_dir {
		builder = builder.trajectories_dir(dir);
	}
	let mut eval = builder.build()?;

	let result = eval.run().await?;
	println!();
	println!("{}", result.summary_table());

	if let Some(path) = &cfg.output.json {
		let json = serde_json::to_string_pretty(&result)?;
		tokio::fs::write(path, json).await?;
		info!(path = ?path, "wrote JSON results");
	}
	if let Some(path) = &cfg.output.html {
		tokio::fs::write(path, generate_html_report(&result)).await?;
		info!(path = ?path, "wrote HTML report");
	}
	if let Some(path) = &cfg.output.store {
		let store = Store::open(path)?;
		let run_id = store.create_run(
			&cfg.agent.name,
			Some(json!({ "agent_config": cfg.agent.config, "policy": cfg.policy })),
		)?;
		store.save_scorecards(run_id, &result)?;
		println!("Stored run {run_id} in {}", path.display());
	}

	Ok(())
}

fn save(args: SaveExampleArgs) -> Result<()> {
	let db = Database::open_read_only(&args.database)?;
	let saved = save_example(
		&db,
		&args.artifacts,
		&args.id,
		&args.question,
		&args.sql,
		args.difficulty,
		args.tables,
	)?;
	eprintln!("Saved {}:", args.id);
	eprintln!("  SQL -> {}", saved.sql_path.display());
	eprintln!("  CSV -> {} ({} rows)", saved.csv_path.display(), saved.rows);
	// Dataset line on stdout so it can be appended to a JSONL file.
	println!("{}", serde_json::to_string(&saved.example)?);
	Ok(())
}

async fn render(args: RenderArgs) -> Result<()> {
	let content = tokio::fs::read_to_string(&args.input)
		.await
		.with_context(|| format!("Failed to read {:?}", args.input))?;
	let response: AgentResponse =
		serde_json::from_str(&content).with_context(|| format!("Invalid agent response in {:?}", args.input))?;
	let name = match args.name {
		Some(name) => name,
		None => file_stem(&args.input)?,
	};
	let steps = decode(&response.trajectory);
	let path = save_trajectory(&args.out_dir, &name, &steps, response.usage.as_ref()).await?;
	println!("{}", path.display());
	Ok(())
}

fn file_stem(path: &Path) -> Result<String> {
	path.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.ok_or_else(|| anyhow::anyhow!("cannot derive a name from {:?}; pass --name", path))
}
