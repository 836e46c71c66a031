//! Markdown rendering of a decoded trajectory plus token/cost accounting.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde_json::Value;

use sqlgrader_types::{check_artifact_id, ModelUsage, Step, ToolArgs, UsageRecord};

const OBSERVATION_MAX_LINES: usize = 30;
const INLINE_ARG_MAX_LEN: usize = 80;

/// Render a trajectory. `generated_at` appears only in the header, so two
/// renders of the same input differ at most on that line.
pub fn render_trajectory(steps: &[Step], usage: Option<&UsageRecord>, generated_at: DateTime<Local>) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push("# Agent Trajectory".into());
    lines.push(String::new());
    if let Some(model_name) = usage.and_then(|u| u.keys().next()) {
        lines.push(format!("**Model**: `{model_name}`  "));
    }
    lines.push(format!("**Iterations**: {}  ", steps.len()));
    lines.push(format!("**Generated**: {}", generated_at.format("%Y-%m-%d %H:%M:%S")));
    lines.push(String::new());

    lines.push("## Trajectory".into());
    lines.push(String::new());
    for (i, step) in steps.iter().enumerate() {
        push_step(&mut lines, i, step);
    }

    if let Some(usage) = usage.filter(|u| !u.is_empty()) {
        lines.push("## Usage".into());
        lines.push(String::new());
        for (model_name, stats) in usage {
            push_usage(&mut lines, model_name, stats);
        }
    }

    lines.join("\n")
}

fn push_step(lines: &mut Vec<String>, i: usize, step: &Step) {
    lines.push(format!("### Step {}", i + 1));
    lines.push(String::new());
    lines.push(format!("**Thought**: {}", step.thought));
    lines.push(String::new());

    lines.push(format!("**Tool**: `{}`", step.tool_name));
    if !step.is_finish() {
        lines.push(String::new());
        lines.push(format_tool_args(&step.tool_args));
    }
    lines.push(String::new());

    if let Some(obs) = step.observation.as_deref().filter(|o| !step.is_finish() && !o.is_empty()) {
        lines.push("**Observation**:".into());
        lines.push(String::new());
        lines.push(format!("```\n{}\n```", truncate_lines(obs, OBSERVATION_MAX_LINES)));
        lines.push(String::new());
    }

    lines.push("---".into());
    lines.push(String::new());
}

fn push_usage(lines: &mut Vec<String>, model_name: &str, stats: &ModelUsage) {
    lines.push(format!("**{model_name}**"));
    lines.push(String::new());
    lines.push("| Metric | Value |".into());
    lines.push("|--------|-------|".into());

    let prompt = stats.prompt_tokens;
    let cached = stats.cached_tokens();
    let non_cached_prompt = prompt.saturating_sub(cached);
    let non_cached_total = non_cached_prompt + stats.completion_tokens;

    lines.push(format!("| Prompt tokens | {prompt} |"));
    lines.push(format!("| Cached tokens | {cached} |"));
    lines.push(format!("| Non-cached prompt tokens | {non_cached_prompt} |"));
    lines.push(format!("| Completion tokens | {} |", stats.completion_tokens));
    lines.push(format!("| Non-cached total | {non_cached_total} |"));

    if let Some(cost) = non_cached_cost(stats) {
        lines.push(format!("| Cost (non-cached) | ${cost:.6} |"));
    } else if let Some(cost) = stats.cost {
        lines.push(format!("| Cost (total) | ${cost:.6} |"));
    }
    lines.push(String::new());
}

/// Prompt cost pro-rated to the non-cached share, plus the full completion cost.
pub fn non_cached_cost(stats: &ModelUsage) -> Option<f64> {
    let details = stats.cost_details.as_ref()?;
    let prompt_cost = details.upstream_inference_prompt_cost?;
    let completion_cost = details.upstream_inference_completions_cost?;
    if stats.prompt_tokens == 0 {
        return None;
    }
    let non_cached = stats.prompt_tokens.saturating_sub(stats.cached_tokens());
    Some(prompt_cost * (non_cached as f64 / stats.prompt_tokens as f64) + completion_cost)
}

/// Multiline string arguments become fenced SQL blocks, long ones plain fenced
/// blocks, everything else inline code.
pub fn format_tool_args(args: &ToolArgs) -> String {
    let map = match args {
        ToolArgs::Raw(raw) => return raw.clone(),
        ToolArgs::Structured(map) => map,
    };
    map.iter()
        .map(|(key, value)| match value {
            Value::String(s) if s.contains('\n') => format!("**{key}**:\n```sql\n{s}\n```"),
            Value::String(s) if s.chars().count() > INLINE_ARG_MAX_LEN => format!("**{key}**:\n```\n{s}\n```"),
            Value::String(s) => format!("**{key}**: `{s}`"),
            other => format!("**{key}**: `{other}`"),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Head-only view: the first `max_lines` lines and a count of the rest.
pub fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    if lines.len() <= max_lines {
        return text.to_string();
    }
    format!(
        "{}\n\n*... ({} more lines)*",
        lines[..max_lines].join("\n"),
        lines.len() - max_lines
    )
}

/// Write `<dir>/<name>.md`, creating `dir` if needed. `name` must be a single
/// path component.
pub async fn save_trajectory(
    dir: impl AsRef<Path>,
    name: &str,
    steps: &[Step],
    usage: Option<&UsageRecord>,
) -> Result<PathBuf> {
    check_artifact_id(name)?;
    let dir = dir.as_ref();
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {:?}", dir))?;
    let path = dir.join(format!("{name}.md"));
    let markdown = render_trajectory(steps, usage, Local::now());
    tokio::fs::write(&path, markdown)
        .await
        .with_context(|| format!("Failed to write {:?}", path))?;
    Ok(path)
}
