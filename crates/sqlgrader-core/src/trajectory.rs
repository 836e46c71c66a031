//! Decoding of index-addressed agent traces into ordered [`Step`]s, and
//! selection of the SQL statement that produced the answer.

use serde_json::Value;

use sqlgrader_types::{Step, ToolArgs, ToolName, Trajectory};

/// Decode a raw trajectory. Scans `thought_0`, `thought_1`, ... and stops at
/// the first missing index; anything past a gap is ignored. Never fails.
pub fn decode(trajectory: &Trajectory) -> Vec<Step> {
    let mut steps = Vec::new();
    let mut i = 0;
    while let Some(thought) = trajectory.field("thought", i) {
        let tool_name = trajectory
            .field("tool_name", i)
            .map(text_of)
            .unwrap_or_default();
        steps.push(Step {
            thought: text_of(thought),
            tool_name: ToolName::parse(&tool_name),
            tool_args: decode_args(trajectory.field("tool_args", i)),
            observation: trajectory.field("observation", i).map(text_of),
        });
        i += 1;
    }
    steps
}

/// Resolve tool arguments once: objects stay structured, strings are decoded
/// if they hold a JSON object and kept raw otherwise.
pub fn decode_args(args: Option<&Value>) -> ToolArgs {
    match args {
        None | Some(Value::Null) => ToolArgs::Structured(Default::default()),
        Some(Value::Object(map)) => ToolArgs::Structured(map.clone()),
        Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => ToolArgs::Structured(map),
            _ => ToolArgs::Raw(s.clone()),
        },
        Some(other) => ToolArgs::Raw(other.to_string()),
    }
}

fn text_of(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Every non-empty `sql` argument passed to the SQL tool, in order.
pub fn extract_sqls(steps: &[Step]) -> Vec<String> {
    steps
        .iter()
        .filter(|s| s.is_sql_call())
        .filter_map(|s| s.tool_args.get_str("sql"))
        .filter(|sql| !sql.is_empty())
        .map(str::to_string)
        .collect()
}

/// The last statement that is not schema exploration. Falls back to the last
/// statement when every one is exploratory; `None` when there are none.
pub fn last_analytical_sql<S: AsRef<str>>(sqls: &[String], exploratory_prefixes: &[S]) -> Option<String> {
    sqls.iter()
        .rev()
        .find(|sql| !is_exploratory(sql, exploratory_prefixes))
        .or_else(|| sqls.last())
        .cloned()
}

pub fn is_exploratory<S: AsRef<str>>(sql: &str, exploratory_prefixes: &[S]) -> bool {
    let upper = sql.trim().to_uppercase();
    exploratory_prefixes
        .iter()
        .any(|p| upper.starts_with(&p.as_ref().to_uppercase()))
}
