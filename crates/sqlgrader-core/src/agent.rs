use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sqlgrader_types::{Trajectory, UsageRecord};

/// What an agent hands back for one question.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResponse {
	pub answer: String,
	#[serde(default)]
	pub trajectory: Trajectory,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub usage: Option<UsageRecord>,
}

/// The system under evaluation. `config` is forwarded untouched from the run
/// configuration (schema context, model choice, ...).
#[async_trait]
pub trait Agent: Send + Sync {
	async fn invoke(&self, question: &str, config: &Value) -> Result<AgentResponse>;
}

/// Wrap an async closure as an `Agent`.
pub fn agent_fn<F, Fut>(f: F) -> Arc<dyn Agent>
where
	F: Send + Sync + 'static + Fn(String, Value) -> Fut,
	Fut: Future<Output = Result<AgentResponse>> + Send + 'static,
{
	struct ClosureAgent<F> {
		f: F,
	}

	#[async_trait]
	impl<F, Fut> Agent for ClosureAgent<F>
	where
		F: Send + Sync + 'static + Fn(String, Value) -> Fut,
		Fut: Future<Output = Result<AgentResponse>> + Send + 'static,
	{
		async fn invoke(&self, question: &str, config: &Value) -> Result<AgentResponse> {
			(self.f)(question.to_string(), config.clone()).await
		}
	}

	Arc::new(ClosureAgent { f })
}
