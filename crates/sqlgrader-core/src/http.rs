//! JSON-over-HTTP adapters for agents and judges running as separate services.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::{Agent, AgentResponse};
use crate::judge::{Judge, JudgeRequest, JudgeVerdict, JUDGE_RUBRIC};

/// POSTs `{"question", "config"}` and expects `{"answer", "trajectory", "usage"?}` back.
pub struct HttpAgent {
    url: String,
    client: reqwest::Client,
}

impl HttpAgent {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Agent for HttpAgent {
    async fn invoke(&self, question: &str, config: &Value) -> Result<AgentResponse> {
        let body = json!({ "question": question, "config": config });
        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("agent endpoint returned {}: {}", status, error_text);
        }
        let response: AgentResponse = resp
            .json()
            .await
            .context("agent endpoint returned an unexpected body")?;
        debug!(fields = response.trajectory.0.len(), "agent responded");
        Ok(response)
    }
}

/// POSTs the judge request plus the grading `instructions` and expects
/// `{"score", "reasoning"}`. A score sent as a numeric string is accepted.
pub struct HttpJudge {
    url: String,
    client: reqwest::Client,
}

impl HttpJudge {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Deserialize)]
struct VerdictBody {
    #[serde(deserialize_with = "lenient_f64")]
    score: f64,
    #[serde(default)]
    reasoning: String,
}

fn lenient_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| serde::de::Error::custom("score out of range")),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("score is not a number: {s:?}"))),
        other => Err(serde::de::Error::custom(format!("score is not a number: {other}"))),
    }
}

#[async_trait]
impl Judge for HttpJudge {
    async fn score(&self, request: &JudgeRequest) -> Result<JudgeVerdict> {
        let mut body = serde_json::to_value(request)?;
        if let Value::Object(map) = &mut body {
            map.insert("instructions".into(), Value::String(JUDGE_RUBRIC.into()));
        }
        let resp = self.client.post(&self.url).json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let error_text = resp.text().await.unwrap_or_default();
            anyhow::bail!("judge endpoint returned {}: {}", status, error_text);
        }
        let text = resp.text().await?;
        let verdict: VerdictBody =
            serde_json::from_str(&text).map_err(|e| anyhow!("invalid judge verdict: {e}"))?;
        Ok(JudgeVerdict {
            score: verdict.score,
            reasoning: verdict.reasoning,
        })
    }
}
