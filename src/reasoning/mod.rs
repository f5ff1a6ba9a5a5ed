// src/reasoning/mod.rs
pub mod extract;

use crate::domain::errors::{ReasoningError, ReasoningResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// The reasoning role a completion is requested for. Each role can map to a
/// different model and sampling temperature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageRole {
    Analyst,
    Strategist,
    Validator,
    Risk,
    Reconciler,
    DecisionMaker,
    Emergency,
}

impl StageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageRole::Analyst => "analyst",
            StageRole::Strategist => "strategist",
            StageRole::Validator => "validator",
            StageRole::Risk => "risk",
            StageRole::Reconciler => "reconciler",
            StageRole::DecisionMaker => "decision_maker",
            StageRole::Emergency => "emergency",
        }
    }

    /// Deliberation wants diversity early and determinism late.
    fn temperature(&self) -> f64 {
        match self {
            StageRole::Analyst => 0.5,
            StageRole::Strategist => 0.4,
            StageRole::Validator => 0.3,
            StageRole::Risk => 0.3,
            StageRole::Reconciler => 0.3,
            StageRole::DecisionMaker => 0.2,
            StageRole::Emergency => 0.2,
        }
    }
}

impl fmt::Display for StageRole {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// External natural-language reasoning capability.
///
/// Every call is a blocking request with an enforced timeout; a timed-out or
/// failed call is a stage failure, never retried within the same cycle.
#[async_trait]
pub trait ReasoningClient: Send + Sync {
    async fn complete(&self, role: StageRole, prompt: &str) -> ReasoningResult<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// OpenAI-compatible chat-completions client with per-role model selection.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    default_model: String,
    role_models: HashMap<StageRole, String>,
}

impl OpenAiClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        default_model: &str,
        role_models: HashMap<StageRole, String>,
        timeout: Duration,
    ) -> ReasoningResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReasoningError::Request {
                role: "client".to_string(),
                cause: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            default_model: default_model.to_string(),
            role_models,
        })
    }

    fn model_for(&self, role: StageRole) -> &str {
        self.role_models
            .get(&role)
            .map(String::as_str)
            .unwrap_or(&self.default_model)
    }
}

#[async_trait]
impl ReasoningClient for OpenAiClient {
    async fn complete(&self, role: StageRole, prompt: &str) -> ReasoningResult<String> {
        let request = ChatRequest {
            model: self.model_for(role),
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: role.temperature(),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ReasoningError::Timeout {
                        role: role.to_string(),
                    }
                } else {
                    ReasoningError::Request {
                        role: role.to_string(),
                        cause: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReasoningError::Request {
                role: role.to_string(),
                cause: format!("HTTP {}: {}", status, body),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| ReasoningError::Request {
            role: role.to_string(),
            cause: e.to_string(),
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(ReasoningError::EmptyResponse(role.to_string()));
        }
        Ok(content)
    }
}
