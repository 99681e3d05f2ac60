//! Answer generation for tracked requests

use std::collections::HashMap;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{Digest32, RequestWorkflow};

/// Produces this node's candidate answer for a request.
#[async_trait]
pub trait AnswerOracle: Send + Sync {
    async fn answer(&self, request: &RequestWorkflow) -> anyhow::Result<String>;
}

/// `sha256` of the answer's UTF-8 bytes, the digest voted on-chain.
pub fn answer_digest(answer: &str) -> Digest32 {
    Sha256::digest(answer.as_bytes()).into()
}

/// Fixed answers, optionally per request id.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    default: String,
    answers: HashMap<String, String>,
}

impl StaticOracle {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            default: answer.into(),
            answers: HashMap::new(),
        }
    }

    pub fn with_answer(mut self, request_id: impl Into<String>, answer: impl Into<String>) -> Self {
        self.answers.insert(request_id.into(), answer.into());
        self
    }
}

#[async_trait]
impl AnswerOracle for StaticOracle {
    async fn answer(&self, request: &RequestWorkflow) -> anyhow::Result<String> {
        Ok(self
            .answers
            .get(&request.id)
            .unwrap_or(&self.default)
            .clone())
    }
}

/// OpenAI-compatible chat completions endpoint.
///
/// Sampling temperature is pinned to zero so independent nodes asking the
/// same model tend to produce byte-identical answers.
#[derive(Debug, Clone)]
pub struct ChatCompletionOracle {
    api_url: String,
    api_key: Option<String>,
    default_model: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatCompletionOracle {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>, default_model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key,
            default_model: default_model.into(),
            http: Client::new(),
        }
    }

    fn request_body(&self, request: &RequestWorkflow) -> Value {
        let model = if request.model_id.trim().is_empty() {
            self.default_model.as_str()
        } else {
            request.model_id.as_str()
        };
        json!({
            "model": model,
            "messages": request.messages,
            "temperature": 0,
        })
    }
}

#[async_trait]
impl AnswerOracle for ChatCompletionOracle {
    async fn answer(&self, request: &RequestWorkflow) -> anyhow::Result<String> {
        let body = self.request_body(request);
        debug!(request_id = %request.id, model = %body["model"], "requesting completion");

        let mut call = self.http.post(&self.api_url).json(&body);
        if let Some(key) = &self.api_key {
            call = call.bearer_auth(key);
        }

        let completion: ChatCompletion = call
            .send()
            .await
            .context("completion request failed")?
            .error_for_status()
            .context("completion endpoint returned an error")?
            .json()
            .await
            .context("completion response is not valid JSON")?;

        first_choice(completion)
    }
}

fn first_choice(completion: ChatCompletion) -> anyhow::Result<String> {
    completion
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .ok_or_else(|| anyhow!("completion has no content"))
}
