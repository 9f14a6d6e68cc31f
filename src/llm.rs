//! Language-model provider abstraction and clients

use crate::error::ModelError;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Provider that can answer a prompt with one of several backing models
#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn name(&self) -> &'static str;

    async fn invoke(&self, prompt: &str, model_id: &str, timeout: Duration) -> Result<String, ModelError>;

    /// Whether `model_id` is currently served by the provider
    async fn health_check(&self, _model_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[derive(Debug, Serialize)]
struct MessageRequest<'a> {
    model: &'a str,
    max_tokens: usize,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessageResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

/// Messages-API client over HTTP
pub struct HttpLanguageModel {
    base_url: String,
    api_key: Option<String>,
    max_tokens: usize,
    client: reqwest::Client,
}

impl HttpLanguageModel {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, max_tokens: usize) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            max_tokens,
            client: reqwest::Client::new(),
        }
    }

    fn classify(err: reqwest::Error, model_id: &str, timeout: Duration) -> ModelError {
        if err.is_timeout() {
            ModelError::Timeout {
                model_id: model_id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            ModelError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl LanguageModel for HttpLanguageModel {
    fn name(&self) -> &'static str {
        "http_messages"
    }

    async fn invoke(&self, prompt: &str, model_id: &str, timeout: Duration) -> Result<String, ModelError> {
        let request = MessageRequest {
            model: model_id,
            max_tokens: self.max_tokens,
            messages: vec![Message { role: "user", content: prompt }],
        };

        let url = format!("{}/v1/messages", self.base_url);
        let mut builder = self
            .client
            .post(&url)
            .timeout(timeout)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Self::classify(e, model_id, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Http { status: status.as_u16(), body });
        }

        let parsed: MessageResponse = response
            .json()
            .await
            .map_err(|e| Self::classify(e, model_id, timeout))?;

        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect::<Vec<_>>()
            .join("\n");

        if text.trim().is_empty() {
            return Err(ModelError::EmptyOutput(model_id.to_string()));
        }
        debug!("Model {} returned {} chars", model_id, text.len());
        Ok(text)
    }

    async fn health_check(&self, model_id: &str) -> anyhow::Result<bool> {
        let url = format!("{}/v1/models/{}", self.base_url, urlencoding::encode(model_id));
        let mut builder = self.client.get(&url).header("anthropic-version", ANTHROPIC_VERSION);
        if let Some(ref key) = self.api_key {
            builder = builder.header("x-api-key", key);
        }
        let response = builder.send().await?;
        debug!("Health probe for {} returned {}", model_id, response.status());
        Ok(response.status().is_success())
    }
}

/// Canned behaviour of a `ScriptedModel` for one model id
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(ModelError),
    /// Never answers; the caller's deadline decides
    Hang,
    /// Cites every source group listed in the prompt
    Grounded,
}

/// Deterministic in-process model for demo mode and tests
pub struct ScriptedModel {
    replies: HashMap<String, ScriptedReply>,
    default_reply: ScriptedReply,
    calls: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(default_reply: ScriptedReply) -> Self {
        Self {
            replies: HashMap::new(),
            default_reply,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn grounded() -> Self {
        Self::new(ScriptedReply::Grounded)
    }

    pub fn with_reply(mut self, model_id: impl Into<String>, reply: ScriptedReply) -> Self {
        self.replies.insert(model_id.into(), reply);
        self
    }

    /// Model ids invoked so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn invoke(&self, prompt: &str, model_id: &str, timeout: Duration) -> Result<String, ModelError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(model_id.to_string());
        }

        match self.replies.get(model_id).unwrap_or(&self.default_reply) {
            ScriptedReply::Text(text) => Ok(text.clone()),
            ScriptedReply::Fail(err) => Err(err.clone()),
            ScriptedReply::Hang => {
                tokio::time::sleep(timeout + Duration::from_secs(3600)).await;
                Err(ModelError::Timeout {
                    model_id: model_id.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
            ScriptedReply::Grounded => Ok(grounded_reply(prompt)),
        }
    }

    async fn health_check(&self, model_id: &str) -> anyhow::Result<bool> {
        let reply = self.replies.get(model_id).unwrap_or(&self.default_reply);
        Ok(!matches!(reply, ScriptedReply::Fail(_)))
    }
}

fn group_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\[(G\d+)\] (.+)$").expect("group header regex is valid"))
}

fn grounded_reply(prompt: &str) -> String {
    let groups: Vec<(String, String)> = group_header_re()
        .captures_iter(prompt)
        .map(|c| (c[1].to_string(), c[2].trim().to_string()))
        .collect();

    if groups.is_empty() {
        return "STEP: No sources were supplied, so only general principles can be stated.\n\
                ANSWER: The available material does not address this question directly; \
                specific legal advice should be sought."
            .to_string();
    }

    let mut out = String::new();
    for (label, topic) in &groups {
        out.push_str(&format!("STEP: The {} sources in [{}] bear on the question.\n", topic, label));
    }
    out.push_str("ANSWER: ");
    let sentences: Vec<String> = groups
        .iter()
        .map(|(label, topic)| format!("The retrieved {} material addresses this point [{}].", topic, label))
        .collect();
    out.push_str(&sentences.join(" "));
    out
}
