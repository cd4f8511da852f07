//! Remote repair agent: an OpenAI-compatible chat completions endpoint.
//!
//! The [`Repairer`] trait decouples escalation from the HTTP backend. Tests use
//! scripted repairers that return canned responses.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::io::config::FixloopConfig;

const SYSTEM_PROMPT: &str = "You repair failing test suites. Answer with a single unified diff \
in a ```diff fenced block and nothing else.";

pub trait Repairer {
    /// Send the prompt bundle and return the raw response text.
    fn propose_patch(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

/// Blocking client for a chat completions endpoint.
pub struct ChatCompletionsRepairer {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ChatCompletionsRepairer {
    pub fn new(endpoint: &str, model: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// Build from config, reading the credential through `env`.
    pub fn from_config(
        cfg: &FixloopConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let api_key = env(&cfg.repair.api_key_env)
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| anyhow!("environment variable {} is not set", cfg.repair.api_key_env))?;
        Self::new(
            &cfg.repair.endpoint,
            &cfg.repair.model,
            &api_key,
            cfg.repair_timeout(),
        )
    }
}

impl Repairer for ChatCompletionsRepairer {
    #[instrument(
        skip_all,
        fields(endpoint = %self.endpoint, model = %self.model, prompt_bytes = prompt.len())
    )]
    fn propose_patch(&self, prompt: &str) -> Result<String> {
        info!("requesting patch from repair endpoint");
        let body = chat_request(&self.model, prompt);
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .with_context(|| format!("POST {}", self.endpoint))?;

        let status = response.status();
        let text = response.text().context("read repair response body")?;
        if !status.is_success() {
            return Err(anyhow!(
                "repair endpoint returned {status}: {}",
                text.chars().take(500).collect::<String>()
            ));
        }
        let content = parse_chat_response(&text)?;
        debug!(response_bytes = content.len(), "repair response received");
        Ok(content)
    }
}

fn chat_request<'a>(model: &'a str, prompt: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        temperature: 0.0,
        messages: vec![
            ChatMessage {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            ChatMessage {
                role: "user",
                content: prompt,
            },
        ],
    }
}

fn parse_chat_response(text: &str) -> Result<String> {
    let parsed: ChatResponse = serde_json::from_str(text).context("parse chat response json")?;
    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| anyhow!("chat response contained no message content"))
}
