//! OpenAI-compatible chat and embedding client, usable against OpenAI or Ollama.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

use parley_agent::llm::{
    ChatMessage, Completion, Embedding, EmbeddingService, GenerationClient, TokenUsage,
};
use parley_core::config::LlmConfig;

#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    model: String,
    embedding_model: String,
    api_key: Option<SecretString>,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, reqwest::Error> {
        let client =
            Client::builder().timeout(Duration::from_secs(config.timeout_secs.max(1))).build()?;
        Ok(Self {
            client,
            base_url: config.effective_base_url(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<Value> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response = request.send().await.with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let excerpt: String = body.chars().take(200).collect();
            return Err(anyhow!("{url} returned {status}: {excerpt}"));
        }
        response.json::<Value>().await.with_context(|| format!("invalid JSON from {url}"))
    }
}

#[async_trait]
impl GenerationClient for OpenAiCompatibleClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion> {
        let request = ChatCompletionRequest { model: &self.model, messages };
        let payload = self.post_json("/v1/chat/completions", &request).await?;
        parse_completion(&payload)
    }
}

#[async_trait]
impl EmbeddingService for OpenAiCompatibleClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = EmbeddingRequest { model: &self.embedding_model, input: text };
        let payload = self.post_json("/v1/embeddings", &request).await?;
        parse_embedding(&payload)
    }
}

fn usage_field(payload: &Value, field: &str) -> u64 {
    payload.get("usage").and_then(|usage| usage.get(field)).and_then(Value::as_u64).unwrap_or(0)
}

pub fn parse_completion(payload: &Value) -> Result<Completion> {
    let text = payload
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("completion response has no message content"))?;
    let prompt = usage_field(payload, "prompt_tokens");
    let completion = usage_field(payload, "completion_tokens");
    let total = match usage_field(payload, "total_tokens") {
        0 => prompt + completion,
        total => total,
    };
    Ok(Completion {
        text: text.trim().to_string(),
        usage: TokenUsage { prompt, completion, total },
    })
}

pub fn parse_embedding(payload: &Value) -> Result<Embedding> {
    let values = payload
        .pointer("/data/0/embedding")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("embedding response has no vector"))?;
    let vector = values
        .iter()
        .map(|value| value.as_f64().map(|value| value as f32))
        .collect::<Option<Vec<f32>>>()
        .ok_or_else(|| anyhow!("embedding vector contains non-numeric values"))?;
    let tokens = match usage_field(payload, "total_tokens") {
        0 => usage_field(payload, "prompt_tokens"),
        total => total,
    };
    Ok(Embedding { vector, tokens })
}
