//! HTTP collaborators for completion and embedding services.
//!
//! Both services speak the OpenAI-compatible wire format. The traits exist
//! so every pipeline stage can be driven by scripted fakes in tests; the
//! `Real*` implementations use a blocking client and are the only code that
//! touches the network.

use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::errors::{TaxonomyError, TaxonomyResult};

const MAX_ATTEMPTS: usize = 3;
const RETRY_DELAY: Duration = Duration::from_secs(20);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(240);

/// Chat completion service.
pub trait Completion: Send + Sync {
    /// Run one prompt and return the response text. Transient failures are
    /// retried internally; permanent failure yields an empty string so that
    /// batch pipelines degrade per-item instead of aborting.
    fn complete(&self, prompt: &str, temperature: f64) -> String;
}

/// Text embedding service.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed(&self, texts: &[String]) -> TaxonomyResult<Vec<Vec<f32>>>;
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

/// Blocking chat completion client.
pub struct RealCompletion {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl RealCompletion {
    pub fn from_settings(settings: &Settings) -> TaxonomyResult<Self> {
        let (api_key, base_url) = settings.llm_credentials()?;
        Ok(Self::new(api_key, base_url, settings.llm.model.clone()))
    }

    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }

    fn request_once(&self, prompt: &str, temperature: f64) -> TaxonomyResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: "",
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature,
        };
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response: ChatResponse = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;
        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| TaxonomyError::InternalError("completion response had no choices".into()))
    }
}

impl Completion for RealCompletion {
    fn complete(&self, prompt: &str, temperature: f64) -> String {
        for attempt in 1..=MAX_ATTEMPTS {
            match self.request_once(prompt, temperature) {
                Ok(text) => {
                    debug!(attempt, chars = text.len(), "completion succeeded");
                    return text;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "completion attempt failed");
                    if attempt < MAX_ATTEMPTS {
                        thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }
        String::new()
    }
}

/// Blocking embedding client. Retry policy for embeddings lives with the
/// caller, which decides between backoff and a placeholder matrix.
pub struct RealEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl RealEmbedder {
    pub fn from_settings(settings: &Settings) -> TaxonomyResult<Self> {
        let (api_key, base_url) = settings.embedding_credentials()?;
        Ok(Self::new(api_key, base_url, settings.embedding.model.clone()))
    }

    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }
}

impl Embedder for RealEmbedder {
    fn embed(&self, texts: &[String]) -> TaxonomyResult<Vec<Vec<f32>>> {
        let body = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };
        let url = format!("{}/embeddings", self.base_url.trim_end_matches('/'));
        let response: EmbeddingResponse = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()?
            .error_for_status()?
            .json()?;

        let mut data = response.data;
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

/// Estimated token count for prompt budgeting. Roughly one token per CJK
/// character and one per four characters of everything else.
pub fn estimate_tokens(text: &str) -> usize {
    let mut cjk = 0usize;
    let mut other = 0usize;
    for ch in text.chars() {
        if ('\u{4e00}'..='\u{9fff}').contains(&ch) {
            cjk += 1;
        } else {
            other += 1;
        }
    }
    cjk + other.div_ceil(4)
}

/// Truncate `text` to approximately `max_tokens`, preserving whole characters.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let mut budget = max_tokens as f64;
    let mut out = String::new();
    for ch in text.chars() {
        let cost = if ('\u{4e00}'..='\u{9fff}').contains(&ch) {
            1.0
        } else {
            0.25
        };
        if budget < cost {
            break;
        }
        budget -= cost;
        out.push(ch);
    }
    out
}
