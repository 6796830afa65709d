//! OpenAI-compatible (OpenRouter) clients for the pipeline's external capabilities.
//!
//! [`LlmClient`] implements [`Embedder`], [`Annotator`] and [`TopicSummarizer`]
//! over two endpoints: `POST {base_url}/chat/completions` and
//! `POST {base_url}/embeddings`.

mod prompts;
mod types;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use tracing::{debug, instrument};

use trendlyze_shared::{
    Annotation, Annotator, Embedder, LlmConfig, Result, TopicSummarizer, TopicSummary,
    TrendlyzeError,
};

use types::{
    ChatRequest, ChatResponse, EmbeddingRequest, EmbeddingResponse, ResponseFormat, WireMessage,
};

/// User-Agent string for provider requests.
const USER_AGENT: &str = concat!("Trendlyze/", env!("CARGO_PKG_VERSION"));

/// Sampling settings per task.
const ANNOTATE_TEMPERATURE: f32 = 0.2;
const ANNOTATE_TOP_P: f32 = 0.8;
const TOPIC_TEMPERATURE: f32 = 0.3;
const TOPIC_TOP_P: f32 = 0.9;

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// HTTP client for an OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: Client,
    api_key: String,
    base_url: String,
    chat_model: String,
    embedding_model: String,
    embedding_prefix: String,
}

impl LlmClient {
    /// Build a client from the `[llm]` config section and a resolved API key.
    pub fn new(config: &LlmConfig, api_key: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TrendlyzeError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_prefix: config.embedding_prefix.clone(),
        })
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| TrendlyzeError::config(format!("API key is not a valid header: {e}")))?;
        headers.insert(AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert("X-Title", HeaderValue::from_static("trendlyze"));
        Ok(headers)
    }

    /// POST a JSON body and decode the JSON reply.
    async fn post<Req, Resp>(&self, endpoint: &str, body: &Req) -> Result<Resp>
    where
        Req: serde::Serialize + ?Sized,
        Resp: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{endpoint}", self.base_url);

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(|e| TrendlyzeError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TrendlyzeError::Capability(format!(
                "{endpoint} failed (HTTP {status}): {error_text}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TrendlyzeError::parse(format!("{endpoint} response: {e}")))
    }

    /// Run one chat completion and return the assistant text.
    async fn chat(&self, system: &str, user: String, temperature: f32, top_p: f32) -> Result<String> {
        let request = ChatRequest {
            model: self.chat_model.clone(),
            messages: vec![WireMessage::system(system), WireMessage::user(user)],
            temperature,
            top_p,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        debug!(model = %request.model, "chat request");
        let response: ChatResponse = self.post("chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| TrendlyzeError::Capability("empty chat response".into()))
    }

    fn prefixed(&self, text: &str) -> String {
        format!("{}{text}", self.embedding_prefix)
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

#[async_trait]
impl Embedder for LlmClient {
    #[instrument(skip_all, fields(chars = text.chars().count()))]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: serde_json::Value::String(self.prefixed(text)),
        };

        let response: EmbeddingResponse = self.post("embeddings", &request).await?;
        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| TrendlyzeError::Capability("no embedding in response".into()))
    }

    #[instrument(skip_all, fields(count = texts.len()))]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: self.embedding_model.clone(),
            input: serde_json::Value::Array(
                texts
                    .iter()
                    .map(|t| serde_json::Value::String(self.prefixed(t)))
                    .collect(),
            ),
        };

        let mut response: EmbeddingResponse = self.post("embeddings", &request).await?;
        if response.data.len() != texts.len() {
            return Err(TrendlyzeError::Capability(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response.data.len()
            )));
        }

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl Annotator for LlmClient {
    #[instrument(skip_all, fields(chars = content.chars().count()))]
    async fn analyze(&self, content: &str) -> Result<Annotation> {
        let reply = self
            .chat(
                prompts::ANNOTATE_SYSTEM,
                prompts::annotate_user(content),
                ANNOTATE_TEMPERATURE,
                ANNOTATE_TOP_P,
            )
            .await?;
        prompts::parse_annotation(&reply)
    }
}

#[async_trait]
impl TopicSummarizer for LlmClient {
    #[instrument(skip_all, fields(chars = joined_text.chars().count()))]
    async fn summarize(&self, joined_text: &str) -> Result<TopicSummary> {
        let reply = self
            .chat(
                prompts::TOPIC_SYSTEM,
                prompts::topic_user(joined_text),
                TOPIC_TEMPERATURE,
                TOPIC_TOP_P,
            )
            .await?;
        prompts::parse_topic(&reply)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
