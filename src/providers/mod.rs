//! Provider adapters: three wire formats normalized onto one protocol.
//!
//! Each `api_format` has a [`WireAdapter`] that encodes a [`ChatRequest`]
//! into the provider's request body and decodes the response back into the
//! normalized [`ChatResponse`]. The agent runtime talks to
//! [`ProviderClient`] and never sees wire formats.

pub mod anthropic;
pub mod google;
pub mod openai;
pub mod transport;

pub use transport::{post_with_retry, HttpTransport, ReqwestTransport};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::catalog::{self, ApiFormat, ProviderSpec};
use crate::error::{BashError, Result};
use crate::protocol::{ChatMessage, ChatResponse};

/// Tool definition in the shape providers consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// One outbound model request in normalized form.
#[derive(Debug, Clone)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub system: &'a str,
    pub messages: &'a [ChatMessage],
    pub max_tokens: u32,
    pub temperature: f32,
    pub tools: &'a [ToolSpec],
}

/// Encoder/decoder for one wire format family.
pub trait WireAdapter: Send + Sync {
    /// Build the provider request body.
    fn encode_request(&self, provider: &ProviderSpec, request: &ChatRequest) -> Value;

    /// Normalize a provider response body.
    fn decode_response(&self, body: &Value) -> Result<ChatResponse>;

    /// Request URL for a model under a base URL.
    fn endpoint(&self, base_url: &str, model: &str, api_key: &str) -> String;

    /// Request headers (auth, versioning, content type).
    fn headers(&self, provider: &ProviderSpec, api_key: &str) -> Vec<(String, String)>;
}

/// The adapter for a wire format family.
pub fn adapter_for(format: ApiFormat) -> &'static dyn WireAdapter {
    match format {
        ApiFormat::Anthropic => &anthropic::AnthropicAdapter,
        ApiFormat::OpenAi => &openai::OpenAiAdapter,
        ApiFormat::Google => &google::GoogleAdapter,
    }
}

/// Provider-facing chat client: catalog resolution, wire translation, and
/// the retry policy in one place.
#[derive(Clone)]
pub struct ProviderClient {
    transport: Arc<dyn HttpTransport>,
}

impl ProviderClient {
    /// Client using the production reqwest transport.
    pub fn new() -> Self {
        Self {
            transport: Arc::new(ReqwestTransport::new()),
        }
    }

    /// Client over a caller-supplied transport (tests, proxies).
    pub fn with_transport(transport: Arc<dyn HttpTransport>) -> Self {
        Self { transport }
    }

    /// Run one model call: resolve provider, encode, POST with retries,
    /// decode.
    pub async fn chat(&self, request: &ChatRequest<'_>) -> Result<ChatResponse> {
        let provider = catalog::provider_for_model(request.model)?;
        let adapter = adapter_for(provider.api_format);
        let api_key = catalog::api_key(provider)?;
        let base_url = catalog::resolve_base_url(provider);

        let url = adapter.endpoint(&base_url, request.model, &api_key);
        let headers = adapter.headers(provider, &api_key);
        let body = adapter.encode_request(provider, request);

        debug!(
            model = request.model,
            provider = provider.id,
            format = %provider.api_format,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "dispatching model call"
        );

        let text = post_with_retry(self.transport.as_ref(), &url, &headers, &body).await?;
        let value: Value = serde_json::from_str(&text)
            .map_err(|e| BashError::Provider(format!("malformed provider response: {}", e)))?;
        adapter.decode_response(&value)
    }
}

impl Default for ProviderClient {
    fn default() -> Self {
        Self::new()
    }
}
