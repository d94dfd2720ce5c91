//! OpenAI-compatible chat completions backend (vLLM and similar servers).

use super::{GenerationRequest, Generator, http_client};
use crate::config::{GeneratorConfig, ModelFamily};
use crate::error::{ConfigError, GenerationError};
use crate::prompt::IMAGE_TOKEN;
use async_trait::async_trait;

pub struct OpenAiCompatGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatGenerator {
    /// The bearer key is read once here from the configured environment variable.
    pub fn new(config: &GeneratorConfig) -> Result<Self, ConfigError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::debug!(
                env = %config.api_key_env,
                "No API key set, sending unauthenticated requests"
            );
        }
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// One user message: the prompt text, then one `image_url` part per image.
    pub(crate) fn request_body(&self, request: &GenerationRequest<'_>) -> serde_json::Value {
        let mut content = vec![serde_json::json!({
            "type": "text",
            "text": request.prompt().replace(IMAGE_TOKEN, ""),
        })];
        for (image, encoded) in request.images().iter().zip(request.images_base64()) {
            content.push(serde_json::json!({
                "type": "image_url",
                "image_url": {"url": format!("data:{};base64,{}", mime_type(image.path.as_path()), encoded)},
            }));
        }

        serde_json::json!({
            "model": self.model,
            "messages": [{"role": "user", "content": content}],
            "max_tokens": request.max_new_tokens,
            "temperature": request.sampling.effective_temperature().unwrap_or(0.0),
        })
    }
}

fn mime_type(path: &std::path::Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Pull `choices[0].message.content` out of a chat completion response.
pub(crate) fn extract_content(json: &serde_json::Value) -> Result<String, GenerationError> {
    json["choices"][0]["message"]["content"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| GenerationError::ResponseParse {
            message: "missing choices[0].message.content".into(),
        })
}

#[async_trait]
impl Generator for OpenAiCompatGenerator {
    fn family(&self) -> ModelFamily {
        ModelFamily::OpenaiCompatible
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GenerationError::Request {
                message: format!("{url}: {e}"),
            })?;
        let json: serde_json::Value =
            resp.json()
                .await
                .map_err(|e| GenerationError::ResponseParse {
                    message: e.to_string(),
                })?;
        extract_content(&json)
    }
}
