//! Ollama generator backend.
//!
//! Uses the raw `/api/generate` endpoint so the `USER: ... ASSISTANT:`
//! transcript built by the prompt module reaches the model untouched.

use super::{GenerationRequest, Generator, http_client};
use crate::config::{GeneratorConfig, ModelFamily};
use crate::error::{ConfigError, GenerationError};
use crate::prompt::IMAGE_TOKEN;
use async_trait::async_trait;
use serde::Deserialize;

pub struct OllamaGenerator {
    client: reqwest::Client,
    model: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl OllamaGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Build the `/api/generate` body. Images travel in the `images` field, so
    /// the placeholder tokens are dropped from the prompt text.
    pub(crate) fn request_body(&self, request: &GenerationRequest<'_>) -> serde_json::Value {
        let mut options = serde_json::json!({
            "num_predict": request.max_new_tokens,
        });
        match request.sampling.effective_temperature() {
            Some(t) => options["temperature"] = serde_json::json!(t),
            None => {
                options["temperature"] = serde_json::json!(0.0);
                options["top_k"] = serde_json::json!(1);
            }
        }
        serde_json::json!({
            "model": self.model,
            "prompt": request.prompt().replace(IMAGE_TOKEN, ""),
            "images": request.images_base64(),
            "raw": true,
            "stream": false,
            "options": options,
        })
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn family(&self) -> ModelFamily {
        ModelFamily::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let url = format!("{}/api/generate", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&self.request_body(request))
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GenerationError::Request {
                message: format!("{url}: {e}"),
            })?;
        let body: GenerateResponse =
            resp.json()
                .await
                .map_err(|e| GenerationError::ResponseParse {
                    message: e.to_string(),
                })?;
        // Raw mode returns only the continuation; echo the prompt so the output
        // keeps the USER/ASSISTANT transcript shape the evaluator cuts on.
        Ok(format!(
            "{}{}",
            request.prompt().replace(IMAGE_TOKEN, ""),
            prefix_space(&body.response)
        ))
    }
}

fn prefix_space(text: &str) -> String {
    if text.starts_with(char::is_whitespace) {
        text.to_string()
    } else {
        format!(" {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::SamplingConfig;
    use crate::prompt::build_prompt;
    use crate::types::LoadedImage;

    fn generator() -> OllamaGenerator {
        OllamaGenerator::new(&GeneratorConfig::default()).unwrap()
    }

    fn test_image() -> LoadedImage {
        LoadedImage {
            id: "a".into(),
            path: "a.png".into(),
            bytes: vec![0xff],
            pixels: image::RgbImage::new(1, 1),
        }
    }

    #[test]
    fn test_greedy_body() {
        let img = test_image();
        let req = GenerationRequest::new(
            build_prompt("q", &["t"], 1),
            vec![&img],
            150,
            SamplingConfig {
                do_sample: false,
                temperature: 0.7,
            },
        )
        .unwrap();
        let body = generator().request_body(&req);
        assert_eq!(body["model"], "llava");
        assert_eq!(body["raw"], true);
        assert_eq!(body["stream"], false);
        assert_eq!(body["images"], serde_json::json!(["/w=="]));
        assert_eq!(body["options"]["num_predict"], 150);
        assert_eq!(body["options"]["temperature"], 0.0);
        assert_eq!(body["options"]["top_k"], 1);
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("USER: \n"));
        assert!(!prompt.contains(IMAGE_TOKEN));
    }

    #[test]
    fn test_sampled_body() {
        let req = GenerationRequest::new(
            build_prompt::<&str>("q", &[], 0),
            Vec::new(),
            32,
            SamplingConfig {
                do_sample: true,
                temperature: 0.5,
            },
        )
        .unwrap();
        let body = generator().request_body(&req);
        assert_eq!(body["options"]["temperature"], 0.5);
        assert!(body["options"].get("top_k").is_none());
    }

    #[test]
    fn test_prefix_space() {
        assert_eq!(prefix_space("horse"), " horse");
        assert_eq!(prefix_space(" horse"), " horse");
    }
}
