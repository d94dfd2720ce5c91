//! Vision-language generator trait, request types and the model-family registry.

pub mod ollama;
pub mod openai_compat;

use crate::config::{GeneratorConfig, ModelFamily};
use crate::error::{ConfigError, GenerationError};
use crate::prompt::count_image_tokens;
use crate::types::LoadedImage;
use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;

pub use ollama::OllamaGenerator;
pub use openai_compat::OpenAiCompatGenerator;

/// Decoding options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    pub do_sample: bool,
    pub temperature: f32,
}

impl SamplingConfig {
    pub fn greedy() -> Self {
        Self {
            do_sample: false,
            temperature: 0.0,
        }
    }

    /// Temperature to send, or `None` for greedy decoding.
    pub fn effective_temperature(&self) -> Option<f32> {
        self.do_sample.then_some(self.temperature)
    }
}

impl From<&GeneratorConfig> for SamplingConfig {
    fn from(config: &GeneratorConfig) -> Self {
        Self {
            do_sample: config.do_sample,
            temperature: config.temperature,
        }
    }
}

/// One generation call. Construction checks that the prompt carries exactly
/// one placeholder per image.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    prompt: String,
    images: Vec<&'a LoadedImage>,
    pub max_new_tokens: usize,
    pub sampling: SamplingConfig,
}

impl<'a> GenerationRequest<'a> {
    pub fn new(
        prompt: String,
        images: Vec<&'a LoadedImage>,
        max_new_tokens: usize,
        sampling: SamplingConfig,
    ) -> Result<Self, GenerationError> {
        let placeholders = count_image_tokens(&prompt);
        if placeholders != images.len() {
            return Err(GenerationError::ImageCountMismatch {
                placeholders,
                images: images.len(),
            });
        }
        Ok(Self {
            prompt,
            images,
            max_new_tokens,
            sampling,
        })
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn images(&self) -> &[&'a LoadedImage] {
        &self.images
    }

    /// Images as base64 strings of their original file bytes.
    pub fn images_base64(&self) -> Vec<String> {
        self.images
            .iter()
            .map(|i| base64::engine::general_purpose::STANDARD.encode(&i.bytes))
            .collect()
    }
}

/// Vision-language generator.
#[async_trait]
pub trait Generator: Send + Sync {
    fn family(&self) -> ModelFamily;

    fn model(&self) -> &str;

    /// Generate text for the request. Any backend fault is returned, never swallowed.
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

/// Constructor for one model family.
pub type GeneratorConstructor = fn(&GeneratorConfig) -> Result<Box<dyn Generator>, ConfigError>;

/// Maps declared model families to constructors. Resolved once at startup.
pub struct GeneratorRegistry {
    constructors: HashMap<ModelFamily, GeneratorConstructor>,
}

impl GeneratorRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with the built-in backends.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(ModelFamily::Ollama, build_ollama);
        registry.register(ModelFamily::OpenaiCompatible, build_openai_compatible);
        registry
    }

    pub fn register(&mut self, family: ModelFamily, constructor: GeneratorConstructor) {
        self.constructors.insert(family, constructor);
    }

    pub fn families(&self) -> Vec<ModelFamily> {
        let mut families: Vec<_> = self.constructors.keys().copied().collect();
        families.sort_by_key(|f| f.as_str());
        families
    }

    pub fn build(&self, config: &GeneratorConfig) -> Result<Box<dyn Generator>, ConfigError> {
        let constructor =
            self.constructors
                .get(&config.family)
                .ok_or_else(|| ConfigError::UnknownBackend {
                    name: config.family.to_string(),
                })?;
        let generator = constructor(config)?;
        tracing::info!(
            family = %generator.family(),
            model = generator.model(),
            "Generator ready"
        );
        Ok(generator)
    }
}

impl Default for GeneratorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn build_ollama(config: &GeneratorConfig) -> Result<Box<dyn Generator>, ConfigError> {
    Ok(Box::new(OllamaGenerator::new(config)?))
}

fn build_openai_compatible(config: &GeneratorConfig) -> Result<Box<dyn Generator>, ConfigError> {
    Ok(Box::new(OpenAiCompatGenerator::new(config)?))
}

pub(crate) fn http_client(timeout_secs: Option<u64>) -> Result<reqwest::Client, ConfigError> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = timeout_secs {
        builder = builder.timeout(std::time::Duration::from_secs(secs));
    }
    builder.build().map_err(|e| ConfigError::InvalidValue {
        field: "generator".into(),
        reason: format!("failed to build HTTP client: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::build_prompt;

    fn test_image(id: &str) -> LoadedImage {
        LoadedImage {
            id: id.into(),
            path: format!("{id}.png").into(),
            bytes: vec![1, 2, 3],
            pixels: image::RgbImage::new(2, 2),
        }
    }

    #[test]
    fn test_effective_temperature() {
        let greedy = SamplingConfig {
            do_sample: false,
            temperature: 0.7,
        };
        assert_eq!(greedy.effective_temperature(), None);

        let sampled = SamplingConfig {
            do_sample: true,
            temperature: 0.7,
        };
        assert_eq!(sampled.effective_temperature(), Some(0.7));
    }

    #[test]
    fn test_request_enforces_image_count() {
        let a = test_image("a");
        let prompt = build_prompt("q", &["t"], 2);
        let err = GenerationRequest::new(prompt, vec![&a], 16, SamplingConfig::greedy())
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::ImageCountMismatch {
                placeholders: 2,
                images: 1
            }
        ));
    }

    #[test]
    fn test_request_base64_images() {
        let a = test_image("a");
        let prompt = build_prompt("q", &["t"], 1);
        let req = GenerationRequest::new(prompt, vec![&a], 16, SamplingConfig::greedy()).unwrap();
        assert_eq!(req.images_base64(), vec!["AQID".to_string()]);
        assert_eq!(req.images().len(), 1);
    }

    #[test]
    fn test_registry_defaults() {
        let registry = GeneratorRegistry::with_defaults();
        assert_eq!(
            registry.families(),
            vec![ModelFamily::Ollama, ModelFamily::OpenaiCompatible]
        );
        let generator = registry.build(&GeneratorConfig::default()).unwrap();
        assert_eq!(generator.family(), ModelFamily::Ollama);
        assert_eq!(generator.model(), "llava");
    }

    #[test]
    fn test_registry_unknown_family() {
        let registry = GeneratorRegistry::new();
        let err = registry.build(&GeneratorConfig::default()).err().unwrap();
        assert!(matches!(err, ConfigError::UnknownBackend { ref name } if name == "ollama"));
    }
}
