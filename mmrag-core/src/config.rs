//! Configuration management for mmrag.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> CLI overrides.
//! Every model handle and table is built once from this configuration and passed
//! by reference; nothing reads ambient globals at call time.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the workspace-local configuration file.
pub const CONFIG_FILE_NAME: &str = "mmrag.toml";

/// Top-level configuration for a retrieval-generation-evaluation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MmragConfig {
    /// Where the results array is written.
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    /// Input file locations.
    #[serde(default)]
    pub dataset: DatasetConfig,
    /// Per-modality top-k.
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    /// Embedding encoder.
    #[serde(default)]
    pub encoder: EncoderConfig,
    /// Vision-language generator.
    #[serde(default)]
    pub generator: GeneratorConfig,
    /// Text candidate pool construction.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Answer scoring.
    #[serde(default)]
    pub evaluation: EvalOptions,
}

impl Default for MmragConfig {
    fn default() -> Self {
        Self {
            output_path: default_output_path(),
            dataset: DatasetConfig::default(),
            retrieval: RetrievalConfig::default(),
            encoder: EncoderConfig::default(),
            generator: GeneratorConfig::default(),
            pool: PoolConfig::default(),
            evaluation: EvalOptions::default(),
        }
    }
}

/// Input dataset locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// JSON array of questions.
    #[serde(default = "default_questions_path")]
    pub questions_path: PathBuf,
    /// JSON object `image_id -> {path, caption}`.
    #[serde(default = "default_image_metadata_path")]
    pub image_metadata_path: PathBuf,
    /// JSON object `image_id -> {path, clean_caption, poisoned_candidates}`.
    #[serde(default)]
    pub poison_metadata_path: Option<PathBuf>,
    /// Directory holding the image files.
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    /// Gzip line-delimited `{id, text}` corpus, used by the `text_corpus` strategy.
    #[serde(default)]
    pub text_corpus_path: Option<PathBuf>,
    /// Extensions tried in order when the metadata path does not resolve.
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            questions_path: default_questions_path(),
            image_metadata_path: default_image_metadata_path(),
            poison_metadata_path: None,
            image_dir: default_image_dir(),
            text_corpus_path: None,
            image_extensions: default_image_extensions(),
        }
    }
}

fn default_questions_path() -> PathBuf {
    PathBuf::from("datasets/mmqa/MMQA_test_image.json")
}

fn default_image_metadata_path() -> PathBuf {
    PathBuf::from("datasets/mmqa/MMQA_image_metadata.json")
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("datasets/mmqa/final_dataset_images")
}

fn default_image_extensions() -> Vec<String> {
    vec![".jpg".into(), ".png".into(), ".jpeg".into()]
}

fn default_output_path() -> PathBuf {
    PathBuf::from("results/rag_results.json")
}

/// Per-modality top-k selection sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k_images: usize,
    #[serde(default = "default_top_k")]
    pub top_k_texts: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k_images: default_top_k(),
            top_k_texts: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    3
}

/// Which encoder implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// Local hashed-feature encoder, no model weights required.
    #[default]
    Hashing,
    /// Remote CLIP-style embedding service.
    Http,
}

/// Embedding encoder configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default)]
    pub kind: EncoderKind,
    #[serde(default = "default_encoder_model")]
    pub model: String,
    #[serde(default = "default_encoder_url")]
    pub base_url: String,
    /// Vector size for the hashing encoder; checked against service output for `http`.
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,
    /// L2-normalize every returned vector.
    #[serde(default = "default_true")]
    pub normalize: bool,
    #[serde(default = "default_encoder_timeout")]
    pub timeout_secs: u64,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            kind: EncoderKind::default(),
            model: default_encoder_model(),
            base_url: default_encoder_url(),
            dimensions: default_dimensions(),
            normalize: true,
            timeout_secs: default_encoder_timeout(),
        }
    }
}

fn default_encoder_model() -> String {
    "openai/clip-vit-base-patch32".into()
}

fn default_encoder_url() -> String {
    "http://localhost:8500".into()
}

fn default_dimensions() -> usize {
    512
}

fn default_encoder_timeout() -> u64 {
    60
}

/// Declared generator model family, resolved once through the generator registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    /// LLaVA-style models served by Ollama's raw generate endpoint.
    #[default]
    Ollama,
    /// Vision chat models behind an OpenAI-compatible server (vLLM and friends).
    OpenaiCompatible,
}

impl ModelFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenaiCompatible => "openai_compatible",
        }
    }
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub family: ModelFamily,
    #[serde(default = "default_generator_model")]
    pub model: String,
    #[serde(default = "default_generator_url")]
    pub base_url: String,
    /// Environment variable holding the bearer key (OpenAI-compatible servers only).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_new_tokens")]
    pub max_new_tokens: usize,
    #[serde(default)]
    pub do_sample: bool,
    /// Only applied when `do_sample` is true.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Per-call deadline. `None` waits indefinitely.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            family: ModelFamily::default(),
            model: default_generator_model(),
            base_url: default_generator_url(),
            api_key_env: default_api_key_env(),
            max_new_tokens: default_max_new_tokens(),
            do_sample: false,
            temperature: default_temperature(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

fn default_generator_model() -> String {
    "llava".into()
}

fn default_generator_url() -> String {
    "http://localhost:11434".into()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}

fn default_max_new_tokens() -> usize {
    150
}

fn default_temperature() -> f32 {
    0.7
}

fn default_generation_timeout() -> Option<u64> {
    Some(120)
}

/// How the text candidate pool of each question is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStrategy {
    /// Clean captions of the question's images.
    CleanCaptions,
    /// Clean captions plus at most one injected adversarial caption.
    #[default]
    PoisonedCaptions,
    /// Documents from the text corpus listed in the question metadata.
    TextCorpus,
}

impl std::str::FromStr for PoolStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean" | "clean_captions" => Ok(Self::CleanCaptions),
            "poisoned" | "poisoned_captions" => Ok(Self::PoisonedCaptions),
            "corpus" | "text_corpus" => Ok(Self::TextCorpus),
            other => Err(ConfigError::InvalidValue {
                field: "pool.strategy".into(),
                reason: format!("unknown strategy '{other}'"),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub strategy: PoolStrategy,
}

/// Evaluator options.
///
/// `plural_tolerant` selects between the two evaluator behaviours seen in practice:
/// when true, predictions and golds also match after every trailing `s` is stripped
/// from both sides ("horse" vs "horses"); when false, only normalized equality counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOptions {
    #[serde(default = "default_true")]
    pub plural_tolerant: bool,
    /// Skip records whose extracted answer is empty instead of scoring them wrong.
    #[serde(default = "default_true")]
    pub require_model_answer: bool,
    #[serde(default = "default_assistant_marker")]
    pub assistant_marker: String,
}

impl Default for EvalOptions {
    fn default() -> Self {
        Self {
            plural_tolerant: true,
            require_model_answer: true,
            assistant_marker: default_assistant_marker(),
        }
    }
}

fn default_assistant_marker() -> String {
    crate::prompt::ASSISTANT_MARKER.into()
}

fn default_true() -> bool {
    true
}

impl MmragConfig {
    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retrieval.top_k_images == 0 {
            return Err(ConfigError::InvalidTopK {
                modality: "images".into(),
            });
        }
        if self.retrieval.top_k_texts == 0 {
            return Err(ConfigError::InvalidTopK {
                modality: "texts".into(),
            });
        }
        if self.encoder.dimensions == 0 {
            return Err(invalid("encoder.dimensions", "must be positive"));
        }
        if self.generator.max_new_tokens == 0 {
            return Err(invalid("generator.max_new_tokens", "must be positive"));
        }
        if !self.generator.temperature.is_finite() || self.generator.temperature < 0.0 {
            return Err(invalid(
                "generator.temperature",
                "must be a finite, non-negative number",
            ));
        }
        if self.generator.timeout_secs == Some(0) {
            return Err(invalid("generator.timeout_secs", "must be positive when set"));
        }
        match self.pool.strategy {
            PoolStrategy::PoisonedCaptions if self.dataset.poison_metadata_path.is_none() => {
                Err(invalid(
                    "dataset.poison_metadata_path",
                    "required by the poisoned_captions strategy",
                ))
            }
            PoolStrategy::TextCorpus if self.dataset.text_corpus_path.is_none() => Err(invalid(
                "dataset.text_corpus_path",
                "required by the text_corpus strategy",
            )),
            _ => Ok(()),
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.into(),
        reason: reason.into(),
    }
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `MMRAG_`, nested with `__`)
/// 3. The explicit config file, or `mmrag.toml` in the workspace
/// 4. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&MmragConfig>,
) -> Result<MmragConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(MmragConfig::default()));

    match (config_file, workspace) {
        (Some(file), _) => {
            if !file.exists() {
                return Err(ConfigError::Load {
                    message: format!("config file {} does not exist", file.display()),
                });
            }
            figment = figment.merge(Toml::file(file));
        }
        (None, Some(ws)) => {
            let ws_config = ws.join(CONFIG_FILE_NAME);
            if ws_config.exists() {
                figment = figment.merge(Toml::file(&ws_config));
            }
        }
        (None, None) => {}
    }

    // MMRAG_RETRIEVAL__TOP_K_TEXTS, MMRAG_GENERATOR__MODEL, ...
    figment = figment.merge(Env::prefixed("MMRAG_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::Load {
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MmragConfig::default();
        assert_eq!(config.retrieval.top_k_images, 3);
        assert_eq!(config.retrieval.top_k_texts, 3);
        assert!(config.encoder.normalize);
        assert_eq!(config.generator.max_new_tokens, 150);
        assert!(!config.generator.do_sample);
        assert!(config.evaluation.plural_tolerant);
        assert_eq!(config.evaluation.assistant_marker, "ASSISTANT:");
        assert_eq!(
            config.dataset.image_extensions,
            vec![".jpg", ".png", ".jpeg"]
        );
    }

    #[test]
    fn test_zero_top_k_rejected() {
        let mut config = MmragConfig::default();
        config.dataset.poison_metadata_path = Some("poison.json".into());
        config.retrieval.top_k_texts = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTopK { ref modality } if modality == "texts"));
    }

    #[test]
    fn test_poisoned_strategy_requires_table() {
        let config = MmragConfig::default();
        assert_eq!(config.pool.strategy, PoolStrategy::PoisonedCaptions);
        assert!(config.validate().is_err());

        let mut config = MmragConfig::default();
        config.pool.strategy = PoolStrategy::CleanCaptions;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_temperature_rejected() {
        let mut config = MmragConfig::default();
        config.pool.strategy = PoolStrategy::CleanCaptions;
        config.generator.temperature = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_strategy_from_str() {
        assert_eq!(
            "clean".parse::<PoolStrategy>().unwrap(),
            PoolStrategy::CleanCaptions
        );
        assert_eq!(
            "poisoned_captions".parse::<PoolStrategy>().unwrap(),
            PoolStrategy::PoisonedCaptions
        );
        assert_eq!(
            "corpus".parse::<PoolStrategy>().unwrap(),
            PoolStrategy::TextCorpus
        );
        assert!("fused".parse::<PoolStrategy>().is_err());
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = MmragConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: MmragConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.retrieval, config.retrieval);
        assert_eq!(parsed.generator.family, ModelFamily::Ollama);
    }

    #[test]
    fn test_load_config_from_workspace_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[retrieval]\ntop_k_images = 5\n\n[generator]\nfamily = \"openai_compatible\"\n",
        )
        .unwrap();
        let config = load_config(Some(dir.path()), None, None).unwrap();
        assert_eq!(config.retrieval.top_k_images, 5);
        assert_eq!(config.retrieval.top_k_texts, 3);
        assert_eq!(config.generator.family, ModelFamily::OpenaiCompatible);
    }

    #[test]
    fn test_load_config_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = load_config(None, Some(&missing), None).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }

    #[test]
    fn test_load_config_overrides_win() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = MmragConfig::default();
        overrides.retrieval.top_k_texts = 7;
        let config = load_config(Some(dir.path()), None, Some(&overrides)).unwrap();
        assert_eq!(config.retrieval.top_k_texts, 7);
    }
}
