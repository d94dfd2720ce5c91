//! # mmrag-core: multimodal RAG under caption poisoning
//!
//! Retrieves top-k images and texts for a question, optionally injects one
//! precomputed adversarial caption into the text pool, prompts a
//! vision-language generator and scores the answers with exact match.
//!
//! Pipeline: question → [`embeddings::Encoder`] → [`retrieval::rank`] per
//! modality → [`prompt::build_prompt`] → [`generator::Generator`] →
//! [`types::ResultRecord`] → [`evaluation::evaluate_records`].

// Foundation
pub mod config;
pub mod error;
pub mod types;

// Inputs
pub mod dataset;
pub mod poison;
pub mod pool;

// Retrieval and generation
pub mod embeddings;
pub mod generator;
pub mod orchestrator;
pub mod prompt;
pub mod retrieval;

// Outputs
pub mod evaluation;
pub mod results;

// Re-exports
pub use config::{EvalOptions, MmragConfig, ModelFamily, PoolStrategy, load_config};
pub use embeddings::{Encoder, HashingEncoder, HttpEncoder, create_encoder};
pub use error::{ConfigError, DatasetError, MmragError, Result};
pub use evaluation::{EvalReport, PoisonAudit, evaluate_file, evaluate_records};
pub use generator::{GenerationRequest, Generator, GeneratorRegistry};
pub use orchestrator::{BatchOutcome, RagAnswer, RagOrchestrator, RunSummary};
pub use pool::PoolBuilder;
pub use results::{read_results, write_results};
pub use types::{Question, ResultRecord};
