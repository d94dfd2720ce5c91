//! Retrieval-generation orchestration.
//!
//! One question at a time: encode the question, encode both candidate pools,
//! rank images and texts independently, build the prompt from the selected
//! texts and images, generate, and package the answer with full provenance.
//! A failure while answering one question becomes a failure record; the batch
//! carries on.

use crate::config::{GeneratorConfig, RetrievalConfig};
use crate::dataset::{ImageLoader, ImageMetadata};
use crate::embeddings::Encoder;
use crate::error::{ConfigError, EncodingError, GenerationError, MmragError};
use crate::generator::{GenerationRequest, Generator, SamplingConfig};
use crate::pool::PoolBuilder;
use crate::prompt::build_prompt;
use crate::retrieval::rank;
use crate::types::{
    Embedding, FailureRecord, LoadedImage, Question, ResultRecord, RetrievalSelection,
    SuccessRecord,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const PROGRESS_EVERY: usize = 25;

/// Output of one retrieval-generation pass.
#[derive(Debug, Clone, PartialEq)]
pub struct RagAnswer {
    pub answer: String,
    /// Selected image indices (into the image pool) and their scores.
    pub images: RetrievalSelection,
    /// Selected text indices (into the text pool) and their scores.
    pub texts: RetrievalSelection,
    pub prompt: String,
}

/// Counters for one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_questions: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped_no_images: usize,
    pub skipped_no_texts: usize,
    pub poisoned: usize,
}

/// Records in question order plus the run counters.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub records: Vec<ResultRecord>,
    pub summary: RunSummary,
}

/// Composes encoder, ranker, prompt builder and generator.
///
/// Holds shared references only; the encoder and generator are built once at
/// startup and never mutated.
pub struct RagOrchestrator<'a> {
    encoder: &'a dyn Encoder,
    generator: &'a dyn Generator,
    retrieval: RetrievalConfig,
    max_new_tokens: usize,
    sampling: SamplingConfig,
    timeout: Option<Duration>,
}

impl<'a> RagOrchestrator<'a> {
    /// Fails fast on a non-positive top-k.
    pub fn new(
        encoder: &'a dyn Encoder,
        generator: &'a dyn Generator,
        retrieval: RetrievalConfig,
        generation: &GeneratorConfig,
    ) -> Result<Self, ConfigError> {
        if retrieval.top_k_images == 0 {
            return Err(ConfigError::InvalidTopK {
                modality: "images".into(),
            });
        }
        if retrieval.top_k_texts == 0 {
            return Err(ConfigError::InvalidTopK {
                modality: "texts".into(),
            });
        }
        Ok(Self {
            encoder,
            generator,
            retrieval,
            max_new_tokens: generation.max_new_tokens,
            sampling: SamplingConfig::from(generation),
            timeout: generation.timeout_secs.map(Duration::from_secs),
        })
    }

    /// Answer one question against its image and text pools.
    pub async fn answer(
        &self,
        question: &str,
        images: &[LoadedImage],
        texts: &[String],
    ) -> Result<RagAnswer, MmragError> {
        let query = self
            .encoder
            .encode_text(&[question.to_string()])
            .await
            .and_then(|q| expect_count(q, 1))?
            .remove(0);

        let image_embs = self
            .encoder
            .encode_images(images)
            .await
            .and_then(|e| expect_count(e, images.len()))?;
        let text_embs = self
            .encoder
            .encode_text(texts)
            .await
            .and_then(|e| expect_count(e, texts.len()))?;

        // Modalities are ranked independently; their scores are never compared.
        let image_sel = rank(&query, &image_embs, self.retrieval.top_k_images)?;
        let text_sel = rank(&query, &text_embs, self.retrieval.top_k_texts)?;

        let top_texts: Vec<&str> = text_sel.indices.iter().map(|&i| texts[i].as_str()).collect();
        let top_images: Vec<&LoadedImage> = image_sel.indices.iter().map(|&i| &images[i]).collect();

        let prompt = build_prompt(question, &top_texts, top_images.len());
        let request =
            GenerationRequest::new(prompt, top_images, self.max_new_tokens, self.sampling)?;
        let answer = self.generate(&request).await?;

        Ok(RagAnswer {
            answer,
            images: image_sel,
            texts: text_sel,
            prompt: request.prompt().to_string(),
        })
    }

    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        match self.timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.generator.generate(request))
                .await
                .map_err(|_| GenerationError::Timeout {
                    timeout_secs: deadline.as_secs(),
                })?,
            None => self.generator.generate(request).await,
        }
    }

    /// Process every question in order, isolating per-question failures.
    pub async fn run_batch(
        &self,
        questions: &[Question],
        pools: &PoolBuilder<'_>,
        loader: &ImageLoader,
        image_metadata: &ImageMetadata,
    ) -> Result<BatchOutcome, MmragError> {
        let mut outcome = BatchOutcome::default();
        outcome.summary.total_questions = questions.len();
        tracing::info!(
            questions = questions.len(),
            strategy = ?pools.strategy(),
            top_k_images = self.retrieval.top_k_images,
            top_k_texts = self.retrieval.top_k_texts,
            "Running RAG"
        );

        for (n, question) in questions.iter().enumerate() {
            if n > 0 && n % PROGRESS_EVERY == 0 {
                tracing::info!(done = n, total = questions.len(), "Progress");
            }
            let qid = question.qid.as_deref().unwrap_or("<none>");

            let (images, image_ids) = loader.load(&question.metadata.image_doc_ids, image_metadata);
            if images.is_empty() {
                tracing::warn!(qid, "No loadable images, skipping question");
                outcome.summary.skipped_no_images += 1;
                continue;
            }

            let (pool, injection) = pools.build(question, &image_ids);
            if pool.is_empty() {
                tracing::warn!(qid, "Empty text pool, skipping question");
                outcome.summary.skipped_no_texts += 1;
                continue;
            }

            outcome.summary.attempted += 1;
            let texts = pool.text_strings();
            match self.answer(&question.question, &images, &texts).await {
                Ok(answer) => {
                    tracing::debug!(
                        qid,
                        images = ?answer.images.indices,
                        texts = ?answer.texts.indices,
                        poisoned = injection.injected,
                        "Answered"
                    );
                    outcome.summary.succeeded += 1;
                    if injection.injected {
                        outcome.summary.poisoned += 1;
                    }
                    outcome.records.push(ResultRecord::Success(SuccessRecord {
                        qid: question.qid.clone(),
                        question: question.question.clone(),
                        model_answer: answer.answer,
                        gold_answers: question.answers.clone(),
                        retrieved_image_ids: answer
                            .images
                            .indices
                            .iter()
                            .map(|&i| image_ids[i].clone())
                            .collect(),
                        retrieved_captions: answer
                            .texts
                            .indices
                            .iter()
                            .map(|&i| texts[i].clone())
                            .collect(),
                        image_scores: answer.images.scores,
                        text_scores: answer.texts.scores,
                        associated_images: image_ids,
                        associated_captions: texts,
                        poison_injected: injection.injected,
                        poison_caption: injection.text,
                    }));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(qid, error = %e, "Question failed");
                    outcome.summary.failed += 1;
                    outcome.records.push(ResultRecord::Failure(FailureRecord {
                        qid: question.qid.clone(),
                        question: question.question.clone(),
                        error: e.to_string(),
                    }));
                }
            }
        }

        tracing::info!(
            attempted = outcome.summary.attempted,
            succeeded = outcome.summary.succeeded,
            failed = outcome.summary.failed,
            poisoned = outcome.summary.poisoned,
            "RAG run finished"
        );
        Ok(outcome)
    }
}

fn expect_count(embeddings: Vec<Embedding>, expected: usize) -> Result<Vec<Embedding>, EncodingError> {
    if embeddings.len() != expected {
        return Err(EncodingError::Cardinality {
            expected,
            got: embeddings.len(),
        });
    }
    Ok(embeddings)
}
