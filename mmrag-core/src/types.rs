//! Core data model: questions, candidate pools, selections and result records.

use serde::{Deserialize, Deserializer, Serialize};
use std::path::PathBuf;

/// A fixed-size embedding vector.
pub type Embedding = Vec<f32>;

/// One similarity score per candidate, aligned by index to the scored pool.
pub type ScoreVector = Vec<f32>;

/// A gold reference answer. Fields other than `answer` are kept verbatim so they
/// survive into the results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldAnswer {
    pub answer: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl GoldAnswer {
    pub fn new(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Per-question metadata linking to the candidate documents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionMetadata {
    #[serde(default)]
    pub image_doc_ids: Vec<String>,
    #[serde(default)]
    pub text_doc_ids: Vec<String>,
}

/// A question with its gold answers. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default, deserialize_with = "deserialize_qid")]
    pub qid: Option<String>,
    pub question: String,
    #[serde(default)]
    pub answers: Vec<GoldAnswer>,
    #[serde(default)]
    pub metadata: QuestionMetadata,
}

/// Accept string or numeric question ids.
fn deserialize_qid<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Where a candidate text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    Clean,
    Poison,
}

/// A text candidate with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateText {
    pub source: SourceTag,
    pub text: String,
}

impl CandidateText {
    pub fn clean(text: impl Into<String>) -> Self {
        Self {
            source: SourceTag::Clean,
            text: text.into(),
        }
    }

    pub fn poison(text: impl Into<String>) -> Self {
        Self {
            source: SourceTag::Poison,
            text: text.into(),
        }
    }
}

/// A decoded, validated image ready for encoding and generation.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub id: String,
    pub path: PathBuf,
    /// Original encoded file bytes, forwarded to generator backends.
    pub bytes: Vec<u8>,
    pub pixels: image::RgbImage,
}

/// The text side of a question's candidate pool. Insertion order is the
/// ranking tie-break order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePool {
    pub texts: Vec<CandidateText>,
}

impl CandidatePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: CandidateText) {
        self.texts.push(text);
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    pub fn text_strings(&self) -> Vec<String> {
        self.texts.iter().map(|t| t.text.clone()).collect()
    }

    pub fn poison_count(&self) -> usize {
        self.texts
            .iter()
            .filter(|t| t.source == SourceTag::Poison)
            .count()
    }
}

/// Top-k selection: indices in descending score order with aligned scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSelection {
    pub indices: Vec<usize>,
    pub scores: Vec<f32>,
}

impl RetrievalSelection {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// A successfully answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessRecord {
    pub qid: Option<String>,
    pub question: String,
    pub model_answer: String,
    pub gold_answers: Vec<GoldAnswer>,
    pub associated_images: Vec<String>,
    pub associated_captions: Vec<String>,
    pub retrieved_image_ids: Vec<String>,
    pub retrieved_captions: Vec<String>,
    pub image_scores: Vec<f32>,
    pub text_scores: Vec<f32>,
    pub poison_injected: bool,
    pub poison_caption: Option<String>,
}

/// A question whose processing failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub qid: Option<String>,
    pub question: String,
    pub error: String,
}

/// One entry of the results file. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultRecord {
    Success(SuccessRecord),
    Failure(FailureRecord),
}

impl ResultRecord {
    pub fn qid(&self) -> Option<&str> {
        match self {
            Self::Success(r) => r.qid.as_deref(),
            Self::Failure(r) => r.qid.as_deref(),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }
}
