//! Deterministic injection of precomputed adversarial captions.
//!
//! The poison table is produced offline and consumed read-only. For each
//! question at most one poisoned caption enters the text pool: the first
//! candidate of the first associated image that has any candidates.

use crate::types::{CandidatePool, CandidateText};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Adversarial caption candidates for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoisonRecord {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub clean_caption: String,
    #[serde(default)]
    pub poisoned_candidates: Vec<String>,
}

/// Read-only lookup of poison records keyed by image id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoisonTable {
    records: HashMap<String, PoisonRecord>,
}

impl PoisonTable {
    pub fn new(records: HashMap<String, PoisonRecord>) -> Self {
        Self { records }
    }

    pub fn get(&self, image_id: &str) -> Option<&PoisonRecord> {
        self.records.get(image_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The caption to inject for these images, with the image it came from.
    pub fn select<'a, S: AsRef<str>>(&'a self, image_ids: &[S]) -> Option<(&'a str, &'a str)> {
        image_ids.iter().find_map(|id| {
            let (key, record) = self.records.get_key_value(id.as_ref())?;
            record
                .poisoned_candidates
                .first()
                .map(|c| (key.as_str(), c.as_str()))
        })
    }
}

impl FromIterator<(String, PoisonRecord)> for PoisonTable {
    fn from_iter<I: IntoIterator<Item = (String, PoisonRecord)>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

/// What injection did to one question's pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InjectionOutcome {
    pub injected: bool,
    pub text: Option<String>,
    pub source_image_id: Option<String>,
}

impl InjectionOutcome {
    pub fn not_poisoned() -> Self {
        Self::default()
    }
}

/// Append at most one poisoned caption to `pool`, after all existing texts.
pub fn inject<S: AsRef<str>>(
    pool: &mut CandidatePool,
    image_ids: &[S],
    table: &PoisonTable,
) -> InjectionOutcome {
    match table.select(image_ids) {
        Some((image_id, caption)) => {
            pool.push(CandidateText::poison(caption));
            tracing::debug!(image_id, "Injected poisoned caption");
            InjectionOutcome {
                injected: true,
                text: Some(caption.to_string()),
                source_image_id: Some(image_id.to_string()),
            }
        }
        None => InjectionOutcome::not_poisoned(),
    }
}
