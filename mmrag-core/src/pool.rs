//! Per-question text candidate pool construction.

use crate::config::PoolStrategy;
use crate::dataset::ImageMetadata;
use crate::poison::{InjectionOutcome, PoisonTable, inject};
use crate::types::{CandidatePool, CandidateText, Question};
use std::collections::HashMap;

/// Builds the text pool for a question from read-only lookup tables.
#[derive(Debug, Clone, Copy)]
pub struct PoolBuilder<'a> {
    strategy: PoolStrategy,
    image_metadata: &'a ImageMetadata,
    poison_table: Option<&'a PoisonTable>,
    text_corpus: Option<&'a HashMap<String, String>>,
}

impl<'a> PoolBuilder<'a> {
    pub fn new(strategy: PoolStrategy, image_metadata: &'a ImageMetadata) -> Self {
        Self {
            strategy,
            image_metadata,
            poison_table: None,
            text_corpus: None,
        }
    }

    pub fn with_poison_table(mut self, table: &'a PoisonTable) -> Self {
        self.poison_table = Some(table);
        self
    }

    pub fn with_text_corpus(mut self, corpus: &'a HashMap<String, String>) -> Self {
        self.text_corpus = Some(corpus);
        self
    }

    pub fn strategy(&self) -> PoolStrategy {
        self.strategy
    }

    /// Build the pool for `question`, whose images resolved to `image_ids`.
    pub fn build<S: AsRef<str>>(
        &self,
        question: &Question,
        image_ids: &[S],
    ) -> (CandidatePool, InjectionOutcome) {
        match self.strategy {
            PoolStrategy::CleanCaptions => {
                (self.clean_captions(image_ids), InjectionOutcome::not_poisoned())
            }
            PoolStrategy::PoisonedCaptions => {
                let mut pool = self.clean_captions(image_ids);
                let outcome = match self.poison_table {
                    Some(table) => inject(&mut pool, image_ids, table),
                    None => InjectionOutcome::not_poisoned(),
                };
                (pool, outcome)
            }
            PoolStrategy::TextCorpus => {
                (self.corpus_texts(question), InjectionOutcome::not_poisoned())
            }
        }
    }

    fn clean_captions<S: AsRef<str>>(&self, image_ids: &[S]) -> CandidatePool {
        let mut pool = CandidatePool::new();
        for id in image_ids {
            if let Some(caption) = self
                .image_metadata
                .get(id.as_ref())
                .and_then(|m| m.caption.as_deref())
                .filter(|c| !c.is_empty())
            {
                pool.push(CandidateText::clean(caption));
            }
        }
        pool
    }

    fn corpus_texts(&self, question: &Question) -> CandidatePool {
        let mut pool = CandidatePool::new();
        let Some(corpus) = self.text_corpus else {
            return pool;
        };
        for doc_id in &question.metadata.text_doc_ids {
            match corpus.get(doc_id) {
                Some(text) => pool.push(CandidateText::clean(text.as_str())),
                None => tracing::warn!(doc_id = %doc_id, "Text document not in corpus, skipping"),
            }
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ImageMeta;
    use crate::poison::PoisonRecord;
    use crate::types::{QuestionMetadata, SourceTag};

    fn metadata() -> ImageMetadata {
        let mut m = ImageMetadata::new();
        for (id, caption) in [("a", Some("cap a")), ("b", Some("")), ("c", Some("cap c")), ("d", None)] {
            m.insert(
                id.to_string(),
                ImageMeta {
                    path: None,
                    caption: caption.map(str::to_string),
                },
            );
        }
        m
    }

    fn question(text_ids: &[&str]) -> Question {
        Question {
            qid: Some("q".into()),
            question: "?".into(),
            answers: Vec::new(),
            metadata: QuestionMetadata {
                image_doc_ids: vec!["a".into(), "b".into(), "c".into()],
                text_doc_ids: text_ids.iter().map(|s| s.to_string()).collect(),
            },
        }
    }

    #[test]
    fn test_clean_captions_skip_empty() {
        let meta = metadata();
        let builder = PoolBuilder::new(PoolStrategy::CleanCaptions, &meta);
        let (pool, outcome) = builder.build(&question(&[]), &["a", "b", "c", "d", "zz"]);
        assert_eq!(pool.text_strings(), vec!["cap a", "cap c"]);
        assert!(!outcome.injected);
    }

    #[test]
    fn test_poisoned_captions_append_after_clean() {
        let meta = metadata();
        let table: PoisonTable = [(
            "c".to_string(),
            PoisonRecord {
                path: None,
                clean_caption: "cap c".into(),
                poisoned_candidates: vec!["evil".into(), "eviler".into()],
            },
        )]
        .into_iter()
        .collect();
        let builder = PoolBuilder::new(PoolStrategy::PoisonedCaptions, &meta).with_poison_table(&table);
        let (pool, outcome) = builder.build(&question(&[]), &["a", "c"]);
        assert_eq!(pool.text_strings(), vec!["cap a", "cap c", "evil"]);
        assert_eq!(pool.texts[2].source, SourceTag::Poison);
        assert!(outcome.injected);
        assert_eq!(outcome.source_image_id.as_deref(), Some("c"));
    }

    #[test]
    fn test_text_corpus_strategy() {
        let meta = metadata();
        let corpus: HashMap<String, String> =
            [("t1".to_string(), "doc one".to_string()), ("t2".to_string(), "doc two".to_string())]
                .into_iter()
                .collect();
        let builder = PoolBuilder::new(PoolStrategy::TextCorpus, &meta).with_text_corpus(&corpus);
        let (pool, _) = builder.build(&question(&["t2", "missing", "t1"]), &["a"]);
        assert_eq!(pool.text_strings(), vec!["doc two", "doc one"]);
    }
}
