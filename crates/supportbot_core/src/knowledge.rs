use crate::embed::{validate_embedding, EmbeddingProvider};
use crate::error::{Result, SupportBotError};
use crate::model::FaqEntry;
use std::time::Instant;
use tracing::info;

/// FAQ corpus with one precomputed embedding per question. Index `i` refers
/// to the same entry in `questions`, `answers` and `question_embeddings`.
/// Never mutated after [`KnowledgeBase::build`].
#[derive(Debug, Clone)]
pub struct KnowledgeBase {
    questions: Vec<String>,
    answers: Vec<String>,
    question_embeddings: Vec<Vec<f32>>,
    dimension: usize,
}

impl KnowledgeBase {
    /// Embeds every question once, in corpus order.
    ///
    /// Fails with [`SupportBotError::EmptyKnowledgeBase`] for an empty corpus,
    /// [`SupportBotError::InvalidEntry`] for a blank question, and
    /// [`SupportBotError::ModelUnavailable`] when the provider errors or hands
    /// back vectors that are empty, non-finite or of differing dimension.
    pub fn build<E>(entries: Vec<FaqEntry>, embedder: &E) -> Result<Self>
    where
        E: EmbeddingProvider + ?Sized,
    {
        if entries.is_empty() {
            return Err(SupportBotError::EmptyKnowledgeBase);
        }

        if let Some(index) = entries.iter().position(|e| e.question.trim().is_empty()) {
            return Err(SupportBotError::InvalidEntry {
                index,
                reason: "question is empty".to_string(),
            });
        }

        let (questions, answers): (Vec<String>, Vec<String>) = entries
            .into_iter()
            .map(|e| (e.question, e.answer))
            .unzip();

        let start = Instant::now();
        let question_embeddings = embedder
            .embed_batch(&questions)
            .map_err(|e| SupportBotError::ModelUnavailable(format!("{e:#}")))?;

        if question_embeddings.len() != questions.len() {
            return Err(SupportBotError::ModelUnavailable(format!(
                "provider returned {} vectors for {} questions",
                question_embeddings.len(),
                questions.len()
            )));
        }

        let dimension = question_embeddings[0].len();
        for (idx, v) in question_embeddings.iter().enumerate() {
            validate_embedding(v, Some(dimension)).map_err(|reason| {
                SupportBotError::ModelUnavailable(format!("question #{idx}: {reason}"))
            })?;
        }

        info!(
            entries = questions.len(),
            dimension,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "knowledge base built"
        );

        Ok(Self {
            questions,
            answers,
            question_embeddings,
            dimension,
        })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    pub fn answers(&self) -> &[String] {
        &self.answers
    }

    pub fn question_embeddings(&self) -> &[Vec<f32>] {
        &self.question_embeddings
    }

    pub fn answer(&self, index: usize) -> Option<&str> {
        self.answers.get(index).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.questions
            .iter()
            .zip(self.answers.iter())
            .map(|(q, a)| (q.as_str(), a.as_str()))
    }
}
