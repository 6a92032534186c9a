use crate::embed::{validate_embedding, EmbeddingProvider};
use crate::error::{Result, SupportBotError};
use crate::knowledge::KnowledgeBase;
use crate::model::{Reply, RetrievalMatch};
use crate::retrieval::nearest;
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_THRESHOLD: f32 = 0.25;
pub const DEFAULT_FALLBACK_TEXT: &str =
    "Sorry, I'm not sure about that. Could you re-phrase or email support@example.com?";

#[derive(Debug, Clone, PartialEq)]
pub struct MatcherConfig {
    /// Minimum cosine similarity for an answer. A score equal to the
    /// threshold counts as a match.
    pub threshold: f32,
    pub fallback_text: String,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            fallback_text: DEFAULT_FALLBACK_TEXT.to_string(),
        }
    }
}

impl MatcherConfig {
    pub fn with_threshold(threshold: f32) -> Self {
        Self {
            threshold,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(SupportBotError::InvalidConfig(format!(
                "threshold must be finite, got {}",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// Scores an already-embedded query against the knowledge base.
pub fn decide(
    query_embedding: &[f32],
    kb: &KnowledgeBase,
    config: &MatcherConfig,
) -> Result<RetrievalMatch> {
    let (entry_index, score) = nearest(query_embedding, kb.question_embeddings())
        .ok_or(SupportBotError::EmptyKnowledgeBase)?;

    let reply = if score < config.threshold {
        Reply::Fallback(config.fallback_text.clone())
    } else {
        Reply::Answer(kb.answers()[entry_index].clone())
    };

    Ok(RetrievalMatch {
        entry_index,
        score,
        reply,
    })
}

/// Embeds `query` and matches it against `kb`. Blank queries are embedded
/// like any other text.
pub fn match_query<E>(
    query: &str,
    kb: &KnowledgeBase,
    embedder: &E,
    config: &MatcherConfig,
) -> Result<RetrievalMatch>
where
    E: EmbeddingProvider + ?Sized,
{
    if kb.is_empty() {
        return Err(SupportBotError::EmptyKnowledgeBase);
    }

    let query_embedding = embedder
        .embed(query)
        .map_err(|e| SupportBotError::EmbeddingFailed(format!("{e:#}")))?;
    validate_embedding(&query_embedding, Some(kb.dimension()))
        .map_err(SupportBotError::EmbeddingFailed)?;

    let result = decide(&query_embedding, kb, config)?;
    debug!(
        entry = result.entry_index,
        score = result.score,
        fallback = result.reply.is_fallback(),
        "matched query"
    );
    Ok(result)
}

/// Knowledge base, embedding provider and tuning bundled together. This is
/// what the serving layer and the interactive client hold on to.
pub struct Matcher<E = Box<dyn EmbeddingProvider>> {
    kb: Arc<KnowledgeBase>,
    config: MatcherConfig,
    embedder: E,
}

impl<E: EmbeddingProvider> Matcher<E> {
    pub fn new(kb: Arc<KnowledgeBase>, embedder: E, config: MatcherConfig) -> Result<Self> {
        config.validate()?;
        if kb.is_empty() {
            return Err(SupportBotError::EmptyKnowledgeBase);
        }
        Ok(Self {
            kb,
            config,
            embedder,
        })
    }

    pub fn knowledge_base(&self) -> &KnowledgeBase {
        &self.kb
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.config
    }

    pub fn lookup(&self, query: &str) -> Result<RetrievalMatch> {
        match_query(query, &self.kb, &self.embedder, &self.config)
    }

    pub fn reply(&self, query: &str) -> Result<Reply> {
        self.lookup(query).map(|m| m.reply)
    }

    /// Answer text for `query`: either a corpus answer verbatim or the
    /// fallback text.
    pub fn answer(&self, query: &str) -> Result<String> {
        self.reply(query).map(Reply::into_text)
    }
}
