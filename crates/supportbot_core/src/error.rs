use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupportBotError {
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("knowledge base has no entries")]
    EmptyKnowledgeBase,

    #[error("invalid faq entry #{index}: {reason}")]
    InvalidEntry { index: usize, reason: String },

    #[error("invalid matcher config: {0}")]
    InvalidConfig(String),

    #[error("failed to load corpus: {0}")]
    CorpusLoad(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, SupportBotError>;
