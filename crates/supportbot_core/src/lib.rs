pub mod corpus;
pub mod embed;
pub mod error;
pub mod eval;
pub mod knowledge;
pub mod matcher;
pub mod minilm_embed;
pub mod model;
pub mod retrieval;

pub use corpus::{load_corpus_jsonl, sample_corpus};
pub use embed::{EmbeddingProvider, HashEmbeddingProvider, SerializedProvider};
pub use error::{Result, SupportBotError};
pub use eval::{evaluate_cases, EvalCase, EvalOutcome, EvalSummary};
pub use knowledge::KnowledgeBase;
pub use matcher::{
    decide, match_query, Matcher, MatcherConfig, DEFAULT_FALLBACK_TEXT, DEFAULT_THRESHOLD,
};
pub use minilm_embed::{MiniLmEmbeddingProvider, MINILM_DIMENSION};
pub use model::{Decision, FaqEntry, Reply, RetrievalMatch};
pub use retrieval::{cosine_similarity, nearest};
