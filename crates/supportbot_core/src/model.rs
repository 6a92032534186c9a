use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

impl FaqEntry {
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
        }
    }
}

impl<Q: Into<String>, A: Into<String>> From<(Q, A)> for FaqEntry {
    fn from((question, answer): (Q, A)) -> Self {
        Self::new(question, answer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Answer,
    Fallback,
}

/// Outcome of matching one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Answer(String),
    Fallback(String),
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Answer(text) | Reply::Fallback(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Reply::Answer(text) | Reply::Fallback(text) => text,
        }
    }

    pub fn decision(&self) -> Decision {
        match self {
            Reply::Answer(_) => Decision::Answer,
            Reply::Fallback(_) => Decision::Fallback,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Reply::Fallback(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalMatch {
    /// Index of the most similar question, reported even when the score
    /// falls below the threshold.
    pub entry_index: usize,
    pub score: f32,
    pub reply: Reply,
}
