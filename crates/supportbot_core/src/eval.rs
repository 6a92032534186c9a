use crate::embed::EmbeddingProvider;
use crate::error::Result;
use crate::matcher::Matcher;
use crate::model::{Decision, RetrievalMatch};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// One labelled query. `expected_entry` and `min_similarity` are optional
/// extra checks on top of the decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalCase {
    pub case_id: String,
    pub question: String,
    pub expected_decision: Decision,
    pub expected_entry: Option<usize>,
    pub min_similarity: Option<f32>,
}

impl EvalCase {
    pub fn passes(&self, actual: &RetrievalMatch) -> bool {
        if self.expected_decision != actual.reply.decision() {
            return false;
        }

        if let Some(expected) = self.expected_entry {
            if actual.entry_index != expected {
                return false;
            }
        }

        if let Some(min_sim) = self.min_similarity {
            if actual.score < min_sim {
                return false;
            }
        }

        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub case_id: String,
    pub passed: bool,
    pub actual_decision: Decision,
    pub actual_entry: usize,
    pub score: f32,
    pub latency_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub pass_rate: f32,
    pub outcomes: Vec<EvalOutcome>,
}

impl EvalSummary {
    pub fn meets(&self, required_pass_rate: f32) -> bool {
        self.pass_rate >= required_pass_rate
    }

    pub fn mean_latency_ms(&self) -> f64 {
        let total: f64 = self.outcomes.iter().map(|o| o.latency_ms).sum();
        total / self.outcomes.len().max(1) as f64
    }
}

/// Runs every case through `matcher`. The first embedding failure aborts the
/// run.
pub fn evaluate_cases<E>(matcher: &Matcher<E>, cases: &[EvalCase]) -> Result<EvalSummary>
where
    E: EmbeddingProvider,
{
    let mut outcomes = Vec::with_capacity(cases.len());

    for case in cases {
        let start = Instant::now();
        let result = matcher.lookup(&case.question)?;
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        outcomes.push(EvalOutcome {
            case_id: case.case_id.clone(),
            passed: case.passes(&result),
            actual_decision: result.reply.decision(),
            actual_entry: result.entry_index,
            score: result.score,
            latency_ms,
        });
    }

    let total = outcomes.len();
    let passed = outcomes.iter().filter(|o| o.passed).count();
    let failed = total.saturating_sub(passed);
    let pass_rate = if total == 0 {
        0.0
    } else {
        passed as f32 / total as f32
    };

    Ok(EvalSummary {
        total,
        passed,
        failed,
        pass_rate,
        outcomes,
    })
}
