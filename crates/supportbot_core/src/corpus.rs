use crate::error::{Result, SupportBotError};
use crate::model::FaqEntry;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Built-in sample corpus used when no corpus file is configured.
pub fn sample_corpus() -> Vec<FaqEntry> {
    [
        (
            "How do I reset my password?",
            "Click **Forgot password** on the sign-in page. We’ll email you a secure link.",
        ),
        (
            "Where can I track my order?",
            "Open **Your Account → Orders** to see real-time shipping status.",
        ),
        (
            "My package arrived damaged.",
            "So sorry! Choose **Problem with order → Damaged item** and we’ll ship a free replacement.",
        ),
        (
            "How long is the warranty?",
            "All products carry a **12-month warranty** from the delivery date.",
        ),
        (
            "I need a copy of my invoice.",
            "In the order details page, click **Download invoice (PDF)**.",
        ),
        (
            "How do I reach human support?",
            "Email support@example.com or call **+1-800-555-1234** (24 × 7).",
        ),
    ]
    .into_iter()
    .map(FaqEntry::from)
    .collect()
}

/// Reads one `{"question": ..., "answer": ...}` object per line. Blank lines
/// are skipped.
pub fn load_corpus_jsonl(path: &Path) -> Result<Vec<FaqEntry>> {
    let file = File::open(path)
        .map_err(|e| SupportBotError::CorpusLoad(format!("open {}: {e}", path.display())))?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: FaqEntry = serde_json::from_str(&line).map_err(|e| {
            SupportBotError::CorpusLoad(format!("{}:{}: {e}", path.display(), lineno + 1))
        })?;
        entries.push(entry);
    }

    tracing::debug!(path = %path.display(), entries = entries.len(), "loaded corpus file");
    Ok(entries)
}
