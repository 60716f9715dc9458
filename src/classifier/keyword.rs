// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Deterministic keyword oracle
//!
//! Answers in the same `Classification:` / `Summary:` format a language model
//! is asked for, so it exercises the full parsing path. Used offline and in tests.

use async_trait::async_trait;

use super::{content_of, Classification, Oracle};
use crate::Result;

const PREVIEW_CHARS: usize = 80;

/// Classifies by keyword presence
pub struct KeywordOracle {
    keywords: Vec<String>,
}

impl KeywordOracle {
    pub fn new() -> Self {
        Self::with_keywords(["urgent", "action", "todo", "follow up", "deadline"])
    }

    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(|k| k.into().to_lowercase()).collect(),
        }
    }

    /// Deterministic verdict for raw content
    pub fn judge(&self, content: &str) -> (Classification, String) {
        let lower = content.to_lowercase();
        let classification = if self.keywords.iter().any(|k| lower.contains(k.as_str())) {
            Classification::NeedsAction
        } else {
            Classification::Done
        };

        let headline = match classification {
            Classification::NeedsAction => "This file requires immediate attention and action.",
            Classification::Done => "This file has been reviewed and can be archived.",
        };

        let detail = match content.lines().map(str::trim).find(|l| !l.is_empty()) {
            Some(first) => {
                let preview: String = first.chars().take(PREVIEW_CHARS).collect();
                if preview.len() < first.len() {
                    format!("Opens with: \"{}...\"", preview)
                } else {
                    format!("Opens with: \"{}\"", preview)
                }
            }
            None => "The file is empty.".to_string(),
        };

        (classification, format!("{}\n{}", headline, detail))
    }
}

impl Default for KeywordOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Oracle for KeywordOracle {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        let (classification, summary) = self.judge(content_of(prompt));
        Ok(format!("Classification: {}\nSummary: {}", classification, summary))
    }
}
