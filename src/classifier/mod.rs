// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classifier gateway: turns file content into a category and a short summary
//!
//! The gateway never fails. Timeouts, unreachable oracles and garbled answers
//! all collapse into the configured fallback verdict, with the reason attached
//! as a [`Degradation`] so the caller can warn about it.

pub mod command;
pub mod keyword;
pub mod ollama;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{Backend, ClassifierConfig};
use crate::{Result, TriageError};

pub use command::CommandOracle;
pub use keyword::KeywordOracle;
pub use ollama::OllamaOracle;

/// Summaries are cut to this many lines
pub const MAX_SUMMARY_LINES: usize = 3;

pub(crate) const CONTENT_BEGIN: &str = "--- BEGIN CONTENT ---";
pub(crate) const CONTENT_END: &str = "--- END CONTENT ---";

/// Destination category for a processed file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "Needs_Action", alias = "NeedsAction")]
    NeedsAction,
    Done,
}

impl Classification {
    pub const ALL: [Classification; 2] = [Classification::NeedsAction, Classification::Done];

    /// Label used in prompts, folder defaults and the log document
    pub fn label(&self) -> &'static str {
        match self {
            Classification::NeedsAction => "Needs_Action",
            Classification::Done => "Done",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Classification {
    type Err = TriageError;

    /// Accepts `Needs_Action`, `NeedsAction`, `needs action`, `needs-action` and `Done` in any case
    fn from_str(s: &str) -> Result<Self> {
        match normalize_label(s).as_str() {
            "needsaction" => Ok(Classification::NeedsAction),
            "done" => Ok(Classification::Done),
            _ => Err(TriageError::InvalidCategory(s.to_string())),
        }
    }
}

/// Why a verdict fell back to defaults
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// Oracle did not answer in time
    Timeout(Duration),
    /// Oracle could not be reached or started
    Unreachable(String),
    /// Oracle ran but reported an error
    Failed(String),
    /// Oracle answer could not be decoded at all
    Undecodable(String),
    /// Oracle answered but a field was missing or unrecognised
    Incomplete(String),
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Degradation::Timeout(d) => write!(f, "timed out after {}s", d.as_secs_f32()),
            Degradation::Unreachable(msg) => write!(f, "unreachable: {}", msg),
            Degradation::Failed(msg) => write!(f, "failed: {}", msg),
            Degradation::Undecodable(msg) => write!(f, "undecodable response: {}", msg),
            Degradation::Incomplete(msg) => write!(f, "incomplete response: {}", msg),
        }
    }
}

impl Degradation {
    fn from_error(err: TriageError) -> Self {
        match err {
            TriageError::OracleUnavailable(msg) => Degradation::Unreachable(msg),
            TriageError::OracleResponse(msg) => Degradation::Undecodable(msg),
            TriageError::Json(e) => Degradation::Undecodable(e.to_string()),
            TriageError::Api(e) if e.is_decode() => Degradation::Undecodable(e.to_string()),
            TriageError::Api(e) if e.is_connect() => Degradation::Unreachable(e.to_string()),
            other => Degradation::Failed(other.to_string()),
        }
    }
}

/// Gateway result: always exactly one category and one summary
#[derive(Debug, Clone)]
pub struct Verdict {
    pub classification: Classification,
    pub summary: String,
    /// Set when any part of the verdict is a fallback value
    pub degraded: Option<Degradation>,
}

/// External classification oracle. Text prompt in, free-form answer out.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Name of this oracle, for logs
    fn name(&self) -> &'static str;

    /// Send a prompt and return the raw answer
    async fn ask(&self, prompt: &str) -> Result<String>;

    /// Cheap reachability check
    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the oracle selected in configuration
pub fn build_oracle(config: &ClassifierConfig) -> Result<Arc<dyn Oracle>> {
    let oracle: Arc<dyn Oracle> = match config.backend {
        Backend::Command => Arc::new(CommandOracle::from_config(&config.command)),
        Backend::Ollama => Arc::new(OllamaOracle::new(
            &config.ollama.url,
            &config.ollama.model,
            config.timeout(),
        )?),
        Backend::Keyword => Arc::new(KeywordOracle::new()),
    };
    Ok(oracle)
}

/// Wraps an [`Oracle`] with prompt building, a timeout, parsing and fallbacks
pub struct ClassifierGateway {
    oracle: Arc<dyn Oracle>,
    timeout: Duration,
    fallback_category: Classification,
    fallback_summary: String,
    max_content_chars: usize,
}

impl ClassifierGateway {
    pub fn new(oracle: Arc<dyn Oracle>, config: &ClassifierConfig) -> Self {
        Self {
            oracle,
            timeout: config.timeout(),
            fallback_category: config.fallback_category,
            fallback_summary: config.fallback_summary.clone(),
            max_content_chars: config.max_content_chars,
        }
    }

    /// Override the oracle timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn oracle_name(&self) -> &'static str {
        self.oracle.name()
    }

    pub async fn health_check(&self) -> Result<()> {
        self.oracle.health_check().await
    }

    /// Classify and summarize content. Never fails; see [`Verdict::degraded`].
    pub async fn classify(&self, content: &str) -> Verdict {
        let prompt = build_prompt(content, self.max_content_chars);

        debug!("Asking {} oracle ({} chars of content)", self.oracle.name(), content.len());

        let raw = match tokio::time::timeout(self.timeout, self.oracle.ask(&prompt)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return self.fallback(Degradation::from_error(e)),
            Err(_) => return self.fallback(Degradation::Timeout(self.timeout)),
        };

        let parsed = parse_response(&raw);
        let mut problems = Vec::new();

        let classification = match parsed.classification {
            Some(c) => c,
            None => {
                match parsed.raw_label {
                    Some(label) => problems.push(format!("unrecognised classification {:?}", label)),
                    None => problems.push("missing classification".to_string()),
                }
                self.fallback_category
            }
        };

        let summary = match parsed.summary {
            Some(s) => s,
            None => {
                problems.push("missing summary".to_string());
                self.fallback_summary.clone()
            }
        };

        Verdict {
            classification,
            summary,
            degraded: if problems.is_empty() {
                None
            } else {
                Some(Degradation::Incomplete(problems.join(", ")))
            },
        }
    }

    fn fallback(&self, reason: Degradation) -> Verdict {
        Verdict {
            classification: self.fallback_category,
            summary: self.fallback_summary.clone(),
            degraded: Some(reason),
        }
    }
}

/// Build the classification prompt, truncating long content on a char boundary
pub fn build_prompt(content: &str, max_chars: usize) -> String {
    let body = match content.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}\n[... truncated]", &content[..idx]),
        None => content.to_string(),
    };

    format!(
        "Analyze the following content and provide:\n\
         1. Classification: Determine if this should be categorized as \"Needs_Action\" or \"Done\"\n\
         \x20  - Needs_Action: If the content requires follow-up, action, or processing\n\
         \x20  - Done: If the content is informational, completed, or doesn't require action\n\
         2. Summary: Generate a 2-3 line summary of the content\n\
         \n\
         Format your response as:\n\
         Classification: [Needs_Action or Done]\n\
         Summary: [2-3 line summary here]\n\
         \n\
         {}\n{}\n{}\n",
        CONTENT_BEGIN, body, CONTENT_END
    )
}

/// Fields recovered from an oracle answer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    pub classification: Option<Classification>,
    /// Label text as written, kept when it did not parse
    pub raw_label: Option<String>,
    pub summary: Option<String>,
}

/// Extract `Classification:` and `Summary:` fields from a free-form answer.
///
/// Keys match case-insensitively and may carry markdown emphasis or list
/// markers. The summary keeps continuation lines up to [`MAX_SUMMARY_LINES`],
/// stopping at a blank line or the next key. Only the first occurrence of
/// each key counts.
pub fn parse_response(raw: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    let mut summary_lines: Vec<String> = Vec::new();
    let mut summary_seen = false;
    let mut in_summary = false;

    for line in raw.lines() {
        let trimmed = line.trim().trim_start_matches(['*', '#', '-', '>', '_']).trim_start();

        if let Some(rest) = strip_key(trimmed, "classification") {
            in_summary = false;
            if parsed.raw_label.is_none() {
                let label = clean_label(rest);
                parsed.classification = parse_label(&label);
                parsed.raw_label = Some(label);
            }
            continue;
        }

        if let Some(rest) = strip_key(trimmed, "summary") {
            if summary_seen {
                in_summary = false;
                continue;
            }
            summary_seen = true;
            in_summary = true;
            if !rest.is_empty() {
                summary_lines.push(rest.to_string());
            }
            continue;
        }

        if in_summary {
            let text = line.trim();
            if text.is_empty() {
                if !summary_lines.is_empty() {
                    in_summary = false;
                }
                continue;
            }
            if summary_lines.len() < MAX_SUMMARY_LINES {
                summary_lines.push(text.to_string());
            }
        }
    }

    if !summary_lines.is_empty() {
        parsed.summary = Some(summary_lines.join("\n"));
    }

    parsed
}

/// `"Summary:** text"` -> `Some("text")` for key `summary`
fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    match line.get(..key.len()) {
        Some(head) if head.eq_ignore_ascii_case(key) => {}
        _ => return None,
    }
    let rest = line[key.len()..].trim_start_matches('*').trim_start();
    let rest = rest.strip_prefix(':')?;
    Some(rest.trim_start_matches('*').trim())
}

fn clean_label(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| matches!(c, '[' | ']' | '"' | '\'' | '*' | '`' | '.'))
        .trim()
        .to_string()
}

/// Where an explanation after the label starts
const LABEL_SEPARATORS: [&str; 8] = [" - ", " \u{2013} ", " \u{2014} ", "(", ",", ":", ";", ". "];

fn normalize_label(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}

/// Category named at the start of a label, e.g. `Needs_Action - reply by Friday`.
/// A head that names both categories is ambiguous and yields `None`.
fn parse_label(label: &str) -> Option<Classification> {
    if let Ok(c) = label.parse() {
        return Some(c);
    }

    let cut = LABEL_SEPARATORS
        .iter()
        .filter_map(|sep| label.find(sep))
        .min()
        .unwrap_or(label.len());
    let head = clean_label(&label[..cut]);
    if let Ok(c) = head.parse() {
        return Some(c);
    }

    // `Done because ...`, `Needs Action please`
    let words: Vec<&str> = head.split_whitespace().collect();
    let found = (1..=words.len().min(2))
        .find_map(|n| words[..n].join(" ").parse::<Classification>().ok())?;

    let normalized = normalize_label(&head);
    let names_both = Classification::ALL
        .iter()
        .all(|c| normalized.contains(&normalize_label(c.label())));
    (!names_both).then_some(found)
}

/// Pull the file content back out of a prompt built by [`build_prompt`]
pub(crate) fn content_of(prompt: &str) -> &str {
    let start = match prompt.find(CONTENT_BEGIN) {
        Some(idx) => idx + CONTENT_BEGIN.len(),
        None => return prompt,
    };
    let end = prompt.rfind(CONTENT_END).filter(|&e| e >= start).unwrap_or(prompt.len());
    prompt[start..end].trim_matches('\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticOracle(&'static str);

    #[async_trait]
    impl Oracle for StaticOracle {
        fn name(&self) -> &'static str {
            "static"
        }

        async fn ask(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl Oracle for FailingOracle {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn ask(&self, _prompt: &str) -> Result<String> {
            Err(TriageError::OracleUnavailable("connection refused".to_string()))
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl Oracle for SlowOracle {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn ask(&self, _prompt: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("Classification: Needs_Action\nSummary: too late".to_string())
        }
    }

    fn gateway(oracle: impl Oracle + 'static) -> ClassifierGateway {
        ClassifierGateway::new(Arc::new(oracle), &ClassifierConfig::default())
    }

    #[test]
    fn test_classification_from_str() {
        assert_eq!("Needs_Action".parse::<Classification>().unwrap(), Classification::NeedsAction);
        assert_eq!("needs action".parse::<Classification>().unwrap(), Classification::NeedsAction);
        assert_eq!("NeedsAction".parse::<Classification>().unwrap(), Classification::NeedsAction);
        assert_eq!("DONE".parse::<Classification>().unwrap(), Classification::Done);

        let err = "Archive".parse::<Classification>().unwrap_err();
        assert!(matches!(err, TriageError::InvalidCategory(ref s) if s == "Archive"));
    }

    #[test]
    fn test_parse_well_formed_response() {
        let parsed = parse_response("Classification: Needs_Action\nSummary: Call the landlord.\nDeadline is Friday.");
        assert_eq!(parsed.classification, Some(Classification::NeedsAction));
        assert_eq!(parsed.summary.as_deref(), Some("Call the landlord.\nDeadline is Friday."));
    }

    #[test]
    fn test_parse_markdown_decorated_response() {
        let raw = "Sure! Here is my analysis.\n\n**Classification:** Done\n**Summary:** Meeting notes from Tuesday.\n";
        let parsed = parse_response(raw);
        assert_eq!(parsed.classification, Some(Classification::Done));
        assert_eq!(parsed.summary.as_deref(), Some("Meeting notes from Tuesday."));
    }

    #[test]
    fn test_parse_summary_on_following_lines_is_capped() {
        let raw = "Classification: [Done]\nSummary:\none\ntwo\nthree\nfour\n";
        let parsed = parse_response(raw);
        assert_eq!(parsed.classification, Some(Classification::Done));
        assert_eq!(parsed.summary.as_deref(), Some("one\ntwo\nthree"));
    }

    #[test]
    fn test_parse_unrecognised_label_is_kept() {
        let parsed = parse_response("Classification: Needs_Action or Done\nSummary: x");
        assert_eq!(parsed.classification, None);
        assert_eq!(parsed.raw_label.as_deref(), Some("Needs_Action or Done"));
    }

    #[test]
    fn test_parse_label_with_explanation() {
        let parsed = parse_response(
            "Classification: Needs_Action - the sender asks for a reply by Friday\nSummary: Reply needed.",
        );
        assert_eq!(parsed.classification, Some(Classification::NeedsAction));
        assert_eq!(
            parsed.raw_label.as_deref(),
            Some("Needs_Action - the sender asks for a reply by Friday")
        );

        let cases = [
            ("Done (informational only)", Some(Classification::Done)),
            ("Done, nothing to follow up", Some(Classification::Done)),
            ("Needs Action because the invoice is unpaid", Some(Classification::NeedsAction)),
            ("**Needs_Action**: reply today", Some(Classification::NeedsAction)),
            ("Done. The meeting already happened", Some(Classification::Done)),
            ("Archive - keep for later", None),
            ("Needs_Action or Done", None),
        ];
        for (label, expected) in cases {
            assert_eq!(parse_label(&clean_label(label)), expected, "label {:?}", label);
        }
    }

    #[test]
    fn test_parse_garbage() {
        assert_eq!(parse_response("¯\\_(ツ)_/¯"), ParsedResponse::default());
        assert_eq!(parse_response(""), ParsedResponse::default());
    }

    #[test]
    fn test_build_prompt_truncates_on_char_boundary() {
        let content = "é".repeat(10);
        let prompt = build_prompt(&content, 4);
        assert!(prompt.contains("éééé\n[... truncated]"));
        assert_eq!(content_of(&prompt), "éééé\n[... truncated]");
    }

    #[test]
    fn test_content_of_round_trips_prompt() {
        let prompt = build_prompt("line one\nline two", 100);
        assert_eq!(content_of(&prompt), "line one\nline two");
        assert_eq!(content_of("bare text"), "bare text");
    }

    #[tokio::test]
    async fn test_gateway_well_formed() {
        let verdict = gateway(StaticOracle("Classification: Needs_Action\nSummary: Pay invoice."))
            .classify("invoice due")
            .await;
        assert_eq!(verdict.classification, Classification::NeedsAction);
        assert_eq!(verdict.summary, "Pay invoice.");
        assert!(verdict.degraded.is_none());
    }

    #[tokio::test]
    async fn test_gateway_partial_answer_uses_defaults() {
        let verdict = gateway(StaticOracle("Summary: Only a summary")).classify("x").await;
        assert_eq!(verdict.classification, Classification::Done);
        assert_eq!(verdict.summary, "Only a summary");
        assert!(matches!(verdict.degraded, Some(Degradation::Incomplete(_))));
    }

    #[tokio::test]
    async fn test_gateway_unreachable_fails_closed() {
        let verdict = gateway(FailingOracle).classify("").await;
        assert_eq!(verdict.classification, Classification::Done);
        assert_eq!(verdict.summary, "No summary generated.");
        assert!(matches!(verdict.degraded, Some(Degradation::Unreachable(_))));
    }

    #[tokio::test]
    async fn test_gateway_timeout_fails_closed() {
        let verdict = gateway(SlowOracle)
            .with_timeout(Duration::from_millis(50))
            .classify("urgent")
            .await;
        assert_eq!(verdict.classification, Classification::Done);
        assert!(matches!(verdict.degraded, Some(Degradation::Timeout(_))));
    }

    #[tokio::test]
    async fn test_gateway_configurable_fallback_category() {
        let mut config = ClassifierConfig::default();
        config.fallback_category = Classification::NeedsAction;
        let gw = ClassifierGateway::new(Arc::new(StaticOracle("no idea")), &config);

        let verdict = gw.classify("x").await;
        assert_eq!(verdict.classification, Classification::NeedsAction);
        assert!(verdict.degraded.is_some());
    }
}
