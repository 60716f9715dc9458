// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for vault-triage

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::Classification;

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// Vault root (overridden by `--vault-path`)
    #[serde(default = "default_vault_root")]
    pub vault_root: PathBuf,

    /// Vault folder and log document names
    #[serde(default)]
    pub vault: VaultConfig,

    /// Watcher timing and worker settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Classification oracle settings
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Processing journal settings
    #[serde(default)]
    pub journal: JournalConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VaultConfig {
    #[serde(default = "default_inbox_dir")]
    pub inbox_dir: String,
    #[serde(default = "default_needs_action_dir")]
    pub needs_action_dir: String,
    #[serde(default = "default_done_dir")]
    pub done_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
    /// Extensions (without dot) eligible for processing
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Written once when the log document is first created
    #[serde(default = "default_log_header")]
    pub log_header: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WatchConfig {
    /// Pause after a notification before the file is touched
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Upper bound on waiting for a file to stop growing
    #[serde(default = "default_stability_timeout")]
    pub stability_timeout_secs: u64,
    /// Files classified in parallel; moves and log appends stay serialized
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// External process, e.g. `qwen-cli --prompt <prompt>`
    Command,
    /// Local Ollama server
    Ollama,
    /// Deterministic keyword matcher
    Keyword,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ClassifierConfig {
    #[serde(default = "default_backend")]
    pub backend: Backend,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Category used when the oracle output is inconclusive
    #[serde(default = "default_fallback_category")]
    pub fallback_category: Classification,
    #[serde(default = "default_fallback_summary")]
    pub fallback_summary: String,
    /// Content beyond this many characters is not sent to the oracle
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CommandConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// `{prompt}` is replaced by the prompt; without it the prompt is piped to stdin
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OllamaConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct JournalConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Relative paths resolve against the vault root
    #[serde(default = "default_journal_file")]
    pub file: PathBuf,
}

/// Smallest settle delay accepted from configuration
pub const MIN_SETTLE_DELAY_MS: u64 = 1000;

// Default value functions
fn default_vault_root() -> PathBuf { PathBuf::from("./Obsidian_Vault") }
fn default_inbox_dir() -> String { "Inbox".to_string() }
fn default_needs_action_dir() -> String { "Needs_Action".to_string() }
fn default_done_dir() -> String { "Done".to_string() }
fn default_log_file() -> String { "Dashboard.md".to_string() }
fn default_extensions() -> Vec<String> { vec!["md".to_string(), "txt".to_string()] }
fn default_settle_delay_ms() -> u64 { MIN_SETTLE_DELAY_MS }
fn default_stability_timeout() -> u64 { 10 }
fn default_workers() -> usize { 1 }
fn default_backend() -> Backend { Backend::Command }
fn default_timeout() -> u64 { 30 }
fn default_fallback_category() -> Classification { Classification::Done }
fn default_fallback_summary() -> String { "No summary generated.".to_string() }
fn default_max_content_chars() -> usize { 8000 }
fn default_program() -> String { "qwen-cli".to_string() }
fn default_args() -> Vec<String> { vec!["--prompt".to_string(), "{prompt}".to_string()] }
fn default_ollama_url() -> String { "http://localhost:11434".to_string() }
fn default_ollama_model() -> String { "llama3.2:3b".to_string() }
fn default_true() -> bool { true }
fn default_journal_file() -> PathBuf { PathBuf::from(".triage_journal.jsonl") }

fn default_log_header() -> String {
    "# Dashboard\n\n## Summary of Processed Files\n\n\
     This dashboard contains summaries of files processed by the AI automation system.\n"
        .to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            vault_root: default_vault_root(),
            vault: VaultConfig::default(),
            watch: WatchConfig::default(),
            classifier: ClassifierConfig::default(),
            journal: JournalConfig::default(),
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            inbox_dir: default_inbox_dir(),
            needs_action_dir: default_needs_action_dir(),
            done_dir: default_done_dir(),
            log_file: default_log_file(),
            extensions: default_extensions(),
            log_header: default_log_header(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            stability_timeout_secs: default_stability_timeout(),
            workers: default_workers(),
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: CommandConfig::default(),
            ollama: OllamaConfig::default(),
            timeout_secs: default_timeout(),
            fallback_category: default_fallback_category(),
            fallback_summary: default_fallback_summary(),
            max_content_chars: default_max_content_chars(),
        }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
        }
    }
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            file: default_journal_file(),
        }
    }
}

impl WatchConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn stability_timeout(&self) -> Duration {
        Duration::from_secs(self.stability_timeout_secs)
    }
}

impl ClassifierConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::TriageError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        let names = [
            &self.vault.inbox_dir,
            &self.vault.needs_action_dir,
            &self.vault.done_dir,
            &self.vault.log_file,
        ];
        for name in names {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(crate::TriageError::Config(format!(
                    "Vault entry name must be a single path component: {:?}", name
                )));
            }
        }

        let folders = [&self.vault.inbox_dir, &self.vault.needs_action_dir, &self.vault.done_dir];
        if folders[0] == folders[1] || folders[0] == folders[2] || folders[1] == folders[2] {
            return Err(crate::TriageError::Config(
                "Inbox and category folders must be distinct".to_string(),
            ));
        }

        if self.vault.extensions.is_empty() {
            return Err(crate::TriageError::Config("No eligible extensions configured".to_string()));
        }

        if self.watch.settle_delay_ms < MIN_SETTLE_DELAY_MS {
            return Err(crate::TriageError::Config(format!(
                "settle_delay_ms must be at least {} (got {})",
                MIN_SETTLE_DELAY_MS, self.watch.settle_delay_ms
            )));
        }

        if !(1..=16).contains(&self.watch.workers) {
            return Err(crate::TriageError::Config(format!(
                "workers must be between 1 and 16 (got {})", self.watch.workers
            )));
        }

        if self.classifier.timeout_secs == 0 {
            return Err(crate::TriageError::Config("classifier timeout must be non-zero".to_string()));
        }

        if self.classifier.backend == Backend::Command && self.classifier.command.program.is_empty() {
            return Err(crate::TriageError::Config("classifier command program is empty".to_string()));
        }

        Ok(())
    }

    /// Journal location, resolved against the vault root
    pub fn journal_path(&self) -> PathBuf {
        if self.journal.file.is_absolute() {
            self.journal.file.clone()
        } else {
            self.vault_root.join(&self.journal.file)
        }
    }
}
