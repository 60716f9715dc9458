// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Intake pipeline: read, classify, move and log a single inbox file
//!
//! Each file walks `Discovered -> Reading -> Classifying -> Moving -> Logging
//! -> Completed`. Any step may end in `Failed`; the error stays with that
//! file and is reported as an [`Outcome`], never returned to the caller.

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::classifier::{Classification, ClassifierGateway, Degradation, Verdict};
use crate::journal::{Journal, JournalEntry, JournalStatus};
use crate::store::VaultStore;
use crate::TriageError;

/// A file waiting in the inbox
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboxFile {
    pub path: PathBuf,
    pub discovered_at: DateTime<Utc>,
}

impl InboxFile {
    pub fn discovered(path: PathBuf) -> Self {
        Self {
            path,
            discovered_at: Utc::now(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Processing state of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Discovered,
    Reading,
    Classifying,
    Moving,
    Logging,
    Completed,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Discovered => "discovered",
            Stage::Reading => "reading",
            Stage::Classifying => "classifying",
            Stage::Moving => "moving",
            Stage::Logging => "logging",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Terminal result of processing one file
#[derive(Debug)]
pub enum Outcome {
    /// Moved and logged
    Completed {
        destination: PathBuf,
        classification: Classification,
        degraded: Option<Degradation>,
    },
    /// File was no longer in the inbox; treated as already handled
    Duplicate,
    /// Stopped at `stage`. Unless `stage` is `Logging`, the file is still in the inbox.
    Failed { stage: Stage, error: TriageError },
}

impl Outcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Outcome::Completed { .. })
    }

    /// Moved but not logged; needs manual reconciliation
    pub fn is_partial(&self) -> bool {
        matches!(self, Outcome::Failed { stage: Stage::Logging, .. })
    }

    pub fn stage(&self) -> Stage {
        match self {
            Outcome::Completed { .. } | Outcome::Duplicate => Stage::Completed,
            Outcome::Failed { .. } => Stage::Failed,
        }
    }
}

/// Tally of outcomes over a backlog drain or a watch session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub completed: usize,
    /// Completed with fallback classification or summary
    pub degraded: usize,
    pub duplicates: usize,
    pub failed: usize,
    /// Moved but not logged
    pub unlogged: usize,
}

impl RunReport {
    pub fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Completed { degraded, .. } => {
                self.completed += 1;
                if degraded.is_some() {
                    self.degraded += 1;
                }
            }
            Outcome::Duplicate => self.duplicates += 1,
            Outcome::Failed { .. } if outcome.is_partial() => self.unlogged += 1,
            Outcome::Failed { .. } => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: RunReport) {
        self.completed += other.completed;
        self.degraded += other.degraded;
        self.duplicates += other.duplicates;
        self.failed += other.failed;
        self.unlogged += other.unlogged;
    }

    pub fn total(&self) -> usize {
        self.completed + self.duplicates + self.failed + self.unlogged
    }

    /// Anything an operator has to look at
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.unlogged > 0
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} completed ({} degraded), {} duplicates, {} failed, {} moved but unlogged",
            self.completed, self.degraded, self.duplicates, self.failed, self.unlogged
        )
    }
}

/// Coordinates the classifier gateway and the vault store for one file at a time
pub struct IntakePipeline {
    store: Arc<VaultStore>,
    gateway: Arc<ClassifierGateway>,
    journal: Option<Arc<Journal>>,
    /// Serializes move + log append when several files are in flight
    commit_lock: Mutex<()>,
}

impl IntakePipeline {
    pub fn new(store: Arc<VaultStore>, gateway: Arc<ClassifierGateway>) -> Self {
        Self {
            store,
            gateway,
            journal: None,
            commit_lock: Mutex::new(()),
        }
    }

    /// Record every outcome in a journal
    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn store(&self) -> &VaultStore {
        &self.store
    }

    pub fn gateway(&self) -> &ClassifierGateway {
        &self.gateway
    }

    /// Process a path as a freshly discovered file
    pub async fn process(&self, path: &Path) -> Outcome {
        self.process_file(InboxFile::discovered(path.to_path_buf())).await
    }

    /// Run one file through the pipeline. Never panics on I/O and never returns an error.
    pub async fn process_file(&self, file: InboxFile) -> Outcome {
        let span = info_span!("intake", file = %file.file_name());
        async move {
            let mut record = JournalEntry::new(JournalStatus::Failed, &file.path);
            let outcome = self.run(&file, &mut record).await;
            self.report(&file, &outcome);
            self.record_outcome(record, &outcome);
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(&self, file: &InboxFile, record: &mut JournalEntry) -> Outcome {
        let waited = Utc::now().signed_duration_since(file.discovered_at);
        debug!(stage = %Stage::Discovered, waited_ms = waited.num_milliseconds(), "Picked up");

        debug!(stage = %Stage::Reading, "Reading content");
        let content = match read_text(&file.path).await {
            Ok(Some((content, hash))) => {
                record.content_hash = Some(hash);
                content
            }
            Ok(None) => return Outcome::Duplicate,
            Err(error) => return Outcome::Failed { stage: Stage::Reading, error },
        };

        debug!(stage = %Stage::Classifying, oracle = self.gateway.oracle_name(), "Classifying");
        let Verdict { classification, summary, degraded } = self.gateway.classify(&content).await;
        record.classification = Some(classification);
        if let Some(reason) = &degraded {
            record.degraded = Some(reason.to_string());
            warn!(
                kind = "classification_degraded",
                %reason,
                "Classifier inconclusive, filing as {}", classification
            );
        }
        info!("Classified as {}", classification);

        let _commit = self.commit_lock.lock().await;

        debug!(stage = %Stage::Moving, "Moving");
        let destination = match self.store.move_to_category(&file.path, classification) {
            Ok(dest) => dest,
            Err(TriageError::SourceMissing(_)) => return Outcome::Duplicate,
            Err(error) => return Outcome::Failed { stage: Stage::Moving, error },
        };
        record.destination = Some(destination.clone());

        debug!(stage = %Stage::Logging, "Appending log entry");
        let entry_name = logged_name(&file.file_name(), &destination);
        if let Err(error) = self.store.append_log_entry(&entry_name, &summary, classification) {
            return Outcome::Failed { stage: Stage::Logging, error };
        }

        Outcome::Completed {
            destination,
            classification,
            degraded,
        }
    }

    fn report(&self, file: &InboxFile, outcome: &Outcome) {
        match outcome {
            Outcome::Completed { destination, .. } => {
                info!(stage = %Stage::Completed, "Filed at {:?}", destination);
            }
            Outcome::Duplicate => {
                info!(
                    stage = %Stage::Completed,
                    kind = "source_missing",
                    "No longer in inbox, already handled"
                );
            }
            Outcome::Failed { stage, error } if outcome.is_partial() => {
                error!(
                    stage = %stage,
                    kind = %error.kind(),
                    path = ?file.path,
                    "Moved but NOT logged, reconcile manually: {}", error
                );
            }
            Outcome::Failed { stage, error } => {
                error!(
                    stage = %stage,
                    kind = %error.kind(),
                    path = ?file.path,
                    "Left in inbox: {}", error
                );
            }
        }
    }

    fn record_outcome(&self, mut record: JournalEntry, outcome: &Outcome) {
        let Some(journal) = &self.journal else {
            return;
        };

        record.status = match outcome {
            Outcome::Completed { .. } => JournalStatus::Completed,
            Outcome::Duplicate => JournalStatus::Duplicate,
            Outcome::Failed { .. } if outcome.is_partial() => JournalStatus::Unlogged,
            Outcome::Failed { .. } => JournalStatus::Failed,
        };
        if let Outcome::Failed { error, .. } = outcome {
            record.error_kind = Some(error.kind().to_string());
            record.error = Some(error.to_string());
        }

        if let Err(e) = journal.append(&record) {
            warn!("Failed to write journal entry to {:?}: {}", journal.path(), e);
        }
    }
}

/// Name shown in the log; mentions the original when a collision renamed the file
fn logged_name(original: &str, destination: &Path) -> String {
    match destination.file_name().map(|n| n.to_string_lossy()) {
        Some(moved) if moved != original => format!("{} (renamed from {})", moved, original),
        _ => original.to_string(),
    }
}

/// Read a file as UTF-8 text. `Ok(None)` means the file is already gone.
async fn read_text(path: &Path) -> crate::Result<Option<(String, String)>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(TriageError::Read {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    };

    let hash = blake3::hash(&bytes).to_hex().to_string();

    let mut content = String::from_utf8(bytes).map_err(|e| TriageError::Read {
        path: path.to_path_buf(),
        reason: format!("not UTF-8 text ({})", e.utf8_error()),
    })?;
    if content.starts_with('\u{feff}') {
        content.remove(0);
    }

    Ok(Some((content, hash)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::KeywordOracle;
    use crate::config::{ClassifierConfig, VaultConfig};
    use std::fs;
    use tempfile::TempDir;

    fn pipeline() -> (TempDir, IntakePipeline) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(VaultStore::open(dir.path(), &VaultConfig::default()));
        store.ensure_layout().unwrap();
        let gateway = Arc::new(ClassifierGateway::new(
            Arc::new(KeywordOracle::new()),
            &ClassifierConfig::default(),
        ));
        (dir, IntakePipeline::new(store, gateway))
    }

    #[tokio::test]
    async fn test_completed() {
        let (_dir, pipeline) = pipeline();
        let path = pipeline.store().layout().inbox.join("report.txt");
        fs::write(&path, "needs follow up urgently").unwrap();

        let outcome = pipeline.process(&path).await;

        match outcome {
            Outcome::Completed { destination, classification, degraded } => {
                assert_eq!(classification, Classification::NeedsAction);
                assert_eq!(destination, pipeline.store().layout().needs_action.join("report.txt"));
                assert!(degraded.is_none());
            }
            other => panic!("Expected Completed, got {:?}", other),
        }
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_duplicate() {
        let (_dir, pipeline) = pipeline();
        let path = pipeline.store().layout().inbox.join("ghost.md");

        let outcome = pipeline.process(&path).await;
        assert!(matches!(outcome, Outcome::Duplicate));
        assert_eq!(outcome.stage(), Stage::Completed);
    }

    #[tokio::test]
    async fn test_binary_file_stays_in_inbox() {
        let (_dir, pipeline) = pipeline();
        let path = pipeline.store().layout().inbox.join("blob.md");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x80]).unwrap();

        let outcome = pipeline.process(&path).await;

        match outcome {
            Outcome::Failed { stage, error } => {
                assert_eq!(stage, Stage::Reading);
                assert!(matches!(error, TriageError::Read { .. }));
            }
            other => panic!("Expected Failed, got {:?}", other),
        }
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_empty_file_is_processed() {
        let (_dir, pipeline) = pipeline();
        let path = pipeline.store().layout().inbox.join("empty.md");
        fs::write(&path, "").unwrap();

        let outcome = pipeline.process(&path).await;
        assert!(outcome.is_completed());
        assert!(pipeline.store().layout().done.join("empty.md").exists());
    }

    #[tokio::test]
    async fn test_bom_is_stripped() {
        let content = read_text_for_test("\u{feff}hello").await;
        assert_eq!(content, "hello");
    }

    async fn read_text_for_test(text: &str) -> String {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bom.md");
        fs::write(&path, text).unwrap();
        read_text(&path).await.unwrap().unwrap().0
    }

    #[test]
    fn test_run_report() {
        let mut report = RunReport::default();
        report.record(&Outcome::Duplicate);
        report.record(&Outcome::Completed {
            destination: PathBuf::from("/v/Done/a.md"),
            classification: Classification::Done,
            degraded: Some(Degradation::Timeout(std::time::Duration::from_secs(30))),
        });
        report.record(&Outcome::Failed {
            stage: Stage::Logging,
            error: TriageError::LogWrite {
                filename: "b.md".to_string(),
                source: std::io::Error::other("disk full"),
            },
        });

        assert_eq!(report.completed, 1);
        assert_eq!(report.degraded, 1);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.unlogged, 1);
        assert_eq!(report.total(), 3);
        assert!(report.has_failures());
    }
}
