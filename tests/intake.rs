// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! End-to-end intake tests against a temporary vault

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio_test::assert_ok;

use vault_triage::classifier::{ClassifierGateway, KeywordOracle, Oracle};
use vault_triage::config::{AppConfig, ClassifierConfig, WatchConfig};
use vault_triage::journal::{Journal, JournalStatus};
use vault_triage::pipeline::Stage;
use vault_triage::store::VaultStore;
use vault_triage::watcher::{drain_backlog, InboxWatcher};
use vault_triage::{Classification, IntakePipeline, Outcome, Result, TriageError};

/// Answers every prompt with the same text
struct CannedOracle {
    answer: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl CannedOracle {
    fn new(answer: &str) -> Self {
        Self::slow(answer, Duration::ZERO)
    }

    /// Takes `delay` to answer each prompt
    fn slow(answer: &str, delay: Duration) -> Self {
        Self {
            answer: answer.to_string(),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Oracle for CannedOracle {
    fn name(&self) -> &'static str {
        "canned"
    }

    async fn ask(&self, _prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.answer.clone())
    }
}

/// Never answers within any sensible timeout
struct HangingOracle;

#[async_trait]
impl Oracle for HangingOracle {
    fn name(&self) -> &'static str {
        "hanging"
    }

    async fn ask(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

struct Vault {
    dir: TempDir,
    config: AppConfig,
    store: Arc<VaultStore>,
}

impl Vault {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.vault_root = dir.path().to_path_buf();
        let store = Arc::new(VaultStore::open(dir.path(), &config.vault));
        assert_ok!(store.ensure_layout());
        Self { dir, config, store }
    }

    fn inbox(&self, name: &str) -> std::path::PathBuf {
        self.store.layout().inbox.join(name)
    }

    fn log(&self) -> String {
        fs::read_to_string(&self.store.layout().log).unwrap()
    }

    fn pipeline(&self, oracle: Arc<dyn Oracle>) -> IntakePipeline {
        self.pipeline_with_timeout(oracle, Duration::from_millis(200))
    }

    fn pipeline_with_timeout(&self, oracle: Arc<dyn Oracle>, timeout: Duration) -> IntakePipeline {
        let gateway = ClassifierGateway::new(oracle, &self.config.classifier).with_timeout(timeout);
        IntakePipeline::new(Arc::clone(&self.store), Arc::new(gateway))
    }

    fn journaled(&self, oracle: Arc<dyn Oracle>) -> (IntakePipeline, Arc<Journal>) {
        let journal = Arc::new(Journal::new(self.config.journal_path()));
        (self.pipeline(oracle).with_journal(Arc::clone(&journal)), journal)
    }
}

fn keyword() -> Arc<dyn Oracle> {
    Arc::new(KeywordOracle::new())
}

fn idle_shutdown() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    // Keep the sender alive for the duration of the test
    std::mem::forget(tx);
    rx
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("Timed out waiting for {}", what);
}

#[tokio::test]
async fn test_report_is_filed_and_logged() {
    let vault = Vault::new();
    let oracle = Arc::new(CannedOracle::new(
        "Classification: Needs_Action\nSummary: Quarterly report awaiting review.",
    ));
    let pipeline = vault.pipeline(oracle);

    let source = vault.inbox("report.txt");
    fs::write(&source, "Please review the Q3 numbers").unwrap();

    let outcome = pipeline.process(&source).await;

    assert!(outcome.is_completed());
    assert!(!source.exists());
    let moved = vault.store.layout().needs_action.join("report.txt");
    assert_eq!(fs::read_to_string(&moved).unwrap(), "Please review the Q3 numbers");

    let log = vault.log();
    assert!(log.starts_with("# Dashboard"));
    assert!(log.contains("### report.txt"));
    assert!(log.contains("Quarterly report awaiting review."));
    assert!(log.contains("_Classification: Needs_Action"));
}

#[tokio::test]
async fn test_log_only_grows() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(keyword());

    let mut previous = vault.log();
    for i in 0..5 {
        let path = vault.inbox(&format!("note-{}.md", i));
        fs::write(&path, format!("note number {}", i)).unwrap();
        assert!(pipeline.process(&path).await.is_completed());

        let current = vault.log();
        assert!(current.len() > previous.len());
        assert!(current.starts_with(&previous), "earlier log bytes changed");
        previous = current;
    }

    assert_eq!(previous.matches("\n### ").count(), 5);
}

#[tokio::test]
async fn test_duplicate_notification_is_harmless() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(keyword());

    let path = vault.inbox("twice.md");
    fs::write(&path, "todo: call the plumber").unwrap();

    let first = pipeline.process(&path).await;
    let second = pipeline.process(&path).await;

    assert!(first.is_completed());
    assert!(matches!(second, Outcome::Duplicate));
    assert_eq!(vault.log().matches("### twice.md").count(), 1);
}

#[tokio::test]
async fn test_garbage_answer_falls_back_to_defaults() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(Arc::new(CannedOracle::new("I am not sure, sorry!")));

    let path = vault.inbox("vague.md");
    fs::write(&path, "something").unwrap();

    match pipeline.process(&path).await {
        Outcome::Completed { classification, degraded, .. } => {
            assert_eq!(classification, Classification::Done);
            assert!(degraded.is_some());
        }
        other => panic!("Expected Completed, got {:?}", other),
    }
    assert!(vault.store.layout().done.join("vague.md").exists());
    assert!(vault.log().contains("No summary generated."));
}

#[tokio::test]
async fn test_oracle_timeout_still_files() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(Arc::new(HangingOracle));

    let path = vault.inbox("slow.md");
    fs::write(&path, "urgent: reply").unwrap();

    let outcome = pipeline.process(&path).await;

    assert!(outcome.is_completed());
    assert!(vault.store.layout().done.join("slow.md").exists());
    assert!(vault.log().contains("### slow.md"));
}

#[tokio::test]
async fn test_fallback_category_is_configurable() {
    let mut vault = Vault::new();
    vault.config.classifier = ClassifierConfig {
        fallback_category: Classification::NeedsAction,
        ..ClassifierConfig::default()
    };
    let pipeline = vault.pipeline(Arc::new(CannedOracle::new("")));

    let path = vault.inbox("unknown.md");
    fs::write(&path, "?").unwrap();

    assert!(pipeline.process(&path).await.is_completed());
    assert!(vault.store.layout().needs_action.join("unknown.md").exists());
}

#[tokio::test]
async fn test_unreadable_file_does_not_block_others() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(keyword());

    let bad = vault.inbox("a-binary.md");
    fs::write(&bad, [0xc3, 0x28, 0xa0, 0xa1]).unwrap();
    let good = vault.inbox("b-plain.md");
    fs::write(&good, "meeting notes").unwrap();

    let report = assert_ok!(drain_backlog(&pipeline, &idle_shutdown()).await);

    assert_eq!(report.failed, 1);
    assert_eq!(report.completed, 1);
    assert!(bad.exists());
    assert!(!good.exists());
    assert!(!vault.log().contains("a-binary.md"));
}

#[tokio::test]
async fn test_io_read_error_leaves_entry_and_continues() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(keyword());

    // Opening succeeds but reading fails, like an unreadable file
    let bad = vault.inbox("folder.md");
    fs::create_dir(&bad).unwrap();
    let good = vault.inbox("after.md");
    fs::write(&good, "still processed").unwrap();

    match pipeline.process(&bad).await {
        Outcome::Failed { stage, error } => {
            assert_eq!(stage, Stage::Reading);
            assert!(matches!(error, TriageError::Read { .. }));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert!(bad.is_dir());

    assert!(pipeline.process(&good).await.is_completed());
    assert!(!vault.log().contains("folder.md"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_permission_denied_is_read_error() {
    use std::os::unix::fs::PermissionsExt;

    let vault = Vault::new();
    let pipeline = vault.pipeline(keyword());

    let locked = vault.inbox("locked.md");
    fs::write(&locked, "secret").unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Running with privileges that ignore file modes
        return;
    }

    match pipeline.process(&locked).await {
        Outcome::Failed { stage, error } => {
            assert_eq!(stage, Stage::Reading);
            assert!(matches!(error, TriageError::Read { .. }));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert!(locked.exists());

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
}

#[tokio::test]
async fn test_log_failure_is_partial_and_journaled() {
    let vault = Vault::new();
    let (pipeline, journal) = vault.journaled(keyword());

    // A directory where the log file should be makes every append fail
    fs::remove_file(&vault.store.layout().log).unwrap();
    fs::create_dir(&vault.store.layout().log).unwrap();

    let path = vault.inbox("orphan.md");
    fs::write(&path, "plain note").unwrap();

    let outcome = pipeline.process(&path).await;

    assert!(outcome.is_partial());
    assert_eq!(outcome.stage(), Stage::Failed);
    match &outcome {
        Outcome::Failed { stage, error } => {
            assert_eq!(*stage, Stage::Logging);
            assert!(matches!(error, TriageError::LogWrite { .. }));
        }
        other => panic!("Expected Failed, got {:?}", other),
    }
    assert!(vault.store.layout().done.join("orphan.md").exists());

    let unlogged = assert_ok!(journal.unlogged());
    assert_eq!(unlogged.len(), 1);
    assert_eq!(unlogged[0].file_name, "orphan.md");
}

#[tokio::test]
async fn test_journal_records_each_outcome() {
    let vault = Vault::new();
    let (pipeline, journal) = vault.journaled(keyword());

    let path = vault.inbox("todo.md");
    fs::write(&path, "todo: water plants").unwrap();
    pipeline.process(&path).await;
    pipeline.process(&path).await;

    let entries = assert_ok!(journal.read_all());
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].status, JournalStatus::Completed);
    assert_eq!(entries[0].classification, Some(Classification::NeedsAction));
    assert!(entries[0].content_hash.is_some());
    assert_eq!(entries[1].status, JournalStatus::Duplicate);
}

#[tokio::test]
async fn test_colliding_names_keep_both_files() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(keyword());

    fs::write(vault.store.layout().done.join("same.md"), "older").unwrap();
    let path = vault.inbox("same.md");
    fs::write(&path, "newer").unwrap();

    let destination = match pipeline.process(&path).await {
        Outcome::Completed { destination, .. } => destination,
        other => panic!("Expected Completed, got {:?}", other),
    };
    let moved_name = destination.file_name().unwrap().to_string_lossy().into_owned();
    assert_ne!(moved_name, "same.md");
    assert_eq!(fs::read_to_string(&destination).unwrap(), "newer");
    assert_eq!(
        fs::read_to_string(vault.store.layout().done.join("same.md")).unwrap(),
        "older"
    );

    // The entry names the file where it actually landed
    let log = vault.log();
    assert!(log.contains(&format!("### {} (renamed from same.md)", moved_name)));
    assert!(!log.contains("### same.md\n"));
}

#[tokio::test]
async fn test_ineligible_files_are_left_alone() {
    let vault = Vault::new();
    let pipeline = vault.pipeline(keyword());

    fs::write(vault.inbox(".hidden.md"), "x").unwrap();
    fs::write(vault.inbox("draft.md.tmp"), "x").unwrap();
    fs::write(vault.inbox("picture.png"), "x").unwrap();

    let report = assert_ok!(drain_backlog(&pipeline, &idle_shutdown()).await);

    assert_eq!(report.total(), 0);
    assert!(vault.inbox("picture.png").exists());
}

#[tokio::test]
async fn test_second_instance_is_locked_out() {
    let vault = Vault::new();
    let _lock = assert_ok!(vault.store.acquire_lock());

    match vault.store.acquire_lock() {
        Err(TriageError::VaultLocked(_)) => {}
        other => panic!("Expected VaultLocked, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn test_watcher_files_new_arrivals() {
    let vault = Vault::new();
    let pipeline = Arc::new(vault.pipeline(keyword()));
    let watch_config = WatchConfig {
        workers: 2,
        ..WatchConfig::default()
    };

    let watcher = assert_ok!(InboxWatcher::new(&vault.store.layout().inbox, &watch_config))
        .with_settle_delay(Duration::from_millis(100));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(watcher.run(Arc::clone(&pipeline), shutdown_rx));

    fs::write(vault.inbox("live-1.md"), "follow up with the landlord").unwrap();
    fs::write(vault.inbox("live-2.md"), "read this later").unwrap();

    let needs_action = vault.store.layout().needs_action.join("live-1.md");
    let done = vault.store.layout().done.join("live-2.md");
    let log_path = vault.store.layout().log.clone();
    eventually("both files to be filed and logged", || {
        needs_action.exists()
            && done.exists()
            && fs::read_to_string(&log_path)
                .map(|log| log.contains("### live-1.md") && log.contains("### live-2.md"))
                .unwrap_or(false)
    })
    .await;

    shutdown_tx.send(true).unwrap();
    let report = assert_ok!(handle.await.unwrap());
    assert_eq!(report.completed, 2);
    assert!(!report.has_failures());
}

#[tokio::test]
async fn test_shutdown_while_workers_busy_starts_nothing_new() {
    let vault = Vault::new();
    let oracle = Arc::new(CannedOracle::slow(
        "Classification: Done\nSummary: Slowly classified.",
        Duration::from_millis(1500),
    ));
    let pipeline = Arc::new(vault.pipeline_with_timeout(oracle.clone(), Duration::from_secs(30)));
    let watch_config = WatchConfig {
        workers: 1,
        ..WatchConfig::default()
    };

    let watcher = assert_ok!(InboxWatcher::new(&vault.store.layout().inbox, &watch_config))
        .with_settle_delay(Duration::from_millis(100));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(watcher.run(Arc::clone(&pipeline), shutdown_rx));

    for i in 0..3 {
        fs::write(vault.inbox(&format!("queued-{}.md", i)), format!("queued note {}", i)).unwrap();
    }

    // One file is with the oracle; give the others time to settle and queue up
    eventually("the first file to reach the oracle", || oracle.calls() >= 1).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    shutdown_tx.send(true).unwrap();
    let report = assert_ok!(
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap()
    );

    assert_eq!(report.completed, 1);
    assert_eq!(oracle.calls(), 1);
    let left = assert_ok!(vault.store.inbox_files());
    assert_eq!(left.len(), 2);
}

#[tokio::test]
async fn test_watcher_stops_on_shutdown() {
    let vault = Vault::new();
    let pipeline = Arc::new(vault.pipeline(keyword()));

    let watcher = assert_ok!(InboxWatcher::new(&vault.store.layout().inbox, &WatchConfig::default()));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(watcher.run(pipeline, shutdown_rx));

    shutdown_tx.send(true).unwrap();
    let report = assert_ok!(
        tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap()
    );
    assert_eq!(report.total(), 0);
}

#[tokio::test]
async fn test_journal_file_lives_in_vault() {
    let vault = Vault::new();
    assert!(vault.config.journal_path().starts_with(vault.dir.path()));
    assert!(!Path::new(&vault.config.journal_path()).starts_with(&vault.store.layout().inbox));
}
