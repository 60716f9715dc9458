// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Inbox watcher: backlog drain and live notification loop
//!
//! Notifications are turned into [`WatchEvent`]s on a channel. Each arrival
//! settles on its own task (settle delay, then a size-stability check) and is
//! handed back to the single loop in [`InboxWatcher::run`], which feeds the
//! pipeline. Moves and log appends are serialized inside the pipeline, so
//! `workers > 1` only overlaps classification.

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::WatchConfig;
use crate::pipeline::{InboxFile, IntakePipeline, Outcome, RunReport};
use crate::Result;

const STABILITY_POLL: Duration = Duration::from_millis(500);

/// Events emitted by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A file was created in, or moved into, the inbox
    FileArrived(PathBuf),
    /// Watcher error
    Error(String),
}

/// Live watch on the inbox folder (non-recursive)
pub struct InboxWatcher {
    watcher: RecommendedWatcher,
    inbox: PathBuf,
    inbox_canonical: Option<PathBuf>,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    settle_delay: Duration,
    stability_timeout: Duration,
    workers: usize,
}

impl InboxWatcher {
    /// Subscribe to the inbox. Events queue up until [`run`](Self::run) is called,
    /// so subscribing before a backlog drain loses nothing that arrives meanwhile.
    pub fn new(inbox: &Path, config: &WatchConfig) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| {
                for event in convert_event(res) {
                    // Receiver gone means the loop is shutting down
                    let _ = tx.send(event);
                }
            },
            Config::default(),
        )?;

        watcher.watch(inbox, RecursiveMode::NonRecursive)?;
        info!("Watching: {:?}", inbox);

        Ok(Self {
            watcher,
            inbox: inbox.to_path_buf(),
            inbox_canonical: std::fs::canonicalize(inbox).ok(),
            event_rx: rx,
            settle_delay: config.settle_delay(),
            stability_timeout: config.stability_timeout(),
            workers: config.workers.max(1),
        })
    }

    /// Override the settle delay
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn inbox(&self) -> &Path {
        &self.inbox
    }

    /// Feed arrivals to the pipeline until `shutdown` turns true or its sender is dropped.
    ///
    /// Files still settling at shutdown are left in the inbox for the next
    /// backlog drain. Files already being processed are finished first. The
    /// OS watch is released before returning.
    pub async fn run(
        mut self,
        pipeline: Arc<IntakePipeline>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunReport> {
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel::<(InboxFile, bool)>();
        let mut pending: HashSet<PathBuf> = HashSet::new();
        let mut settling: JoinSet<()> = JoinSet::new();
        let mut in_flight: JoinSet<Outcome> = JoinSet::new();
        let slots = Arc::new(Semaphore::new(self.workers));
        let mut report = RunReport::default();

        info!("Waiting for files in {:?}", self.inbox);

        while !*shutdown.borrow() {
            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                Some(event) = self.event_rx.recv() => match event {
                    WatchEvent::FileArrived(path) => {
                        if !self.accepts(&path, &pipeline) {
                            debug!("Ignoring {:?}", path);
                            continue;
                        }
                        if !pending.insert(path.clone()) {
                            debug!("Already settling: {:?}", path);
                            continue;
                        }

                        info!("New file detected: {:?}", path);
                        let file = InboxFile::discovered(path);
                        let tx = ready_tx.clone();
                        let (settle, max_wait) = (self.settle_delay, self.stability_timeout);
                        settling.spawn(async move {
                            tokio::time::sleep(settle).await;
                            let stable = wait_for_stable(&file.path, max_wait).await;
                            let _ = tx.send((file, stable));
                        });
                    }
                    WatchEvent::Error(e) => {
                        warn!("Watch error: {}", e);
                    }
                },

                Some((file, stable)) = ready_rx.recv() => {
                    pending.remove(&file.path);
                    if !stable {
                        debug!("File disappeared while settling: {:?}", file.path);
                        continue;
                    }

                    // Waiting for a free worker must not hide a stop request
                    let permit = loop {
                        tokio::select! {
                            biased;

                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break None;
                                }
                            }

                            permit = slots.clone().acquire_owned() => break permit.ok(),
                        }
                    };
                    let Some(permit) = permit else {
                        info!("Shutdown requested, leaving {:?} in inbox", file.path);
                        break;
                    };
                    let pipeline = Arc::clone(&pipeline);
                    in_flight.spawn(async move {
                        let _permit = permit;
                        pipeline.process_file(file).await
                    });
                }

                Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                    record(&mut report, done);
                }

                Some(_) = settling.join_next(), if !settling.is_empty() => {}

                else => break,
            }
        }

        info!("Stopping watcher...");

        if !pending.is_empty() {
            info!("{} file(s) still settling, left in inbox for the next run", pending.len());
        }
        settling.abort_all();

        while let Some(done) = in_flight.join_next().await {
            record(&mut report, done);
        }

        drop(self.watcher);
        info!("Stopped watching {:?}", self.inbox);

        Ok(report)
    }

    fn accepts(&self, path: &Path, pipeline: &IntakePipeline) -> bool {
        let in_inbox = match path.parent() {
            Some(parent) if parent == self.inbox => true,
            Some(parent) => {
                self.inbox_canonical.is_some()
                    && std::fs::canonicalize(parent).ok() == self.inbox_canonical
            }
            None => false,
        };
        in_inbox && pipeline.store().is_eligible(path)
    }
}

fn record(report: &mut RunReport, done: std::result::Result<Outcome, tokio::task::JoinError>) {
    match done {
        Ok(outcome) => report.record(&outcome),
        Err(e) => {
            error!("Processing task aborted: {}", e);
            report.failed += 1;
        }
    }
}

/// Convert notify event to our event type
fn convert_event(res: notify::Result<Event>) -> Vec<WatchEvent> {
    let event = match res {
        Ok(event) => event,
        Err(e) => return vec![WatchEvent::Error(e.to_string())],
    };

    let arrived = |paths: Vec<PathBuf>| -> Vec<WatchEvent> {
        paths.into_iter().map(WatchEvent::FileArrived).collect()
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => arrived(event.paths),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => arrived(event.paths),
        // [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            arrived(event.paths.into_iter().skip(1).collect())
        }
        // Platforms that cannot tell the two sides apart; existence is checked when settling
        EventKind::Modify(ModifyKind::Name(RenameMode::Any)) => arrived(event.paths),
        _ => Vec::new(),
    }
}

/// Process every eligible file already in the inbox, in name order.
///
/// Stops early, between files, once `shutdown` turns true.
pub async fn drain_backlog(
    pipeline: &IntakePipeline,
    shutdown: &watch::Receiver<bool>,
) -> Result<RunReport> {
    info!("Checking for existing files in inbox...");
    let files = pipeline.store().inbox_files()?;
    let mut report = RunReport::default();

    if files.is_empty() {
        info!("No existing files found in inbox");
        return Ok(report);
    }

    info!("Found {} existing file(s) in inbox", files.len());

    for path in files {
        if *shutdown.borrow() {
            info!("Shutdown requested, {} backlog file(s) processed", report.total());
            break;
        }
        let outcome = pipeline.process(&path).await;
        report.record(&outcome);
    }

    Ok(report)
}

/// Wait for file to be stable (not being written). Returns false if it vanished.
pub async fn wait_for_stable(path: &Path, max_wait: Duration) -> bool {
    let start = Instant::now();

    let mut last_size = match tokio::fs::metadata(path).await {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        tokio::time::sleep(STABILITY_POLL).await;

        // Check if file still exists
        let current_size = match tokio::fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        // If size hasn't changed, file is stable
        if current_size == last_size {
            return true;
        }

        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true; // Proceed anyway
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}

/// Shutdown channel wired to Ctrl+C and SIGTERM
pub fn shutdown_on_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);

    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for Ctrl+C: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = terminate => info!("Received SIGTERM, shutting down..."),
        }

        let _ = tx.send(true);
        // Keep the sender alive so receivers see `true`, not a closed channel
        tx.closed().await;
    });

    rx
}
