// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Processing journal: one JSON line per file outcome, for reconciliation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::classifier::Classification;
use crate::Result;

/// How processing of one file ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    /// Moved and logged
    Completed,
    /// Already gone from the inbox; nothing written
    Duplicate,
    /// Left in the inbox
    Failed,
    /// Moved but the log entry is missing
    Unlogged,
    /// An unlogged file was fixed up by hand
    Reconciled,
}

/// A single journal record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub status: JournalStatus,
    pub file_name: String,
    pub source: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// blake3 of the content that was classified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Id of the unlogged entry this record settles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconciles: Option<String>,
}

impl JournalEntry {
    pub fn new(status: JournalStatus, source: &Path) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            status,
            file_name: source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source: source.to_path_buf(),
            destination: None,
            classification: None,
            content_hash: None,
            degraded: None,
            error_kind: None,
            error: None,
            reconciles: None,
        }
    }
}

/// Append-only JSONL journal
pub struct Journal {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an entry to the journal
    pub fn append(&self, entry: &JournalEntry) -> Result<()> {
        let json = serde_json::to_string(entry)?;
        let _guard = self.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }

    /// Read all journal entries
    pub fn read_all(&self) -> Result<Vec<JournalEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);

        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!("Failed to parse journal entry: {}", e);
                }
            }
        }

        Ok(entries)
    }

    /// Get the most recent N entries (newest first)
    pub fn get_recent(&self, count: usize) -> Result<Vec<JournalEntry>> {
        let mut entries = self.read_all()?;
        entries.reverse();
        entries.truncate(count);
        Ok(entries)
    }

    /// Files that were moved without a log entry and not reconciled since
    pub fn unlogged(&self) -> Result<Vec<JournalEntry>> {
        let entries = self.read_all()?;
        let settled_later = |e: &JournalEntry, idx: usize| {
            entries[idx + 1..].iter().any(|later| match later.status {
                JournalStatus::Reconciled => later.reconciles.as_deref() == Some(e.id.as_str()),
                JournalStatus::Completed => later.destination == e.destination,
                _ => false,
            })
        };

        Ok(entries
            .iter()
            .enumerate()
            .filter(|(idx, e)| e.status == JournalStatus::Unlogged && !settled_later(e, *idx))
            .map(|(_, e)| e.clone())
            .collect())
    }

    /// Mark unlogged entries as fixed. With `file_name`, only entries for that
    /// file (original or destination name) are marked; otherwise all of them.
    pub fn reconcile(&self, file_name: Option<&str>) -> Result<Vec<JournalEntry>> {
        let matches = |e: &JournalEntry| match file_name {
            None => true,
            Some(name) => {
                e.file_name == name
                    || e.destination
                        .as_deref()
                        .and_then(Path::file_name)
                        .is_some_and(|n| n == name)
            }
        };

        let open: Vec<JournalEntry> = self.unlogged()?.into_iter().filter(|e| matches(e)).collect();
        for entry in &open {
            let mut marker = JournalEntry::new(JournalStatus::Reconciled, &entry.source);
            marker.destination = entry.destination.clone();
            marker.classification = entry.classification;
            marker.reconciles = Some(entry.id.clone());
            self.append(&marker)?;
        }

        Ok(open)
    }

    /// Get journal file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
