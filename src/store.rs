// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Vault store: on-disk layout, file moves and the append-only log document

use chrono::{DateTime, Local};
use glob::{glob_with, MatchOptions, Pattern};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::classifier::Classification;
use crate::config::VaultConfig;
use crate::{Result, TriageError};

/// Lock file guarding a vault against a second instance
pub const LOCK_FILE: &str = ".triage.lock";

/// Resolved vault paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLayout {
    pub root: PathBuf,
    pub inbox: PathBuf,
    pub needs_action: PathBuf,
    pub done: PathBuf,
    pub log: PathBuf,
}

impl VaultLayout {
    pub fn new(root: &Path, config: &VaultConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            inbox: root.join(&config.inbox_dir),
            needs_action: root.join(&config.needs_action_dir),
            done: root.join(&config.done_dir),
            log: root.join(&config.log_file),
        }
    }

    /// Destination folder for a category
    pub fn category_dir(&self, classification: Classification) -> &Path {
        match classification {
            Classification::NeedsAction => &self.needs_action,
            Classification::Done => &self.done,
        }
    }
}

/// Owns every path under the vault root
pub struct VaultStore {
    layout: VaultLayout,
    log_header: String,
    extensions: Vec<String>,
    log_lock: Mutex<()>,
}

impl VaultStore {
    pub fn new(layout: VaultLayout, config: &VaultConfig) -> Self {
        Self {
            layout,
            log_header: config.log_header.clone(),
            extensions: config.extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
            log_lock: Mutex::new(()),
        }
    }

    /// Store for a vault root with the given folder names
    pub fn open(root: &Path, config: &VaultConfig) -> Self {
        Self::new(VaultLayout::new(root, config), config)
    }

    pub fn layout(&self) -> &VaultLayout {
        &self.layout
    }

    /// Create inbox, category folders and the log document if missing.
    /// Safe to call repeatedly; existing content is never touched.
    pub fn ensure_layout(&self) -> Result<()> {
        for dir in [&self.layout.inbox, &self.layout.needs_action, &self.layout.done] {
            fs::create_dir_all(dir)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&self.layout.log) {
            Ok(mut file) => {
                file.write_all(self.log_header.as_bytes())?;
                file.sync_data()?;
                info!("Created log document: {:?}", self.layout.log);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!("Log document already present: {:?}", self.layout.log);
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    /// Whether a path names a file this vault processes
    pub fn is_eligible(&self, path: &Path) -> bool {
        if !should_process(path) {
            return false;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
            None => false,
        }
    }

    /// Eligible files currently in the inbox, sorted by name
    pub fn inbox_files(&self) -> Result<Vec<PathBuf>> {
        let inbox = self.layout.inbox.to_str().ok_or_else(|| {
            TriageError::Config(format!("Inbox path is not valid UTF-8: {:?}", self.layout.inbox))
        })?;
        let options = MatchOptions {
            case_sensitive: false,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };

        let mut files = Vec::new();
        for ext in &self.extensions {
            let pattern = format!("{}/*.{}", Pattern::escape(inbox), Pattern::escape(ext));
            let entries = glob_with(&pattern, options)
                .map_err(|e| TriageError::Config(format!("Bad inbox pattern {:?}: {}", pattern, e)))?;
            for entry in entries {
                match entry {
                    Ok(path) if path.is_file() && self.is_eligible(&path) => files.push(path),
                    Ok(_) => {}
                    Err(e) => warn!("Cannot inspect inbox entry: {}", e),
                }
            }
        }

        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        files.dedup();
        Ok(files)
    }

    /// Move a file out of the inbox into its category folder.
    ///
    /// Uses a single rename where possible. Across filesystems it copies,
    /// syncs and verifies the copy before deleting the source, and removes
    /// the copy again if the source cannot be deleted. That path is not
    /// atomic: a crash between copy and delete leaves the file in both places.
    pub fn move_to_category(&self, source: &Path, classification: Classification) -> Result<PathBuf> {
        let move_err = |source_err: io::Error| TriageError::Move {
            path: source.to_path_buf(),
            source: source_err,
        };

        let file_name = source.file_name().ok_or_else(|| {
            move_err(io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))
        })?;

        match fs::symlink_metadata(source) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(move_err(io::Error::new(io::ErrorKind::InvalidInput, "not a regular file")));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TriageError::SourceMissing(source.to_path_buf()));
            }
            Err(e) => return Err(move_err(e)),
        }

        let dest_dir = self.layout.category_dir(classification);
        let dest = unique_destination(dest_dir, Path::new(file_name), Local::now());

        match fs::rename(source, &dest) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound && !source.exists() => {
                return Err(TriageError::SourceMissing(source.to_path_buf()));
            }
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                debug!("Rename crosses filesystems, copying {:?}", source);
                copy_then_remove(source, &dest).map_err(move_err)?;
            }
            Err(e) => return Err(move_err(e)),
        }

        info!("Moved {:?} to {}", file_name, classification);
        Ok(dest)
    }

    /// Append one entry to the log document.
    ///
    /// Appends are serialized within this process. Nothing already in the
    /// document is read or rewritten.
    pub fn append_log_entry(&self, filename: &str, summary: &str, classification: Classification) -> Result<()> {
        let entry = format_log_entry(filename, summary, classification, Local::now());
        let _guard = self.lock_log();

        self.write_log(entry.as_bytes()).map_err(|source| TriageError::LogWrite {
            filename: filename.to_string(),
            source,
        })?;

        debug!("Appended log entry for {}", filename);
        Ok(())
    }

    fn write_log(&self, entry: &[u8]) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(&self.layout.log)?;
        if file.metadata()?.len() == 0 {
            warn!("Log document was missing or empty, rewriting header");
            file.write_all(self.log_header.as_bytes())?;
        }
        file.write_all(entry)?;
        file.sync_data()
    }

    fn lock_log(&self) -> MutexGuard<'_, ()> {
        // The guarded value is (), so a poisoned lock carries no broken state
        self.log_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the vault for this process
    pub fn acquire_lock(&self) -> Result<VaultLock> {
        VaultLock::acquire(&self.layout.root)
    }
}

/// Held while an instance works on a vault; removes the lock file on drop
#[derive(Debug)]
pub struct VaultLock {
    path: PathBuf,
}

impl VaultLock {
    pub fn acquire(root: &Path) -> Result<Self> {
        let path = root.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(TriageError::VaultLocked(path));
            }
            Err(e) => return Err(e.into()),
        };
        writeln!(file, "{}", std::process::id())?;
        debug!("Acquired vault lock {:?}", path);
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for VaultLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("Failed to remove vault lock {:?}: {}", self.path, e);
        }
    }
}

/// Check if a file name looks like user content rather than a temp or system file
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Skip hidden files and editor lock files
    if filename.starts_with('.') || filename.starts_with('~') {
        return false;
    }

    // Skip temporary files
    let temp_extensions = [".tmp", ".part", ".crdownload", ".partial", ".download", ".swp"];
    if temp_extensions.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }

    // Skip system files
    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

/// `dir/name`, or a timestamped variant if that is taken
fn unique_destination(dir: &Path, name: &Path, now: DateTime<Local>) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let stem = name.file_stem().and_then(|s| s.to_str()).unwrap_or("file");
    let ext = name.extension().and_then(|e| e.to_str());
    let stamp = now.format("%Y%m%d-%H%M%S");

    let with_ext = |base: String| match ext {
        Some(ext) => format!("{}.{}", base, ext),
        None => base,
    };

    let mut candidate = dir.join(with_ext(format!("{}_{}", stem, stamp)));
    let mut n = 1;
    while candidate.exists() {
        candidate = dir.join(with_ext(format!("{}_{}-{}", stem, stamp, n)));
        n += 1;
    }
    candidate
}

fn copy_then_remove(source: &Path, dest: &Path) -> io::Result<()> {
    let expected = fs::metadata(source)?.len();

    let copied = match fs::copy(source, dest).and_then(|n| File::open(dest)?.sync_all().map(|_| n)) {
        Ok(n) => n,
        Err(e) => {
            let _ = fs::remove_file(dest);
            return Err(e);
        }
    };

    if copied != expected {
        let _ = fs::remove_file(dest);
        return Err(io::Error::other(format!(
            "copy incomplete: {} of {} bytes", copied, expected
        )));
    }

    match fs::remove_file(source) {
        Ok(()) => Ok(()),
        // Someone else removed the source; the copy is now the only one
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            let _ = fs::remove_file(dest);
            Err(e)
        }
    }
}

/// Render one log section: heading, summary, then a classification footer
pub fn format_log_entry(
    filename: &str,
    summary: &str,
    classification: Classification,
    processed_at: DateTime<Local>,
) -> String {
    let heading: String = filename
        .chars()
        .map(|c| if c.is_control() { '?' } else { c })
        .collect();

    // Summary lines must not open new headings in the log
    let body = summary
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| if l.starts_with('#') { format!("\\{}", l) } else { l.to_string() })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "\n### {}\n\n{}\n\n_Classification: {} · Processed: {}_\n",
        heading,
        body,
        classification,
        processed_at.format("%Y-%m-%d %H:%M")
    )
}
