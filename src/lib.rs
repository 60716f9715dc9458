// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! vault-triage: AI-assisted inbox triage for a notes vault
//!
//! Watches a vault's `Inbox/` folder, asks a classification oracle whether
//! each new note needs action, moves it to `Needs_Action/` or `Done/`, and
//! appends a short summary to `Dashboard.md`.

pub mod classifier;
pub mod config;
pub mod error;
pub mod journal;
pub mod pipeline;
pub mod store;
pub mod watcher;

pub use classifier::{Classification, ClassifierGateway, Oracle};
pub use config::AppConfig;
pub use error::{ErrorKind, Result, TriageError};
pub use pipeline::{IntakePipeline, Outcome, RunReport};
pub use store::VaultStore;
