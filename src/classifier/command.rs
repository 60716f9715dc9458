// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Subprocess oracle, e.g. `qwen-cli --prompt <prompt>`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::Oracle;
use crate::config::CommandConfig;
use crate::{Result, TriageError};

/// Argument placeholder replaced by the prompt
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

const STDERR_EXCERPT: usize = 200;

/// Runs one process per classification and reads its stdout
pub struct CommandOracle {
    program: String,
    args: Vec<String>,
}

impl CommandOracle {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_config(config: &CommandConfig) -> Self {
        Self::new(config.program.clone(), config.args.clone())
    }

    fn prompt_in_args(&self) -> bool {
        self.args.iter().any(|a| a.contains(PROMPT_PLACEHOLDER))
    }

    /// Resolve the program the way the shell would
    fn locate(&self) -> Option<PathBuf> {
        let program = Path::new(&self.program);
        if program.components().count() > 1 {
            return program.is_file().then(|| program.to_path_buf());
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(program))
            .find(|candidate| candidate.is_file())
    }
}

#[async_trait]
impl Oracle for CommandOracle {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn ask(&self, prompt: &str) -> Result<String> {
        let via_args = self.prompt_in_args();

        let mut cmd = Command::new(&self.program);
        cmd.args(self.args.iter().map(|a| a.replace(PROMPT_PLACEHOLDER, prompt)))
            .stdin(if via_args { Stdio::null() } else { Stdio::piped() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropped on gateway timeout; the child must not outlive the call
            .kill_on_drop(true);

        debug!("Spawning classifier: {} ({} args)", self.program, self.args.len());

        let mut child = cmd.spawn().map_err(|e| {
            TriageError::OracleUnavailable(format!("cannot start {:?}: {}", self.program, e))
        })?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = prompt.to_owned();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!("Classifier closed stdin early: {}", e);
                }
            });
        }

        let output = child.wait_with_output().await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT).collect();
            return Err(TriageError::OracleFailed(format!(
                "{} exited with {}: {}",
                self.program, output.status, excerpt
            )));
        }

        String::from_utf8(output.stdout)
            .map_err(|e| TriageError::OracleResponse(format!("stdout is not UTF-8: {}", e)))
    }

    async fn health_check(&self) -> Result<()> {
        match self.locate() {
            Some(path) => {
                debug!("Classifier program found at {:?}", path);
                Ok(())
            }
            None => Err(TriageError::OracleUnavailable(format!(
                "program {:?} not found on PATH",
                self.program
            ))),
        }
    }
}
