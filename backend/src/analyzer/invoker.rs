use chrono::{DateTime, Utc};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::Semaphore;

use crate::config::AnalyzerConfig;

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Failed to launch `{command}`: {source}")]
    Launch {
        command: String,
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}")]
    Execution {
        command: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("Analysis admission closed: {0}")]
    Admission(#[from] tokio::sync::AcquireError),
}

/// One run of the analysis executable, kept for the lifetime of a single request.
#[derive(Debug, Clone)]
pub struct ProcessInvocation {
    pub command: String,
    pub argv: Vec<OsString>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ProcessInvocation {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

#[derive(Clone)]
pub struct ProcessInvoker {
    command: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    permits: Option<Arc<Semaphore>>,
}

impl ProcessInvoker {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            working_dir: None,
            permits: None,
        }
    }

    pub fn from_config(config: &AnalyzerConfig) -> Self {
        let mut invoker = Self::new(config.command.clone(), config.args.clone());
        invoker.working_dir = config.working_dir.clone();
        if let Some(limit) = config.max_concurrent.filter(|&limit| limit > 0) {
            invoker = invoker.with_max_concurrent(limit);
        }
        invoker
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_max_concurrent(mut self, limit: usize) -> Self {
        self.permits = Some(Arc::new(Semaphore::new(limit.max(1))));
        self
    }

    pub fn command_line(&self, image_path: &Path) -> String {
        let mut line = self.command.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line.push(' ');
        line.push_str(&image_path.to_string_lossy());
        line
    }

    /// Runs the executable with `image_path` as its last argument and waits for it to exit.
    ///
    /// The child is not killed if the caller stops polling; it always runs to completion.
    pub async fn invoke(&self, image_path: &Path) -> Result<ProcessInvocation, InvokeError> {
        let _permit = match &self.permits {
            Some(permits) => Some(permits.clone().acquire_owned().await?),
            None => None,
        };

        let mut argv: Vec<OsString> = self.args.iter().map(OsString::from).collect();
        argv.push(image_path.as_os_str().to_owned());

        let mut cmd = Command::new(&self.command);
        cmd.args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let started_at = Utc::now();
        let output = cmd.output().await.map_err(|source| InvokeError::Launch {
            command: self.command.clone(),
            source,
        })?;
        let finished_at = Utc::now();

        if !output.status.success() {
            return Err(InvokeError::Execution {
                command: self.command.clone(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        Ok(ProcessInvocation {
            command: self.command.clone(),
            argv,
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.status.code(),
            started_at,
            finished_at,
        })
    }
}
