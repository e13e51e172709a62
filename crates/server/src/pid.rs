// SPDX-License-Identifier: MPL-2.0

//! The marker file that keeps two instances from serving at once.

use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
    process,
};

use error_stack::{IntoReport as _, Report, Result, ResultExt as _};

#[derive(thiserror::Error, Debug)]
pub enum AcquirePidFileError {
    #[error("process already running")]
    AlreadyRunning,
    #[error("failed to create PID file")]
    Create,
    #[error("failed to write PID file")]
    Write,
}

/// A PID file that exists for as long as this value does.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Creates the file at `path` and writes the current process ID into it.
    ///
    /// Fails with [`AcquirePidFileError::AlreadyRunning`] if the file already exists.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, AcquirePidFileError> {
        let path = path.into();
        tracing::debug!("Creating PID file {}", path.display());

        let mut file = match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Report::new(e)
                    .change_context(AcquirePidFileError::AlreadyRunning)
                    .attach_printable(format!("found {}", path.display())));
            }
            Err(e) => {
                return Err(Report::new(e)
                    .change_context(AcquirePidFileError::Create)
                    .attach_printable(format!("path: {}", path.display())));
            }
        };

        // From here on, dropping `pid_file` removes the file again.
        let pid_file = Self { path };
        write!(file, "{}", process::id())
            .into_report()
            .change_context(AcquirePidFileError::Write)?;

        Ok(pid_file)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::error!("failed to remove PID file {}: {e}", self.path.display());
        }
    }
}
