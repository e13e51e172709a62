// SPDX-License-Identifier: MPL-2.0

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
        PoisonError,
    },
};

use error_stack::{IntoReport as _, Report, ResultExt as _};
use marketd_mapping::{Store, Table};
use tokio::{sync::watch, task};

/// Where the service is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    Running,
    Reloading,
    Stopped,
}

/// Everything the acceptor, the connection handlers, and the control plane share.
pub struct Service {
    mapping_path: PathBuf,
    store: Store,
    running: watch::Sender<bool>,
    reloading: AtomicBool,
    reload_failure: Mutex<Option<Report<LoadError>>>,
}

impl Service {
    pub fn new(mapping_path: impl Into<PathBuf>, table: Table) -> Self {
        let (running, _) = watch::channel(true);

        Self {
            mapping_path: mapping_path.into(),
            store: Store::new(table),
            running,
            reloading: AtomicBool::new(false),
            reload_failure: Mutex::new(None),
        }
    }

    pub fn mapping_path(&self) -> &Path {
        &self.mapping_path
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn state(&self) -> State {
        if !self.is_running() {
            State::Stopped
        } else if self.reloading.load(Ordering::Acquire) {
            State::Reloading
        } else {
            State::Running
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.borrow()
    }

    /// Clears the running flag. The acceptor closes its listener in response.
    pub fn stop(&self) {
        self.running.send_replace(false);
    }

    /// Completes once [`Service::stop`] has been called.
    pub async fn stopped(&self) {
        let mut running = self.running.subscribe();
        while *running.borrow_and_update() {
            if running.changed().await.is_err() {
                return;
            }
        }
    }

    /// Marks a reload as in flight. Returns `false` if one already was.
    pub(crate) fn begin_reload(&self) -> bool {
        !self.reloading.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn end_reload(&self) {
        self.reloading.store(false, Ordering::Release);
    }

    pub(crate) fn record_reload_failure(&self, report: Report<LoadError>) {
        *self.reload_failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(report);
    }

    /// The failure of the reload that stopped the service, if that is what stopped it.
    pub fn take_reload_failure(&self) -> Option<Report<LoadError>> {
        self.reload_failure.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("failed to load mapping file")]
    Open,
    #[error("mapping loader task did not complete")]
    Task,
}

/// Decodes the mapping file at `path` on the blocking thread pool.
pub async fn load_mapping(path: PathBuf) -> Result<Table, Report<LoadError>> {
    task::spawn_blocking(move || marketd_mapping::open_file(path))
        .await
        .into_report()
        .change_context(LoadError::Task)?
        .change_context(LoadError::Open)
}
