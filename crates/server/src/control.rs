// SPDX-License-Identifier: MPL-2.0

//! Termination and reload requests.
//!
//! Requests arrive as process signals and are handled one at a time by a single control task,
//! never by a connection handler. `SIGINT` and `SIGTERM` terminate the service; `SIGUSR1` reloads
//! the mapping file. `SIGKILL` and `SIGSTOP` cannot be caught, so they bypass this module and any
//! cleanup entirely.

use std::sync::Arc;

use error_stack::{IntoReport as _, Result, ResultExt as _};

use crate::{service, Service};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlRequest {
    Terminate,
    Reload,
}

#[derive(thiserror::Error, Debug)]
pub enum InstallSignalsError {
    #[error("failed to install SIGINT handler")]
    Interrupt,
    #[error("failed to install SIGTERM handler")]
    Terminate,
    #[error("failed to install SIGUSR1 handler")]
    Reload,
}

/// The process signals that turn into [`ControlRequest`]s.
#[cfg(unix)]
pub struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    reload: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    pub fn install() -> Result<Self, InstallSignalsError> {
        use tokio::signal::unix::{signal, SignalKind};

        tracing::debug!("Attaching signals");

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())
                .into_report()
                .change_context(InstallSignalsError::Interrupt)?,
            terminate: signal(SignalKind::terminate())
                .into_report()
                .change_context(InstallSignalsError::Terminate)?,
            reload: signal(SignalKind::user_defined1())
                .into_report()
                .change_context(InstallSignalsError::Reload)?,
        })
    }

    /// Waits for the next request.
    ///
    /// Signals that arrive while a previous request is being handled are coalesced.
    pub async fn recv(&mut self) -> ControlRequest {
        tokio::select! {
            _ = self.interrupt.recv() => ControlRequest::Terminate,
            _ = self.terminate.recv() => ControlRequest::Terminate,
            _ = self.reload.recv() => ControlRequest::Reload,
        }
    }
}

/// Without Unix signals, only Ctrl-C is recognized and reloads cannot be requested.
#[cfg(not(unix))]
pub struct Signals(());

#[cfg(not(unix))]
impl Signals {
    pub fn install() -> Result<Self, InstallSignalsError> {
        Ok(Self(()))
    }

    pub async fn recv(&mut self) -> ControlRequest {
        loop {
            if tokio::signal::ctrl_c().await.is_ok() {
                return ControlRequest::Terminate;
            }
        }
    }
}

/// Drives the [`Service`] in response to [`ControlRequest`]s.
#[derive(Clone)]
pub struct Controller {
    service: Arc<Service>,
}

impl Controller {
    pub fn new(service: Arc<Service>) -> Self {
        Self { service }
    }

    /// Handles requests from `signals` until the service stops.
    pub async fn run(self, mut signals: Signals) {
        loop {
            let request = tokio::select! {
                biased;
                _ = self.service.stopped() => break,
                request = signals.recv() => request,
            };

            self.handle(request).await;
        }
    }

    pub async fn handle(&self, request: ControlRequest) {
        match request {
            ControlRequest::Terminate => self.terminate(),
            ControlRequest::Reload => self.reload().await,
        }
    }

    fn terminate(&self) {
        tracing::info!("Termination signal received");
        self.service.stop();
    }

    /// Replaces the active table with a fresh decode of the mapping file.
    ///
    /// A failed reload stops the whole service instead of continuing with the old table.
    async fn reload(&self) {
        if !self.service.begin_reload() {
            tracing::debug!("reload already in progress; ignoring request");
            return;
        }
        tracing::info!("Reloading signal received");

        match service::load_mapping(self.service.mapping_path().to_owned()).await {
            Ok(table) => {
                let records = table.len();
                self.service.store().swap(table);
                tracing::info!("Reloaded mapping with {records} records");
            }
            Err(report) => {
                tracing::error!("Error loading mapping: {report:?}");
                self.service.record_reload_failure(report);
                self.service.stop();
            }
        }

        self.service.end_reload();
    }
}
