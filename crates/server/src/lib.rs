// SPDX-License-Identifier: MPL-2.0

//! An HTTP service that answers which market a client's IP address belongs to.
//!
//! [`serve`] wires everything together: it marks the instance as running, installs the control
//! signals, binds the listener, loads the mapping, and then accepts connections until a
//! termination request or a failed reload stops the [`Service`].

use std::sync::Arc;

use error_stack::{Result, ResultExt as _};

pub use accept::Acceptor;
pub use config::{Args, Config};
pub use control::{ControlRequest, Controller, Signals};
pub use pid::PidFile;
pub use service::{load_mapping, LoadError, Service, State};

pub mod accept;
pub mod config;
pub mod control;
pub mod handler;
pub mod pid;
mod service;

#[derive(thiserror::Error, Debug)]
pub enum StartError {
    #[error("cannot determine base folder")]
    BaseFolder,
    #[error("cannot create PID file")]
    PidFile,
    #[error("cannot start signals")]
    Signals,
    #[error("cannot start server")]
    Bind,
    #[error("error loading mapping")]
    LoadMapping,
}

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error("failed to start")]
    Start,
    #[error("stopped after a failed reload")]
    Reload,
}

/// Runs the service described by `config` until it is told to stop.
pub async fn serve(config: Config) -> Result<(), ServeError> {
    let service = run(config).await.change_context(ServeError::Start)?;

    match service.take_reload_failure() {
        Some(report) => Err(report.change_context(ServeError::Reload)),
        None => Ok(()),
    }
}

async fn run(config: Config) -> Result<Arc<Service>, StartError> {
    let signals = Signals::install().change_context(StartError::Signals)?;
    // Dropping this at the end of the function removes the file again.
    let _pid_file = PidFile::acquire(&config.pid_file).change_context(StartError::PidFile)?;
    let acceptor = Acceptor::bind(marketd_util::bind::public_addr(config.port))
        .change_context(StartError::Bind)?;
    let table = load_mapping(config.mapping.clone()).await.change_context(StartError::LoadMapping)?;

    let service = Arc::new(Service::new(config.mapping, table));
    let control = tokio::spawn(Controller::new(Arc::clone(&service)).run(signals));

    acceptor.serve(Arc::clone(&service)).await;

    // The acceptor only returns once the service has stopped, which also ends the control task.
    if let Err(e) = control.await {
        tracing::error!("control task failed: {e}");
    }
    tracing::info!("Finished");

    Ok(service)
}
