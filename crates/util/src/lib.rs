// SPDX-License-Identifier: MPL-2.0

use std::{future::Future, io, process};

use error_stack::Report;

pub mod bind;

/// How chatty the default tracing filter is when `$RUST_LOG` is not set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Verbosity {
    #[default]
    Quiet,
    Verbose,
}

impl From<bool> for Verbosity {
    fn from(verbose: bool) -> Self {
        if verbose {
            Self::Verbose
        } else {
            Self::Quiet
        }
    }
}

/// Runs `serve` to completion on a multi-threaded runtime.
///
/// `banner` names the program and its version in the first log line.
pub fn run_async<C, O>(
    banner: &str,
    verbosity: Verbosity,
    serve: impl FnOnce() -> O,
) -> process::ExitCode
where
    C: error_stack::Context,
    O: Future<Output = Result<(), Report<C>>>,
{
    prologue(banner, verbosity);
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("failed to build tokio runtime: {e}");

            return exit_code_for_io(&e);
        }
    };
    let result = runtime.block_on(serve());

    handle_serve(result)
}

fn prologue(banner: &str, verbosity: Verbosity) {
    if let Err(e) = try_setup_tracing(verbosity) {
        eprintln!("Failed to setup tracing: {}", e);
    }

    tracing::info!("{banner}");
}

fn handle_serve<C: error_stack::Context>(result: Result<(), Report<C>>) -> process::ExitCode {
    match result {
        Ok(()) => process::ExitCode::SUCCESS,
        Err(report) => {
            tracing::error!("{report:?}");

            exit_code(&report)
        }
    }
}

/// Maps a failure report onto a process exit code.
///
/// The raw OS error code of the innermost I/O error in `report` is used when there is one;
/// otherwise this is [`process::ExitCode::FAILURE`].
pub fn exit_code<C>(report: &Report<C>) -> process::ExitCode {
    report
        .downcast_ref::<io::Error>()
        .and_then(os_error_code)
        .map_or(process::ExitCode::FAILURE, process::ExitCode::from)
}

fn exit_code_for_io(e: &io::Error) -> process::ExitCode {
    os_error_code(e).map_or(process::ExitCode::FAILURE, process::ExitCode::from)
}

/// The raw OS error code of `e`, truncated to its low byte, unless that byte is zero.
fn os_error_code(e: &io::Error) -> Option<u8> {
    e.raw_os_error().map(|code| code as u8).filter(|code| *code != 0)
}

fn try_setup_tracing(verbosity: Verbosity) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::filter::{EnvFilter, LevelFilter};

    tracing_subscriber::fmt()
        .with_env_filter({
            match EnvFilter::try_from_default_env() {
                Ok(filter) => {
                    println!(
                        "Using tracing filter from ${}: \"{}\"",
                        EnvFilter::DEFAULT_ENV,
                        std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default(),
                    );

                    filter
                }
                Err(_) => {
                    let level = match verbosity {
                        Verbosity::Quiet => LevelFilter::WARN,
                        Verbosity::Verbose => LevelFilter::DEBUG,
                    };

                    EnvFilter::default().add_directive(level.into())
                }
            }
            // We don't need to hear from *mio*.
            .add_directive("mio=error".parse()?)
        })
        .with_thread_names(false)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(thiserror::Error, Debug)]
    #[error("test failure")]
    struct Failure;

    #[test]
    fn exit_code_uses_os_error() {
        use error_stack::ResultExt as _;
        use error_stack::IntoReport as _;

        let result: Result<(), _> = Err(io::Error::from_raw_os_error(98));
        let report = result.into_report().change_context(Failure).unwrap_err();
        let e = report.downcast_ref::<io::Error>().expect("report should carry the I/O error");

        assert_eq!(os_error_code(e), Some(98));
    }

    #[test]
    fn large_os_errors_are_truncated() {
        assert_eq!(os_error_code(&io::Error::from_raw_os_error(300)), Some(44));
        assert_eq!(os_error_code(&io::Error::from_raw_os_error(256)), None);
    }

    #[test]
    fn non_os_errors_have_no_code() {
        let report = error_stack::report!(Failure);

        assert!(report.downcast_ref::<io::Error>().is_none());
        assert_eq!(os_error_code(&io::Error::new(io::ErrorKind::Other, "oops")), None);
    }

    #[test]
    fn verbosity_from_flag() {
        assert_eq!(Verbosity::from(true), Verbosity::Verbose);
        assert_eq!(Verbosity::from(false), Verbosity::Quiet);
    }
}
