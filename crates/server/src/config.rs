// SPDX-License-Identifier: MPL-2.0

use std::{env, path::PathBuf};

use error_stack::{Report, Result};

use crate::StartError;

/// The port served when none is given.
pub const DEFAULT_PORT: u16 = 8080;
const MAPPING_FILE_NAME: &str = "mapping.bin";
const PID_FILE_NAME: &str = "server.pid";

/// Answers "which market does this client IP belong to" over HTTP.
#[derive(clap::Parser, Debug)]
#[command(name = "marketd", version)]
pub struct Args {
    /// Print diagnostics while running.
    #[arg(short, long)]
    pub verbose: bool,
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Directory holding the mapping and PID files [default: <executable dir>/../data].
    #[arg(long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,
    /// Mapping file [default: <data dir>/mapping.bin].
    #[arg(long, value_name = "FILE")]
    pub mapping: Option<PathBuf>,
    /// PID file marking a running instance [default: <data dir>/server.pid].
    #[arg(long, value_name = "FILE")]
    pub pid_file: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub mapping: PathBuf,
    pub pid_file: PathBuf,
}

impl TryFrom<Args> for Config {
    type Error = Report<StartError>;

    fn try_from(args: Args) -> Result<Self, StartError> {
        let data_dir = match args.data_dir {
            Some(dir) => dir,
            None => default_data_dir(env::current_exe().ok(), dirs::home_dir)?,
        };

        Ok(Self {
            port: args.port,
            mapping: args.mapping.unwrap_or_else(|| data_dir.join(MAPPING_FILE_NAME)),
            pid_file: args.pid_file.unwrap_or_else(|| data_dir.join(PID_FILE_NAME)),
        })
    }
}

/// `data` next to the directory holding `exe`, or the home directory if the executable cannot be
/// located.
fn default_data_dir(
    exe: Option<PathBuf>,
    home_dir: impl FnOnce() -> Option<PathBuf>,
) -> Result<PathBuf, StartError> {
    if let Some(dir) = exe.and_then(|exe| Some(exe.parent()?.join("..").join("data"))) {
        return Ok(dir);
    }
    tracing::warn!("cannot determine base folder; using home directory");

    home_dir().ok_or_else(|| {
        Report::new(StartError::BaseFolder)
            .attach_printable("neither the executable nor the home directory could be located")
    })
}
