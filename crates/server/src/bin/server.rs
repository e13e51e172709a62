// SPDX-License-Identifier: MPL-2.0

use clap::Parser as _;
use error_stack::{Result, ResultExt as _};
use marketd_server::{Args, Config, ServeError};

static BANNER: &str = concat!(env!("CARGO_BIN_NAME"), " v", env!("CARGO_PKG_VERSION"));

fn main() -> std::process::ExitCode {
    let args = Args::parse();
    let verbosity = marketd_util::Verbosity::from(args.verbose);

    marketd_util::run_async(BANNER, verbosity, || run(args))
}

async fn run(args: Args) -> Result<(), ServeError> {
    let config = Config::try_from(args).change_context(ServeError::Start)?;

    marketd_server::serve(config).await
}
