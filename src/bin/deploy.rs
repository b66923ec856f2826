// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::panic;

use clap::Parser;
use log::error;

use k3s_deploy_lib::{
    self,
    commands::{self, Cli},
};

/// The k3s-deploy binary runs one cluster management command and exits with 0 on success, 1 on
/// an operational error, and 2 on an unexpected error.
fn main() {
    let args = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default()
            .filter_or("K3S_DEPLOY_LOG", k3s_deploy_lib::default_log_filter(args.verbose)),
    )
    .init();

    let code = match panic::catch_unwind(|| commands::main(&args)) {
        Ok(Ok(())) => 0,
        Ok(Err(e)) => {
            error!("{e}");
            if let Some(detail) = e.detail() {
                error!("  provider detail: {detail}");
            }
            e.exit_code()
        }
        Err(_) => {
            error!("unexpected error, aborting");
            2
        }
    };
    std::process::exit(code);
}
