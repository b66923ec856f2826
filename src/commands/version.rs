// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    io::{self, BufRead, Write},
    time::Duration,
};

use clap::Args;
use log::{info, warn};

use crate::{
    commands::Context,
    error::Result,
    version::{self, GithubReleases},
};

#[derive(Args, Debug, Clone)]
pub struct CheckVersionArgs {
    /// Offer to switch to the latest release when it differs from the configured version.
    #[arg(short, long)]
    pub update: bool,
}

/// Ask on the terminal whether to switch to `latest`. A failed read counts as no answer.
fn prompt_stdin(latest: &str) -> Option<String> {
    print!("Update to {latest}? (y/N): ");
    if let Err(e) = io::stdout().flush() {
        warn!("could not write prompt: {e}");
        return None;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(0) => None,
        Ok(_) => Some(answer),
        Err(e) => {
            warn!("could not read answer: {e}");
            None
        }
    }
}

pub fn check_version(context: &Context, args: &CheckVersionArgs) -> Result<()> {
    let settings = &context.settings;
    let source = GithubReleases::new(
        &settings.releases_url,
        Duration::from_secs(settings.version_timeout_secs),
    );
    let chosen = version::check(&source, &settings.k3s_version, args.update, prompt_stdin);
    info!("K3s version to use: {chosen}");
    Ok(())
}
