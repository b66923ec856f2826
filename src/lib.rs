// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod cluster;
pub mod commands;
pub mod config;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod network;
pub mod settings;
pub mod test_env;
pub mod version;
pub mod vm;

/// Settings file used when neither `--settings` nor `K3S_DEPLOY_SETTINGS` names one.
pub const DEFAULT_SETTINGS_PATH: &str = "k3s-deploy.toml";

/// Gets the settings file path named in the environment, if any.
pub fn settings_path_from_env() -> Option<String> {
    std::env::var("K3S_DEPLOY_SETTINGS").ok()
}

/// The log filter to use when `K3S_DEPLOY_LOG` is unset.
pub fn default_log_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "info"
    }
}
