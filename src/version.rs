// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::time::Duration;

use {
    log::{info, warn},
    serde::Deserialize,
};

use crate::error::{Error, Result};

/// Somewhere the latest released version tag can be looked up.
pub trait ReleaseSource {
    fn latest(&self) -> Result<String>;
}

/// The "latest release" endpoint of a GitHub repository.
#[derive(Debug, Clone)]
pub struct GithubReleases {
    pub url: String,
    pub timeout: Duration,
}

#[derive(Deserialize)]
struct Release {
    tag_name: Option<String>,
}

impl GithubReleases {
    pub fn new(url: &str, timeout: Duration) -> Self {
        GithubReleases {
            url: url.to_string(),
            timeout,
        }
    }
}

impl ReleaseSource for GithubReleases {
    fn latest(&self) -> Result<String> {
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::provider_with_detail("could not build HTTP client", e.to_string()))?;

        let response = client
            .get(&self.url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::provider_with_detail("failed to fetch latest release", e.to_string()))?;

        let release: Release = response.json().map_err(|e| {
            Error::provider_with_detail("failed to parse latest release", e.to_string())
        })?;

        release
            .tag_name
            .filter(|tag| !tag.is_empty())
            .ok_or_else(|| Error::provider("latest release response has no tag name"))
    }
}

/// Whether an interactive answer accepts the offered update.
fn accepts(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Decide which version to use. `answer` is the user's reply to the update prompt, or `None` if
/// they were not asked.
pub fn decide(current: &str, latest: &str, answer: Option<&str>) -> String {
    match answer {
        Some(answer) if latest != current && accepts(answer) => latest.to_string(),
        _ => current.to_string(),
    }
}

/// Compare `current` against the latest release and return the version to use from now on.
///
/// A failed lookup is only a warning and keeps `current`. If the versions differ and
/// `ask_update` is set, `prompt` is called with the latest tag to obtain the user's answer.
pub fn check<P>(source: &dyn ReleaseSource, current: &str, ask_update: bool, prompt: P) -> String
where
    P: FnOnce(&str) -> Option<String>,
{
    info!("checking current K3s version against latest release");
    let latest = match source.latest() {
        Ok(latest) => latest,
        Err(e) => {
            warn!("failed to fetch latest K3s version: {e}");
            if let Some(detail) = e.detail() {
                warn!("  {detail}");
            }
            return current.to_string();
        }
    };

    info!("current K3s version configured: {current}");
    info!("latest K3s release: {latest}");

    if latest == current {
        info!("using latest K3s version: {current}");
        return current.to_string();
    }

    warn!("current K3s version {current} differs from latest release {latest}");
    if !ask_update {
        return current.to_string();
    }

    let answer = prompt(&latest);
    let chosen = decide(current, &latest, answer.as_deref());
    if chosen == latest {
        info!("updated to use latest K3s version: {chosen}");
    } else {
        info!("continuing with current version: {chosen}");
    }
    chosen
}
