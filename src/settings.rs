// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::path::{Path, PathBuf};

use {
    log::debug,
    serde::{Deserialize, Serialize},
};

use crate::{
    error::{Error, Result},
    vm::RoleTags,
};

/// Settings is the static configuration of the tool. It is deserialized from a TOML file, and
/// the connection details and SSH key locations can then be overridden from the environment.
///
/// Every field has a default so that a partial file (or no file at all) is valid.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub proxmox: ProxmoxSettings,
    pub k3s_version: String,
    pub kube_vip_version: String,
    pub vip_address: String,
    pub loadbalancer_range: String,
    pub remote_user: String,
    pub tags: RoleTags,
    pub network: NetworkSettings,
    /// Public key content to inject into VMs. Takes priority over every other key source.
    pub ssh_public_key: Option<String>,
    pub ssh_public_key_path: PathBuf,
    /// The node list file. When it exists it takes precedence over tag discovery.
    pub node_file: PathBuf,
    pub releases_url: String,
    pub version_timeout_secs: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ProxmoxSettings {
    pub host: Option<String>,
    pub port: u16,
    /// "user@realm".
    pub user: Option<String>,
    pub password: Option<String>,
    pub token_id: Option<String>,
    pub token_secret: Option<String>,
    pub verify_ssl: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct NetworkSettings {
    pub range_start: String,
    pub range_end: String,
    pub cidr: u8,
    pub gateway: String,
    pub dns_servers: Vec<String>,
    pub search_domain: Option<String>,
    /// Which of the VM's network interfaces is configured.
    pub ipconfig_index: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            proxmox: ProxmoxSettings::default(),
            k3s_version: "v1.32.4+k3s1".to_string(),
            kube_vip_version: "v0.9.1".to_string(),
            vip_address: "10.10.0.150".to_string(),
            loadbalancer_range: "10.10.0.151-10.10.0.199".to_string(),
            remote_user: "ubuntu".to_string(),
            tags: RoleTags::default(),
            network: NetworkSettings::default(),
            ssh_public_key: None,
            ssh_public_key_path: default_ssh_key_path(),
            node_file: PathBuf::from("config.json"),
            releases_url: "https://api.github.com/repos/k3s-io/k3s/releases/latest".to_string(),
            version_timeout_secs: 10,
        }
    }
}

impl Default for ProxmoxSettings {
    fn default() -> Self {
        ProxmoxSettings {
            host: None,
            port: 8006,
            user: None,
            password: None,
            token_id: None,
            token_secret: None,
            verify_ssl: true,
        }
    }
}

impl Default for NetworkSettings {
    fn default() -> Self {
        NetworkSettings {
            range_start: "10.10.0.201".to_string(),
            range_end: "10.10.0.229".to_string(),
            cidr: 24,
            gateway: "10.10.0.1".to_string(),
            dns_servers: vec!["10.10.0.1".to_string()],
            search_domain: Some("lan.home.vwn.io".to_string()),
            ipconfig_index: 0,
        }
    }
}

fn default_ssh_key_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".ssh").join("id_rsa.pub")
}

impl Settings {
    /// Load settings for a command.
    ///
    /// `explicit` is a path given on the command line. If it (or the path named by
    /// `K3S_DEPLOY_SETTINGS`) does not exist, that is an error; the default path is allowed to be
    /// absent. Environment overrides are applied last.
    pub fn load(explicit: Option<&str>) -> Result<Self> {
        let explicit = explicit
            .map(str::to_string)
            .or_else(crate::settings_path_from_env);
        let mut settings = match &explicit {
            Some(path) => Self::from_file(Path::new(path))?,
            None => {
                let path = Path::new(crate::DEFAULT_SETTINGS_PATH);
                if path.exists() {
                    Self::from_file(path)?
                } else {
                    debug!("no settings file at '{}', using defaults", path.display());
                    Settings::default()
                }
            }
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "could not open settings file \"{}\": {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&contents).map_err(|e| match e {
            Error::Configuration(msg) => {
                Error::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Override settings from environment variables. `lookup` returns the value of a variable, if
    /// it is set.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) -> Result<()> {
        let pve = &mut self.proxmox;
        if let Some(host) = lookup("PROXMOX_HOST") {
            pve.host = Some(host);
        }
        if let Some(port) = lookup("PROXMOX_PORT") {
            pve.port = port.parse().map_err(|_| {
                Error::Configuration(format!("PROXMOX_PORT must be a valid port number, got '{port}'"))
            })?;
        }
        if let Some(user) = lookup("PROXMOX_USER") {
            pve.user = Some(user);
        }
        if let Some(password) = lookup("PROXMOX_PASSWORD") {
            pve.password = Some(password);
        }
        if let Some(token_id) = lookup("PROXMOX_API_TOKEN_ID") {
            pve.token_id = Some(token_id);
        }
        if let Some(secret) = lookup("PROXMOX_API_TOKEN_SECRET") {
            pve.token_secret = Some(secret);
        }
        if let Some(verify) = lookup("PROXMOX_SSL_VERIFY") {
            pve.verify_ssl = !matches!(verify.to_ascii_lowercase().as_str(), "0" | "false");
        }
        if let Some(key) = lookup("K3S_SSH_PUBLIC_KEY") {
            self.ssh_public_key = Some(key);
        }
        if let Some(path) = lookup("K3S_SSH_PUBLIC_KEY_PATH") {
            self.ssh_public_key_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("K3S_DEPLOY_NODE_FILE") {
            self.node_file = PathBuf::from(path);
        }
        Ok(())
    }
}
