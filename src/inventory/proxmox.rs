// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! An `Inventory` backed by the Proxmox VE JSON API.

use std::collections::BTreeMap;

use {
    log::{debug, info, warn},
    percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS},
    reqwest::blocking::{Client, RequestBuilder},
    serde::{de::DeserializeOwned, Deserialize},
};

use crate::{
    error::{Error, Result},
    inventory::{Inventory, PowerAction},
    settings::ProxmoxSettings,
    vm::{VmAttributes, VmId, VmStatus},
};

const PATH_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn encode_path(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SET).to_string()
}

/// Every Proxmox API response wraps its payload in a `data` field.
#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct NodeEntry {
    node: Option<String>,
}

#[derive(Deserialize)]
struct QemuEntry {
    vmid: Option<u32>,
}

#[derive(Deserialize)]
struct StatusEntry {
    status: Option<String>,
}

#[derive(Deserialize)]
struct Ticket {
    ticket: String,
    #[serde(rename = "CSRFPreventionToken")]
    csrf_token: String,
}

#[derive(Deserialize)]
struct VersionInfo {
    version: Option<String>,
}

#[derive(Debug)]
enum Auth {
    /// Value of the `Authorization` header.
    Token(String),
    /// A login ticket, sent as a cookie; writes must also carry the CSRF token.
    Ticket { ticket: String, csrf_token: String },
}

/// A connection to a Proxmox VE cluster. Create one per command and share it by reference.
#[derive(Debug)]
pub struct ProxmoxClient {
    http: Client,
    base_url: String,
    auth: Auth,
}

impl ProxmoxClient {
    /// Authenticate against the cluster described by `settings` and verify the connection.
    ///
    /// API-token credentials are preferred over a password when both are present.
    pub fn connect(settings: &ProxmoxSettings) -> Result<Self> {
        let (Some(host), Some(user)) = (&settings.host, &settings.user) else {
            return Err(Error::Configuration(
                "Proxmox host (PROXMOX_HOST) and user (PROXMOX_USER) must be set".to_string(),
            ));
        };

        let http = Client::builder()
            .danger_accept_invalid_certs(!settings.verify_ssl)
            .build()
            .map_err(|e| {
                Error::provider_with_detail("could not build HTTP client", e.to_string())
            })?;
        if !settings.verify_ssl {
            warn!("SSL verification for the Proxmox API is disabled");
        }

        let base_url = format!("https://{host}:{}/api2/json", settings.port);

        let auth = match (&settings.token_id, &settings.token_secret, &settings.password) {
            (Some(token_id), Some(secret), _) => {
                info!("connecting to Proxmox API at {host}:{} using API token", settings.port);
                Auth::Token(format!("PVEAPIToken={user}!{token_id}={secret}"))
            }
            (_, _, Some(password)) => {
                info!(
                    "connecting to Proxmox API at {host}:{} using password for '{user}'",
                    settings.port
                );
                if !user.contains('@') {
                    warn!(
                        "PROXMOX_USER '{user}' does not specify a realm (e.g. @pam, @pve); \
                         authentication may fail"
                    );
                }
                let request = http
                    .post(format!("{base_url}/access/ticket"))
                    .form(&[("username", user.as_str()), ("password", password.as_str())]);
                let ticket: Ticket = receive(request, "Proxmox authentication failed")?;
                Auth::Ticket {
                    ticket: ticket.ticket,
                    csrf_token: ticket.csrf_token,
                }
            }
            _ => {
                return Err(Error::Configuration(
                    "either a Proxmox password (PROXMOX_PASSWORD) or an API token \
                     (PROXMOX_API_TOKEN_ID, PROXMOX_API_TOKEN_SECRET) must be set"
                        .to_string(),
                ))
            }
        };

        let client = ProxmoxClient {
            http,
            base_url,
            auth,
        };

        let version: VersionInfo = client.get("/version").map_err(|e| {
            e.context(format!(
                "could not connect to Proxmox API at {host}:{}",
                settings.port
            ))
        })?;
        info!(
            "connected to Proxmox API on {host}:{}, version {}",
            settings.port,
            version.version.as_deref().unwrap_or("unknown")
        );

        Ok(client)
    }

    fn authorize(&self, request: RequestBuilder, write: bool) -> RequestBuilder {
        match &self.auth {
            Auth::Token(value) => request.header("Authorization", value),
            Auth::Ticket { ticket, csrf_token } => {
                let request = request.header("Cookie", format!("PVEAuthCookie={ticket}"));
                if write {
                    request.header("CSRFPreventionToken", csrf_token)
                } else {
                    request
                }
            }
        }
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.authorize(self.http.get(format!("{}{path}", self.base_url)), false);
        receive(request, &format!("GET {path} failed"))
    }

    fn vm_path(vm: &VmId) -> String {
        format!("/nodes/{}/qemu/{}", encode_path(&vm.host), vm.vmid)
    }
}

/// Send a request and unwrap the `data` envelope of its response.
fn receive<T: DeserializeOwned>(request: RequestBuilder, what: &str) -> Result<T> {
    let response = request
        .send()
        .map_err(|e| Error::provider_with_detail(what, e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(Error::provider_with_detail(
            what,
            format!("{status}: {}", body.trim()),
        ));
    }
    let envelope: Envelope<T> = response
        .json()
        .map_err(|e| Error::provider_with_detail(what, format!("bad response: {e}")))?;
    Ok(envelope.data)
}

fn opaque(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl Inventory for ProxmoxClient {
    fn list_hosts(&self) -> Result<Vec<String>> {
        debug!("fetching Proxmox cluster nodes");
        let nodes: Vec<NodeEntry> = self
            .get("/nodes")
            .map_err(|e| e.context("could not fetch Proxmox cluster nodes"))?;
        let mut names: Vec<String> = nodes.into_iter().filter_map(|n| n.node).collect();
        names.sort();
        if names.is_empty() {
            warn!("no Proxmox nodes found");
        } else {
            info!("discovered Proxmox nodes: {}", names.join(", "));
        }
        Ok(names)
    }

    fn list_vm_ids(&self, host: &str) -> Result<Vec<u32>> {
        debug!("fetching VMs on node '{host}'");
        let path = format!("/nodes/{}/qemu", encode_path(host));
        let entries: Vec<QemuEntry> = match self.get(&path) {
            Ok(entries) => entries,
            Err(e) => {
                let reason = e.detail().map(str::to_string).unwrap_or_else(|| e.to_string());
                warn!("failed to get VMs for node '{host}', it may be unreachable: {reason}");
                return Ok(Vec::new());
            }
        };
        let mut ids: Vec<u32> = entries.into_iter().filter_map(|e| e.vmid).collect();
        ids.sort_unstable();
        debug!("VMs on node '{host}': {ids:?}");
        Ok(ids)
    }

    fn vm_attributes(&self, vm: &VmId) -> Result<VmAttributes> {
        debug!("fetching config for VM {vm}");
        self.get(&format!("{}/config", Self::vm_path(vm)))
            .map_err(|e| e.context(format!("could not fetch config for VM {vm}")))
    }

    fn vm_status(&self, vm: &VmId) -> Result<VmStatus> {
        debug!("fetching status for VM {vm}");
        let status: StatusEntry = self
            .get(&format!("{}/status/current", Self::vm_path(vm)))
            .map_err(|e| e.context(format!("could not fetch status for VM {vm}")))?;
        Ok(VmStatus::from(status.status.as_deref().unwrap_or("unknown")))
    }

    fn set_vm_attributes(
        &self,
        vm: &VmId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<String> {
        let url = format!("{}{}/config", self.base_url, Self::vm_path(vm));
        let request = self.authorize(self.http.put(url), true).form(attributes);
        let result: serde_json::Value =
            receive(request, &format!("could not set config for VM {vm}"))?;
        Ok(opaque(result))
    }

    fn power_action(&self, vm: &VmId, action: PowerAction) -> Result<String> {
        let url = format!(
            "{}{}/status/{}",
            self.base_url,
            Self::vm_path(vm),
            action.api_action()
        );
        let request = self.authorize(self.http.post(url), true);
        let task: serde_json::Value = receive(request, &format!("could not {action} VM {vm}"))?;
        Ok(opaque(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_names_are_path_encoded() {
        assert_eq!(encode_path("pve1"), "pve1");
        assert_eq!(encode_path("pve 1/x"), "pve%201%2Fx");
    }

    #[test]
    fn connect_requires_host_and_user() {
        let settings = ProxmoxSettings::default();
        assert!(matches!(
            ProxmoxClient::connect(&settings),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn connect_requires_credentials() {
        let settings = ProxmoxSettings {
            host: Some("pve.invalid".to_string()),
            user: Some("root@pam".to_string()),
            ..ProxmoxSettings::default()
        };
        assert!(matches!(
            ProxmoxClient::connect(&settings),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn envelope_payloads() {
        let nodes: Envelope<Vec<NodeEntry>> =
            serde_json::from_str(r#"{"data":[{"node":"pve2"},{"status":"online"}]}"#).unwrap();
        assert_eq!(nodes.data.len(), 2);
        assert_eq!(nodes.data[0].node.as_deref(), Some("pve2"));
        assert!(nodes.data[1].node.is_none());

        let task: Envelope<serde_json::Value> =
            serde_json::from_str(r#"{"data":"UPID:pve1:0001:start"}"#).unwrap();
        assert_eq!(opaque(task.data), "UPID:pve1:0001:start");
    }
}
