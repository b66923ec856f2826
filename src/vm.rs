// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    fmt,
    hash::{Hash, Hasher},
    net::Ipv4Addr,
};

use serde::{Deserialize, Serialize};

/// The identity of a virtual machine: the hypervisor host it lives on and its numeric id, which
/// is unique per host.
///
/// The derived ordering compares the host name first and then the id, which is the order every
/// node set is processed in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VmId {
    pub host: String,
    pub vmid: u32,
}

impl VmId {
    pub fn new(host: &str, vmid: u32) -> Self {
        VmId {
            host: host.to_string(),
            vmid,
        }
    }
}

impl fmt::Display for VmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.vmid)
    }
}

/// The cluster function a VM is tagged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Agent,
    Storage,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Server, Role::Agent, Role::Storage];

    /// The short name accepted in the node file, e.g. "server".
    pub fn short_name(&self) -> &'static str {
        match self {
            Role::Server => "server",
            Role::Agent => "agent",
            Role::Storage => "storage",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}

pub type RoleSet = BTreeSet<Role>;

/// The hypervisor tags that mark a VM as holding each role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoleTags {
    pub server: String,
    pub agent: String,
    pub storage: String,
}

impl Default for RoleTags {
    fn default() -> Self {
        RoleTags {
            server: "k3s-server".to_string(),
            agent: "k3s-agent".to_string(),
            storage: "k3s-storage".to_string(),
        }
    }
}

impl RoleTags {
    pub fn tag_for(&self, role: Role) -> &str {
        match role {
            Role::Server => &self.server,
            Role::Agent => &self.agent,
            Role::Storage => &self.storage,
        }
    }

    /// Map a single hypervisor tag to a role, if it is one of the recognized tags.
    pub fn classify(&self, tag: &str) -> Option<Role> {
        Role::ALL.into_iter().find(|role| self.tag_for(*role) == tag)
    }

    /// Parse the raw `tags` attribute of a VM (a list separated by ';' or ',') into the set of
    /// roles it holds. Unrecognized tags are ignored.
    pub fn parse_tags(&self, raw: &str) -> RoleSet {
        raw.split(|c: char| c == ';' || c == ',')
            .map(str::trim)
            .filter(|tag| !tag.is_empty())
            .filter_map(|tag| self.classify(tag))
            .collect()
    }

    /// Parse a node-file role string. Matching is case-insensitive and both the short form
    /// ("SERVER") and the tag form ("k3s-server") are accepted.
    pub fn parse_role(&self, raw: &str) -> Option<Role> {
        let raw = raw.trim();
        Role::ALL.into_iter().find(|role| {
            raw.eq_ignore_ascii_case(role.short_name()) || raw.eq_ignore_ascii_case(self.tag_for(*role))
        })
    }
}

/// The last observed run state of a VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmStatus {
    Running,
    Stopped,
    Unknown,
    Other(String),
}

impl From<&str> for VmStatus {
    fn from(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "running" => VmStatus::Running,
            "stopped" => VmStatus::Stopped,
            "" | "unknown" => VmStatus::Unknown,
            other => VmStatus::Other(other.to_string()),
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmStatus::Running => write!(f, "running"),
            VmStatus::Stopped => write!(f, "stopped"),
            VmStatus::Unknown => write!(f, "unknown"),
            VmStatus::Other(s) => write!(f, "{s}"),
        }
    }
}

/// The subset of a VM's hypervisor configuration that this tool reads or writes. Fields the tool
/// does not know about are kept in `other` so nothing returned by the provider is lost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmAttributes {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nameserver: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub searchdomain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sshkeys: Option<String>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl VmAttributes {
    pub fn ipconfig_key(index: u8) -> String {
        format!("ipconfig{index}")
    }

    /// The network configuration string for interface `index`, e.g. "ip=10.0.0.5/24,gw=10.0.0.1".
    pub fn ipconfig(&self, index: u8) -> Option<&str> {
        self.other
            .get(&Self::ipconfig_key(index))
            .and_then(|value| value.as_str())
    }

    pub fn set_ipconfig(&mut self, index: u8, value: &str) {
        self.other.insert(
            Self::ipconfig_key(index),
            serde_json::Value::String(value.to_string()),
        );
    }

    /// Merge a flat attribute update (as written to the provider) into this attribute set.
    pub fn apply_update(&mut self, update: &BTreeMap<String, String>) {
        for (key, value) in update {
            match key.as_str() {
                "name" => self.name = Some(value.clone()),
                "tags" => self.tags = Some(value.clone()),
                "nameserver" => self.nameserver = Some(value.clone()),
                "searchdomain" => self.searchdomain = Some(value.clone()),
                "sshkeys" => self.sshkeys = Some(value.clone()),
                _ => {
                    self.other
                        .insert(key.clone(), serde_json::Value::String(value.clone()));
                }
            }
        }
    }
}

/// One managed virtual machine: its identity plus whatever has been observed about it so far.
///
/// Equality, hashing and ordering only look at the identity; everything else is observational
/// data that is filled in and updated as operations run.
#[derive(Debug, Clone)]
pub struct Vm {
    pub id: VmId,
    pub name: Option<String>,
    pub ip_address: Option<Ipv4Addr>,
    pub roles: RoleSet,
    /// Fetched lazily; `None` until the provider has been asked.
    pub attributes: Option<VmAttributes>,
    pub status: Option<VmStatus>,
}

impl Vm {
    pub fn new(host: &str, vmid: u32) -> Self {
        Vm {
            id: VmId::new(host, vmid),
            name: None,
            ip_address: None,
            roles: RoleSet::new(),
            attributes: None,
            status: None,
        }
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles.extend(roles);
        self
    }

    pub fn host(&self) -> &str {
        &self.id.host
    }

    pub fn vmid(&self) -> u32 {
        self.id.vmid
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// A human-friendly label: the VM's name if known, else its id.
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("VMID {}", self.id.vmid),
        }
    }
}

impl PartialEq for Vm {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Vm {}

impl Hash for Vm {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Vm {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Vm {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Display for Vm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} ({name})", self.id),
            None => write!(f, "{}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_ignores_observed_state() {
        let mut a = Vm::new("pve1", 100).with_roles([Role::Server]);
        a.name = Some("cp-1".to_string());
        a.status = Some(VmStatus::Running);
        let b = Vm::new("pve1", 100).with_roles([Role::Agent]);
        assert_eq!(a, b);
        assert_ne!(a, Vm::new("pve2", 100));
    }

    #[test]
    fn ordering_is_host_then_vmid() {
        let mut vms = vec![
            Vm::new("pve2", 100),
            Vm::new("pve1", 200),
            Vm::new("pve1", 101),
        ];
        vms.sort();
        let ids: Vec<String> = vms.iter().map(|vm| vm.id.to_string()).collect();
        assert_eq!(ids, vec!["pve1:101", "pve1:200", "pve2:100"]);
    }

    #[test]
    fn tags_parse_into_roles() {
        let tags = RoleTags::default();
        let roles = tags.parse_tags("k3s-server; prod ;k3s-storage");
        assert_eq!(roles, RoleSet::from([Role::Server, Role::Storage]));
        assert!(tags.parse_tags("prod;web").is_empty());
        assert!(tags.parse_tags("").is_empty());
        assert_eq!(tags.parse_tags("k3s-agent,other"), RoleSet::from([Role::Agent]));
    }

    #[test]
    fn node_file_roles_are_case_insensitive() {
        let tags = RoleTags::default();
        assert_eq!(tags.parse_role("SERVER"), Some(Role::Server));
        assert_eq!(tags.parse_role("K3S-AGENT"), Some(Role::Agent));
        assert_eq!(tags.parse_role("storage"), Some(Role::Storage));
        assert_eq!(tags.parse_role("database"), None);
    }

    #[test]
    fn status_from_raw() {
        assert_eq!(VmStatus::from("Running"), VmStatus::Running);
        assert_eq!(VmStatus::from("stopped"), VmStatus::Stopped);
        assert_eq!(VmStatus::from(""), VmStatus::Unknown);
        assert_eq!(VmStatus::from("paused"), VmStatus::Other("paused".to_string()));
    }

    #[test]
    fn attributes_keep_unknown_fields() {
        let raw = r#"{"name":"cp-1","tags":"k3s-server","memory":2048,"ipconfig0":"ip=dhcp"}"#;
        let attrs: VmAttributes = serde_json::from_str(raw).unwrap();
        assert_eq!(attrs.name.as_deref(), Some("cp-1"));
        assert_eq!(attrs.ipconfig(0), Some("ip=dhcp"));
        assert_eq!(attrs.ipconfig(1), None);
        assert_eq!(attrs.other.get("memory"), Some(&serde_json::json!(2048)));
    }
}
