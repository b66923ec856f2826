// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{collections::BTreeMap, io, path::Path};

use {
    log::{debug, info, warn},
    serde::{Deserialize, Serialize},
};

use crate::{
    cluster::RolePartition,
    error::{Error, Result},
    vm::{RoleTags, Vm},
};

/// NodeFile, along with its children HostEntry and VmEntry, is the model for the node list file.
/// The file is deserialized into a NodeFile object.
///
/// The model used in the file is intentionally different from the model used to track VMs in
/// memory: the file lists one role per entry grouped by hypervisor host, while in memory a VM is
/// a single object holding a set of roles.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct NodeFile {
    #[serde(default)]
    pub nodes: Vec<HostEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct HostEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub vms: Vec<VmEntry>,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct VmEntry {
    #[serde(default)]
    pub vmid: Option<u32>,
    #[serde(default)]
    pub role: String,
}

impl NodeFile {
    /// Read the node file at `path`. Returns `None` if the file does not exist.
    pub fn read(path: &Path) -> Result<Option<Self>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };
        let file = serde_json::from_str(&contents).map_err(|e| {
            Error::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        Ok(Some(file))
    }

    /// Build VMs from the file's entries. Entries without a host id, a VM id, or a recognized
    /// role are skipped. The VMs carry no attributes; those are fetched on demand.
    pub fn vms(&self, tags: &RoleTags) -> Vec<Vm> {
        let mut vms = Vec::new();
        for host in self.nodes.iter() {
            let Some(host_id) = host.id.as_deref().filter(|id| !id.is_empty()) else {
                debug!("skipping node file entry without a host id");
                continue;
            };
            for entry in host.vms.iter() {
                let Some(vmid) = entry.vmid.filter(|id| *id != 0) else {
                    debug!("skipping VM entry without a vmid on host '{host_id}'");
                    continue;
                };
                match tags.parse_role(&entry.role) {
                    Some(role) => vms.push(Vm::new(host_id, vmid).with_roles([role])),
                    None => debug!(
                        "skipping {host_id}:{vmid}, role '{}' is not recognized",
                        entry.role
                    ),
                }
            }
        }
        vms
    }

    /// Build a node file describing `partition`, one entry per VM and role.
    pub fn from_partition(partition: &RolePartition) -> Self {
        let mut hosts: BTreeMap<&str, Vec<VmEntry>> = BTreeMap::new();
        for vm in partition.all() {
            let entries = hosts.entry(vm.host()).or_default();
            entries.extend(vm.roles.iter().map(|role| VmEntry {
                vmid: Some(vm.vmid()),
                role: role.short_name().to_uppercase(),
            }));
        }
        NodeFile {
            nodes: hosts
                .into_iter()
                .map(|(id, vms)| HostEntry {
                    id: Some(id.to_string()),
                    vms,
                })
                .collect(),
            ssh_key: None,
        }
    }
}

/// Load a role partition from the node file at `path`.
///
/// Returns `Ok(None)` if the file does not exist, so that the caller can fall back to live
/// discovery. A file that exists but cannot be parsed is a configuration error.
pub fn load(path: &Path, tags: &RoleTags) -> Result<Option<RolePartition>> {
    let Some(file) = NodeFile::read(path)? else {
        return Ok(None);
    };
    info!("loading node information from {}", path.display());

    let partition = RolePartition::from_vms(file.vms(tags));
    info!(
        "found {} server(s), {} agent(s), and {} storage node(s) in {}",
        partition.servers().count(),
        partition.agents().count(),
        partition.storage().count(),
        path.display()
    );
    Ok(Some(partition))
}

/// The `ssh_key` field of the node file at `path`, if the file exists and sets one.
///
/// This only feeds key resolution, so a missing or unreadable file is not an error.
pub fn ssh_key(path: &Path) -> Option<String> {
    match NodeFile::read(path) {
        Ok(Some(file)) => file.ssh_key,
        Ok(None) => None,
        Err(e) => {
            warn!("could not read SSH key from node file: {e}");
            None
        }
    }
}
