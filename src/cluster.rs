// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::{collections::BTreeMap, path::Path};

use log::{debug, info, warn};

use crate::{
    config,
    error::{Error, Result},
    inventory::Inventory,
    vm::{Role, RoleTags, Vm, VmId},
};

/// RolePartition is the set of managed VMs, split by the cluster role each one is tagged for.
///
/// Every VM is held exactly once, in (host, vmid) order; the per-role sets are views over that
/// list, so a VM tagged with several roles shows up in each of them while remaining a single
/// object that operations can update in place.
#[derive(Debug, Default, Clone)]
pub struct RolePartition {
    nodes: Vec<Vm>,
}

fn join(vms: &[&Vm]) -> String {
    vms.iter()
        .map(|vm| vm.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl RolePartition {
    /// Build a partition from VMs in any order. VMs with the same identity are merged: their
    /// roles are combined and the first non-empty value of each observed field is kept.
    pub fn from_vms(vms: impl IntoIterator<Item = Vm>) -> Self {
        let mut unique: BTreeMap<VmId, Vm> = BTreeMap::new();
        for vm in vms {
            match unique.get_mut(&vm.id) {
                Some(existing) => {
                    existing.roles.extend(vm.roles);
                    existing.name = existing.name.take().or(vm.name);
                    existing.attributes = existing.attributes.take().or(vm.attributes);
                    existing.status = existing.status.take().or(vm.status);
                    existing.ip_address = existing.ip_address.or(vm.ip_address);
                }
                None => {
                    unique.insert(vm.id.clone(), vm);
                }
            }
        }
        RolePartition {
            nodes: unique.into_values().collect(),
        }
    }

    /// Every managed VM, sorted by (host, vmid).
    pub fn all(&self) -> &[Vm] {
        &self.nodes
    }

    pub fn all_mut(&mut self) -> &mut [Vm] {
        &mut self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &Vm> {
        self.nodes.iter().filter(move |vm| vm.has_role(role))
    }

    pub fn servers(&self) -> impl Iterator<Item = &Vm> {
        self.with_role(Role::Server)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Vm> {
        self.with_role(Role::Agent)
    }

    pub fn storage(&self) -> impl Iterator<Item = &Vm> {
        self.with_role(Role::Storage)
    }

    /// The first server in sort order. It is the same node on every run as long as the set of
    /// servers does not change.
    pub fn master(&self) -> Option<&Vm> {
        self.servers().next()
    }

    /// Every server except the master, in sort order.
    pub fn non_master_servers(&self) -> impl Iterator<Item = &Vm> {
        self.servers().skip(1)
    }

    /// Log the master selection and the members of each role.
    pub fn log_summary(&self) {
        match self.master() {
            Some(master) => {
                info!("server master is {master}");
                let others: Vec<&Vm> = self.non_master_servers().collect();
                if others.is_empty() {
                    debug!("no other server nodes besides the master");
                } else {
                    info!("remaining servers: {}", join(&others));
                }
            }
            None => warn!("no server nodes discovered or loaded"),
        }
        for role in [Role::Agent, Role::Storage] {
            let members: Vec<&Vm> = self.with_role(role).collect();
            if !members.is_empty() {
                info!("{role} nodes: {}", join(&members));
            }
        }
    }
}

/// Walk every host in the inventory and collect the VMs tagged with a cluster role.
///
/// A host whose VMs cannot be listed, or a VM whose attributes cannot be fetched, is logged and
/// skipped. Discovery only fails if no host can be enumerated at all, or if nothing is tagged.
pub fn discover(inventory: &dyn Inventory, tags: &RoleTags) -> Result<RolePartition> {
    info!("discovering nodes by tag ({}, {}, {})", tags.server, tags.agent, tags.storage);

    let hosts = inventory
        .list_hosts()
        .map_err(|e| Error::NodeDiscovery(format!("failed to get hypervisor hosts: {e}")))?;
    if hosts.is_empty() {
        return Err(Error::NodeDiscovery(
            "no hypervisor hosts found, cannot discover VMs by tags".to_string(),
        ));
    }

    let mut found = Vec::new();
    for host in hosts.iter() {
        let vmids = match inventory.list_vm_ids(host) {
            Ok(ids) => ids,
            Err(e) => {
                warn!("skipping host '{host}': {e}");
                continue;
            }
        };

        for vmid in vmids {
            let id = VmId::new(host, vmid);
            let attributes = match inventory.vm_attributes(&id) {
                Ok(attributes) => attributes,
                Err(e) => {
                    warn!("skipping VM {id}: {e}");
                    continue;
                }
            };

            let roles = tags.parse_tags(attributes.tags.as_deref().unwrap_or(""));
            if roles.is_empty() {
                continue;
            }

            let mut vm = Vm::new(host, vmid).with_roles(roles);
            vm.name = attributes.name.clone();
            vm.attributes = Some(attributes);
            info!(
                "found VM {vm} with role(s): {}",
                vm.roles
                    .iter()
                    .map(Role::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            );
            found.push(vm);
        }
    }

    let partition = RolePartition::from_vms(found);
    if partition.is_empty() {
        return Err(Error::NodeDiscovery(format!(
            "no VMs carry any of the role tags ({}, {}, {})",
            tags.server, tags.agent, tags.storage
        )));
    }
    partition.log_summary();
    Ok(partition)
}

/// Build the node set for a command: the node file if it exists and names at least one node,
/// otherwise live discovery.
///
/// `inventory` is only called when discovery is needed, so a command working from the node file
/// does not have to connect before it needs to.
pub fn resolve<'a, F>(node_file: &Path, tags: &RoleTags, inventory: F) -> Result<RolePartition>
where
    F: FnOnce() -> Result<&'a dyn Inventory>,
{
    match config::load(node_file, tags)? {
        Some(partition) if !partition.is_empty() => {
            partition.log_summary();
            return Ok(partition);
        }
        Some(_) => warn!(
            "node file {} loaded but defines no nodes, falling back to tag discovery",
            node_file.display()
        ),
        None => info!(
            "{} not found, attempting tag-based discovery",
            node_file.display()
        ),
    }

    discover(inventory()?, tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_merge_roles() {
        let partition = RolePartition::from_vms(vec![
            Vm::new("pve1", 100).with_roles([Role::Server]),
            Vm::new("pve1", 100).with_roles([Role::Storage]),
            Vm::new("pve1", 101).with_roles([Role::Agent]),
        ]);
        assert_eq!(partition.len(), 2);
        assert_eq!(partition.servers().count(), 1);
        assert_eq!(partition.storage().count(), 1);
        assert_eq!(partition.master().map(|vm| vm.vmid()), Some(100));
    }

    #[test]
    fn master_is_first_sorted_server() {
        let partition = RolePartition::from_vms(vec![
            Vm::new("pve2", 100).with_roles([Role::Server]),
            Vm::new("pve1", 300).with_roles([Role::Server]),
            Vm::new("pve1", 120).with_roles([Role::Agent]),
            Vm::new("pve1", 200).with_roles([Role::Server]),
        ]);
        let master = partition.master().unwrap();
        assert_eq!(master.id, VmId::new("pve1", 200));
        let rest: Vec<String> = partition
            .non_master_servers()
            .map(|vm| vm.id.to_string())
            .collect();
        assert_eq!(rest, vec!["pve1:300", "pve2:100"]);
    }

    #[test]
    fn no_servers_means_no_master() {
        let partition =
            RolePartition::from_vms(vec![Vm::new("pve1", 100).with_roles([Role::Agent])]);
        assert!(partition.master().is_none());
        assert_eq!(partition.non_master_servers().count(), 0);
    }
}
