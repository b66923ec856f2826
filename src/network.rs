// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Static network configuration of the managed VMs.
//!
//! Addresses are handed out from a fixed range in (host, vmid) order, so a node keeps the same
//! address across runs as long as the node set does not change. Configuration is only written to
//! a VM when it differs from the target (or when forced), which makes repeated runs cheap and
//! lets the caller know exactly which VMs need a restart.

use std::{collections::BTreeMap, net::Ipv4Addr, path::Path};

use {
    log::{debug, error, info, warn},
    percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC},
};

use crate::{
    error::{Error, Handle, Result},
    inventory::Inventory,
    lifecycle::{self, LifecycleAction, Transition},
    settings::NetworkSettings,
    vm::{Vm, VmAttributes, VmId, VmStatus},
};

/// Characters left as-is when URL-encoding an SSH key for the hypervisor.
const SSH_KEY_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// An inclusive range of IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddressRange {
    pub start: Ipv4Addr,
    pub end: Ipv4Addr,
}

impl AddressRange {
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        let parse = |addr: &str| {
            addr.trim().parse::<Ipv4Addr>().map_err(|e| {
                Error::Configuration(format!("invalid IP address '{addr}' in range: {e}"))
            })
        };
        Ok(AddressRange {
            start: parse(start)?,
            end: parse(end)?,
        })
    }

    pub fn cursor(&self) -> AddressCursor {
        AddressCursor {
            next: u64::from(u32::from(self.start)),
            end: u64::from(u32::from(self.end)),
        }
    }
}

impl std::fmt::Display for AddressRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.start, self.end)
    }
}

/// The next address to hand out from a range. It only ever moves forward, one position per node.
#[derive(Debug, Clone)]
pub struct AddressCursor {
    // Wider than an address so that advancing past 255.255.255.255 is still "exhausted".
    next: u64,
    end: u64,
}

impl AddressCursor {
    /// The address at the cursor, or `None` once the range is exhausted.
    pub fn current(&self) -> Option<Ipv4Addr> {
        if self.next > self.end {
            return None;
        }
        u32::try_from(self.next).ok().map(Ipv4Addr::from)
    }

    pub fn advance(&mut self) {
        self.next += 1;
    }
}

/// The network configuration every node should converge to. Only the address differs per node.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkTarget {
    pub cidr: u8,
    pub gateway: String,
    pub dns_servers: Vec<String>,
    pub search_domain: Option<String>,
    pub ipconfig_index: u8,
}

impl NetworkTarget {
    pub fn from_settings(settings: &NetworkSettings) -> Result<Self> {
        if settings.cidr > 32 {
            return Err(Error::Configuration(format!(
                "network prefix length must be at most 32, got {}",
                settings.cidr
            )));
        }
        Ok(NetworkTarget {
            cidr: settings.cidr,
            gateway: settings.gateway.clone(),
            dns_servers: settings.dns_servers.clone(),
            search_domain: settings.search_domain.clone(),
            ipconfig_index: settings.ipconfig_index,
        })
    }

    /// e.g. "ip=10.10.0.201/24,gw=10.10.0.1"
    pub fn ipconfig(&self, addr: Ipv4Addr) -> String {
        format!("ip={addr}/{},gw={}", self.cidr, self.gateway)
    }

    /// DNS servers, space separated.
    pub fn nameserver(&self) -> String {
        self.dns_servers.join(" ")
    }

    pub fn searchdomain(&self) -> String {
        self.search_domain.clone().unwrap_or_default()
    }

    /// Whether `current` differs from what this target would write for `addr`. An empty target
    /// nameserver or search domain is not compared.
    pub fn differs(&self, current: &VmAttributes, addr: Ipv4Addr) -> bool {
        let nameserver = self.nameserver();
        let searchdomain = self.searchdomain();
        current.ipconfig(self.ipconfig_index).unwrap_or("") != self.ipconfig(addr)
            || (!nameserver.is_empty()
                && current.nameserver.as_deref().unwrap_or("") != nameserver)
            || (!searchdomain.is_empty()
                && current.searchdomain.as_deref().unwrap_or("") != searchdomain)
    }

    /// The attribute update to write for `addr`, including the SSH key if one is given.
    pub fn attributes(&self, addr: Ipv4Addr, ssh_key: Option<&str>) -> BTreeMap<String, String> {
        let mut update = BTreeMap::new();
        update.insert(
            VmAttributes::ipconfig_key(self.ipconfig_index),
            self.ipconfig(addr),
        );
        let nameserver = self.nameserver();
        if !nameserver.is_empty() {
            update.insert("nameserver".to_string(), nameserver);
        }
        let searchdomain = self.searchdomain();
        if !searchdomain.is_empty() {
            update.insert("searchdomain".to_string(), searchdomain);
        }
        if let Some(key) = ssh_key {
            update.insert(
                "sshkeys".to_string(),
                utf8_percent_encode(key, SSH_KEY_SET).to_string(),
            );
        }
        update
    }
}

/// Options for one convergence pass.
#[derive(Debug, Clone, Default)]
pub struct ConvergeOptions {
    /// Write the configuration even to VMs that already match.
    pub force: bool,
    /// Restart every modified VM once the pass is over.
    pub restart_after: bool,
    pub ssh_key: Option<String>,
}

/// Why a node was not configured.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeFailure {
    /// No address was left in the range for this node.
    Exhausted,
    /// The node's current configuration could not be fetched.
    Fetch(String),
    /// The configuration write failed.
    Write(String),
}

/// The record of one convergence pass.
#[derive(Debug, Default)]
pub struct ModificationLedger {
    /// Address slot assigned to each node that got one, in processing order.
    pub assigned: Vec<(VmId, Ipv4Addr)>,
    /// VMs whose configuration was actually written.
    pub modified: Vec<VmId>,
    /// The modified VMs that were running when written; they need a restart to pick up the
    /// change.
    pub running_modified: Vec<VmId>,
    pub failed: Vec<(VmId, NodeFailure)>,
    /// VMs whose post-configuration restart could not be issued.
    pub restart_failed: Vec<VmId>,
}

impl ModificationLedger {
    pub fn is_modified(&self, vm: &VmId) -> bool {
        self.modified.contains(vm)
    }

    pub fn address_of(&self, vm: &VmId) -> Option<Ipv4Addr> {
        self.assigned
            .iter()
            .find(|(id, _)| id == vm)
            .map(|(_, addr)| *addr)
    }
}

/// Resolve the SSH public key to inject into VMs.
///
/// The sources are tried in order: a key given directly, the `ssh_key` field of the node file,
/// then the contents of the key file. The first non-empty one wins.
pub fn resolve_ssh_key(
    direct: Option<&str>,
    node_file_key: Option<&str>,
    key_path: &Path,
) -> Option<String> {
    if let Some(key) = direct.map(str::trim).filter(|k| !k.is_empty()) {
        info!("using SSH public key from K3S_SSH_PUBLIC_KEY");
        return Some(key.to_string());
    }
    if let Some(key) = node_file_key.map(str::trim).filter(|k| !k.is_empty()) {
        info!("using SSH public key from the node file");
        return Some(key.to_string());
    }
    match std::fs::read_to_string(key_path) {
        Ok(contents) if !contents.trim().is_empty() => {
            info!("using SSH public key from {}", key_path.display());
            Some(contents.trim().to_string())
        }
        Ok(_) => {
            warn!("SSH key file {} is empty", key_path.display());
            None
        }
        Err(e) => {
            warn!(
                "could not read SSH key file {}: {e}; SSH key deployment will be skipped",
                key_path.display()
            );
            None
        }
    }
}

/// Converge the network configuration of `nodes`, which must already be in (host, vmid) order.
///
/// Each node consumes one address from `range` whether or not its configuration had to be
/// written, and whether or not the write succeeded; only a node that finds the range exhausted
/// consumes nothing. Per-node failures are recorded in the ledger and never stop the pass.
pub fn converge(
    inventory: &dyn Inventory,
    nodes: &mut [Vm],
    range: AddressRange,
    target: &NetworkTarget,
    options: &ConvergeOptions,
) -> ModificationLedger {
    let mut ledger = ModificationLedger::default();
    if nodes.is_empty() {
        warn!("no VMs discovered or loaded, skipping network configuration");
        return ledger;
    }
    if options.ssh_key.is_none() {
        warn!("no SSH public key found, VM configuration will only include network settings");
    }

    let mut cursor = range.cursor();
    let ipconfig_key = VmAttributes::ipconfig_key(target.ipconfig_index);

    for vm in nodes.iter_mut() {
        info!("processing {vm} for IP configuration");

        let status = inventory.vm_status(&vm.id).unwrap_or_else(|e| {
            warn!("could not get status for {vm}, assuming unknown: {e}");
            VmStatus::Unknown
        });
        vm.status = Some(status.clone());

        let needs_fetch = vm
            .attributes
            .as_ref()
            .map_or(true, |attrs| !attrs.other.contains_key(&ipconfig_key));
        if needs_fetch {
            match inventory.vm_attributes(&vm.id) {
                Ok(attributes) => {
                    if attributes.name.is_some() {
                        vm.name = attributes.name.clone();
                    }
                    vm.attributes = Some(attributes);
                }
                Err(e) => {
                    error!("could not get config for {vm}, skipping: {e}");
                    ledger.failed.push((vm.id.clone(), NodeFailure::Fetch(e.to_string())));
                    cursor.advance();
                    continue;
                }
            }
        }

        let Some(addr) = cursor.current() else {
            error!("no more IP addresses available in the range {range}; cannot configure {vm}");
            ledger.failed.push((vm.id.clone(), NodeFailure::Exhausted));
            continue;
        };
        ledger.assigned.push((vm.id.clone(), addr));

        let current = vm.attributes.clone().unwrap_or_default();
        if !options.force && !target.differs(&current, addr) {
            info!(
                "{} on {} is already configured with IP {addr}, skipping",
                vm.display_name(),
                vm.host()
            );
            vm.ip_address = Some(addr);
            cursor.advance();
            continue;
        }

        info!(
            "assigning IP {addr}/{}, GW {}, DNS '{}' to {}",
            target.cidr,
            target.gateway,
            target.nameserver(),
            vm.display_name()
        );
        let update = target.attributes(addr, options.ssh_key.as_deref());
        let written = inventory.set_vm_attributes(&vm.id, &update).handle_err(|e| {
            error!("skipping IP configuration for {}: {e}", vm.display_name());
            if let Some(detail) = e.detail() {
                error!("  provider detail: {detail}");
            }
            ledger.failed.push((vm.id.clone(), NodeFailure::Write(e.to_string())));
        });
        if let Ok(result) = written {
            debug!("configuration written to {vm}: {result}");
            vm.ip_address = Some(addr);
            if let Some(attributes) = vm.attributes.as_mut() {
                attributes.apply_update(&update);
            }
            ledger.modified.push(vm.id.clone());
            if status == VmStatus::Running {
                ledger.running_modified.push(vm.id.clone());
                if !options.restart_after {
                    info!(
                        "{} needs a reboot for cloud-init to apply these settings",
                        vm.display_name()
                    );
                }
            }
        }

        cursor.advance();
    }

    if options.restart_after {
        restart_modified(inventory, nodes, &mut ledger);
    } else if !ledger.running_modified.is_empty() {
        let names: Vec<String> = nodes
            .iter()
            .filter(|vm| ledger.running_modified.contains(&vm.id))
            .map(Vm::display_name)
            .collect();
        warn!(
            "the following running VMs were modified and need a restart for cloud-init changes \
             to apply: {}",
            names.join(", ")
        );
    }

    info!("VM network configuration completed");
    ledger
}

/// Restart every VM in the ledger using the status observed during the pass: running VMs are
/// rebooted, anything else is started.
fn restart_modified(inventory: &dyn Inventory, nodes: &[Vm], ledger: &mut ModificationLedger) {
    if ledger.modified.is_empty() {
        return;
    }
    info!("restarting modified VMs as requested");
    for vm in nodes.iter().filter(|vm| ledger.modified.contains(&vm.id)) {
        let status = vm.status.clone().unwrap_or(VmStatus::Unknown);
        let Transition::Issue(action) = lifecycle::plan(LifecycleAction::Restart, &status) else {
            continue;
        };
        match inventory.power_action(&vm.id, action) {
            Ok(task) => info!("restart of {vm} initiated ({action}), task {task}"),
            Err(e) => {
                error!("failed to restart VM {vm}: {e}");
                ledger.restart_failed.push(vm.id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> NetworkTarget {
        NetworkTarget {
            cidr: 24,
            gateway: "10.10.0.1".to_string(),
            dns_servers: vec!["10.10.0.1".to_string(), "1.1.1.1".to_string()],
            search_domain: Some("lan.example".to_string()),
            ipconfig_index: 0,
        }
    }

    #[test]
    fn cursor_stops_at_end_of_range() {
        let range = AddressRange::parse("10.10.0.201", "10.10.0.202").unwrap();
        let mut cursor = range.cursor();
        assert_eq!(cursor.current(), Some(Ipv4Addr::new(10, 10, 0, 201)));
        cursor.advance();
        assert_eq!(cursor.current(), Some(Ipv4Addr::new(10, 10, 0, 202)));
        cursor.advance();
        assert_eq!(cursor.current(), None);
    }

    #[test]
    fn cursor_at_top_of_address_space() {
        let range = AddressRange::parse("255.255.255.255", "255.255.255.255").unwrap();
        let mut cursor = range.cursor();
        assert!(cursor.current().is_some());
        cursor.advance();
        assert_eq!(cursor.current(), None);
    }

    #[test]
    fn bad_range_is_a_configuration_error() {
        assert!(matches!(
            AddressRange::parse("10.10.0.300", "10.10.0.310"),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn target_strings() {
        let t = target();
        assert_eq!(t.ipconfig(Ipv4Addr::new(10, 10, 0, 201)), "ip=10.10.0.201/24,gw=10.10.0.1");
        assert_eq!(t.nameserver(), "10.10.0.1 1.1.1.1");
    }

    #[test]
    fn divergence_checks() {
        let t = target();
        let addr = Ipv4Addr::new(10, 10, 0, 201);
        let mut current = VmAttributes::default();
        assert!(t.differs(&current, addr));

        current.set_ipconfig(0, "ip=10.10.0.201/24,gw=10.10.0.1");
        current.nameserver = Some("10.10.0.1 1.1.1.1".to_string());
        current.searchdomain = Some("lan.example".to_string());
        assert!(!t.differs(&current, addr));
        assert!(t.differs(&current, Ipv4Addr::new(10, 10, 0, 202)));

        // Empty target values are not compared.
        let relaxed = NetworkTarget {
            dns_servers: Vec::new(),
            search_domain: None,
            ..target()
        };
        current.nameserver = Some("8.8.8.8".to_string());
        current.searchdomain = None;
        assert!(!relaxed.differs(&current, addr));
    }

    #[test]
    fn ssh_key_is_url_encoded() {
        let update = target().attributes(
            Ipv4Addr::new(10, 10, 0, 201),
            Some("ssh-ed25519 AAAA+b/c= me@host"),
        );
        assert_eq!(
            update.get("sshkeys").map(String::as_str),
            Some("ssh-ed25519%20AAAA%2Bb/c%3D%20me%40host")
        );
        assert_eq!(
            update.get("ipconfig0").map(String::as_str),
            Some("ip=10.10.0.201/24,gw=10.10.0.1")
        );
    }

    #[test]
    fn ssh_key_priority() {
        let dir = tempfile::tempdir().unwrap();
        let key_path = dir.path().join("id.pub");
        std::fs::write(&key_path, "ssh-rsa FROMFILE\n").unwrap();

        assert_eq!(
            resolve_ssh_key(Some("ssh-rsa DIRECT"), Some("ssh-rsa NODEFILE"), &key_path).as_deref(),
            Some("ssh-rsa DIRECT")
        );
        assert_eq!(
            resolve_ssh_key(Some("  "), Some("ssh-rsa NODEFILE"), &key_path).as_deref(),
            Some("ssh-rsa NODEFILE")
        );
        assert_eq!(
            resolve_ssh_key(None, None, &key_path).as_deref(),
            Some("ssh-rsa FROMFILE")
        );
        assert_eq!(resolve_ssh_key(None, None, &dir.path().join("missing.pub")), None);
    }
}
