// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! An in-memory hypervisor cluster for tests.
//!
//! `FakeInventory` answers the same calls as the real client, records every call it receives,
//! and can be told to fail specific calls for specific VMs so that tests can exercise the
//! partial-failure paths.

use std::{
    cell::RefCell,
    collections::{BTreeMap, BTreeSet},
};

use crate::{
    error::{Error, Result},
    inventory::{Inventory, PowerAction},
    vm::{VmAttributes, VmId, VmStatus},
};

/// A call received by the fake inventory.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListHosts,
    ListVms(String),
    Attributes(VmId),
    Status(VmId),
    SetAttributes(VmId, BTreeMap<String, String>),
    Power(VmId, PowerAction),
}

/// A per-VM operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Op {
    Attributes,
    Status,
    SetAttributes,
    Power,
}

#[derive(Debug, Clone)]
pub struct FakeVm {
    pub attributes: VmAttributes,
    pub status: VmStatus,
}

#[derive(Debug, Default)]
pub struct FakeInventory {
    hosts: Vec<String>,
    hosts_unreachable: bool,
    failing_hosts: BTreeSet<String>,
    vms: RefCell<BTreeMap<VmId, FakeVm>>,
    failing: BTreeSet<(VmId, Op)>,
    calls: RefCell<Vec<Call>>,
}

impl FakeInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str) -> Self {
        if !self.hosts.iter().any(|h| h == host) {
            self.hosts.push(host.to_string());
        }
        self
    }

    /// Add a VM with the given raw `tags` attribute and status. The host is added if needed.
    pub fn with_vm(self, host: &str, vmid: u32, tags: &str, status: VmStatus) -> Self {
        let attributes = VmAttributes {
            name: Some(format!("vm{vmid}")),
            tags: if tags.is_empty() {
                None
            } else {
                Some(tags.to_string())
            },
            ..VmAttributes::default()
        };
        self.with_vm_attributes(host, vmid, attributes, status)
    }

    pub fn with_vm_attributes(
        self,
        host: &str,
        vmid: u32,
        attributes: VmAttributes,
        status: VmStatus,
    ) -> Self {
        let this = self.with_host(host);
        this.vms
            .borrow_mut()
            .insert(VmId::new(host, vmid), FakeVm { attributes, status });
        this
    }

    /// Make `op` fail for the given VM.
    pub fn failing(mut self, host: &str, vmid: u32, op: Op) -> Self {
        self.failing.insert((VmId::new(host, vmid), op));
        self
    }

    /// Make listing the VMs of `host` fail.
    pub fn failing_host(mut self, host: &str) -> Self {
        self.failing_hosts.insert(host.to_string());
        self
    }

    /// Make listing the cluster's hosts fail.
    pub fn unreachable(mut self) -> Self {
        self.hosts_unreachable = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    /// Power actions received, in order.
    pub fn power_actions(&self) -> Vec<(VmId, PowerAction)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::Power(id, action) => Some((id.clone(), *action)),
                _ => None,
            })
            .collect()
    }

    /// Attribute writes received, in order.
    pub fn writes(&self) -> Vec<(VmId, BTreeMap<String, String>)> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| match call {
                Call::SetAttributes(id, update) => Some((id.clone(), update.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn vm(&self, host: &str, vmid: u32) -> Option<FakeVm> {
        self.vms.borrow().get(&VmId::new(host, vmid)).cloned()
    }

    fn record(&self, call: Call) {
        self.calls.borrow_mut().push(call);
    }

    fn check(&self, vm: &VmId, op: Op) -> Result<()> {
        if self.failing.contains(&(vm.clone(), op)) {
            return Err(Error::provider_with_detail(
                format!("{op:?} failed for VM {vm}"),
                "595 connection refused",
            ));
        }
        Ok(())
    }

    fn lookup(&self, vm: &VmId) -> Result<FakeVm> {
        self.vms
            .borrow()
            .get(vm)
            .cloned()
            .ok_or_else(|| Error::provider_with_detail(format!("VM {vm} not found"), "500"))
    }
}

impl Inventory for FakeInventory {
    fn list_hosts(&self) -> Result<Vec<String>> {
        self.record(Call::ListHosts);
        if self.hosts_unreachable {
            return Err(Error::provider("cluster unreachable"));
        }
        let mut hosts = self.hosts.clone();
        hosts.sort();
        Ok(hosts)
    }

    fn list_vm_ids(&self, host: &str) -> Result<Vec<u32>> {
        self.record(Call::ListVms(host.to_string()));
        if self.failing_hosts.contains(host) {
            return Err(Error::provider(format!("host {host} unreachable")));
        }
        Ok(self
            .vms
            .borrow()
            .keys()
            .filter(|id| id.host == host)
            .map(|id| id.vmid)
            .collect())
    }

    fn vm_attributes(&self, vm: &VmId) -> Result<VmAttributes> {
        self.record(Call::Attributes(vm.clone()));
        self.check(vm, Op::Attributes)?;
        Ok(self.lookup(vm)?.attributes)
    }

    fn vm_status(&self, vm: &VmId) -> Result<VmStatus> {
        self.record(Call::Status(vm.clone()));
        self.check(vm, Op::Status)?;
        Ok(self.lookup(vm)?.status)
    }

    fn set_vm_attributes(
        &self,
        vm: &VmId,
        attributes: &BTreeMap<String, String>,
    ) -> Result<String> {
        self.record(Call::SetAttributes(vm.clone(), attributes.clone()));
        self.check(vm, Op::SetAttributes)?;
        let mut vms = self.vms.borrow_mut();
        let fake = vms
            .get_mut(vm)
            .ok_or_else(|| Error::provider(format!("VM {vm} not found")))?;
        fake.attributes.apply_update(attributes);
        Ok(String::new())
    }

    fn power_action(&self, vm: &VmId, action: PowerAction) -> Result<String> {
        self.record(Call::Power(vm.clone(), action));
        self.check(vm, Op::Power)?;
        let mut vms = self.vms.borrow_mut();
        let fake = vms
            .get_mut(vm)
            .ok_or_else(|| Error::provider(format!("VM {vm} not found")))?;
        fake.status = match action {
            PowerAction::Start | PowerAction::Reboot => VmStatus::Running,
            PowerAction::Stop | PowerAction::Shutdown => VmStatus::Stopped,
        };
        Ok(format!("UPID:{}:{}:{}", vm.host, vm.vmid, action.api_action()))
    }
}
