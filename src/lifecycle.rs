// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::fmt;

use log::{error, info, warn};

use crate::{
    error::Handle,
    inventory::{Inventory, PowerAction},
    vm::{Vm, VmId, VmStatus},
};

/// The power operations a user can request for the whole node set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    /// Graceful shutdown.
    Stop,
    Restart,
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                LifecycleAction::Start => "start",
                LifecycleAction::Stop => "stop",
                LifecycleAction::Restart => "restart",
            }
        )
    }
}

/// What to do with one VM, given the requested action and its current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The VM is already in the requested state.
    AlreadyThere,
    Issue(PowerAction),
}

/// Decide the transition for a VM. A VM that is not running cannot be rebooted, so a restart of
/// such a VM starts it instead.
pub fn plan(action: LifecycleAction, status: &VmStatus) -> Transition {
    match (action, status) {
        (LifecycleAction::Start, VmStatus::Running) => Transition::AlreadyThere,
        (LifecycleAction::Start, _) => Transition::Issue(PowerAction::Start),
        (LifecycleAction::Stop, VmStatus::Stopped) => Transition::AlreadyThere,
        (LifecycleAction::Stop, _) => Transition::Issue(PowerAction::Stop),
        (LifecycleAction::Restart, VmStatus::Running) => Transition::Issue(PowerAction::Reboot),
        (LifecycleAction::Restart, _) => Transition::Issue(PowerAction::Start),
    }
}

/// Outcome of applying a lifecycle action to a node set.
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub issued: Vec<(VmId, PowerAction)>,
    pub unchanged: Vec<VmId>,
    /// VMs whose status could not be fetched or whose power action failed.
    pub failed: Vec<VmId>,
}

/// Apply `action` to every VM in `nodes`, in order.
///
/// Each VM's status is fetched first and recorded on the VM. A VM that cannot be reached is
/// reported and skipped; it never stops the action for the remaining VMs.
pub fn apply(inventory: &dyn Inventory, action: LifecycleAction, nodes: &mut [Vm]) -> LifecycleReport {
    let mut report = LifecycleReport::default();
    if nodes.is_empty() {
        warn!("no VMs discovered or loaded, skipping VM action '{action}'");
        return report;
    }

    info!("performing VM action '{action}' on {} VM(s)", nodes.len());
    for vm in nodes.iter_mut() {
        info!("processing {vm} for action '{action}'");

        let Ok(status) = inventory.vm_status(&vm.id).handle_err(|e| {
            error!("could not get status for {vm}, skipping: {e}");
            report.failed.push(vm.id.clone());
        }) else {
            continue;
        };
        vm.status = Some(status.clone());

        let power = match plan(action, &status) {
            Transition::AlreadyThere => {
                info!("VM {vm} is already {status}");
                report.unchanged.push(vm.id.clone());
                continue;
            }
            Transition::Issue(power) => power,
        };

        if action == LifecycleAction::Restart && power == PowerAction::Start {
            warn!("VM {vm} is not running (status '{status}'), starting it instead of rebooting");
        } else {
            info!("VM {vm} is '{status}', issuing {power}");
        }

        match inventory.power_action(&vm.id, power) {
            Ok(task) => {
                info!("initiated {} for VM {vm}, task {task}", power.api_action());
                report.issued.push((vm.id.clone(), power));
            }
            Err(e) => {
                error!("failed to {power} VM {vm}: {e}");
                if let Some(detail) = e.detail() {
                    error!("  provider detail: {detail}");
                }
                report.failed.push(vm.id.clone());
            }
        }
    }

    report
}
