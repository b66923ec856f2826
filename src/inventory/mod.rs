// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The remote inventory: everything this tool knows how to ask of the hypervisor cluster.
//!
//! Components take an `&dyn Inventory` rather than building their own client, so a single
//! connection is shared by a whole command and tests can substitute an in-memory cluster.

use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::{
    error::{Error, Result},
    vm::{VmAttributes, VmId, VmStatus},
};

pub mod proxmox;

/// Power actions understood by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerAction {
    Start,
    /// A graceful stop. Sent to the hypervisor as "shutdown".
    Stop,
    Shutdown,
    Reboot,
}

impl PowerAction {
    /// The action name used on the wire.
    pub fn api_action(&self) -> &'static str {
        match self {
            PowerAction::Start => "start",
            PowerAction::Stop | PowerAction::Shutdown => "shutdown",
            PowerAction::Reboot => "reboot",
        }
    }
}

impl fmt::Display for PowerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                PowerAction::Start => "start",
                PowerAction::Stop => "stop",
                PowerAction::Shutdown => "shutdown",
                PowerAction::Reboot => "reboot",
            }
        )
    }
}

impl FromStr for PowerAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "start" => Ok(PowerAction::Start),
            "stop" => Ok(PowerAction::Stop),
            "shutdown" => Ok(PowerAction::Shutdown),
            "reboot" => Ok(PowerAction::Reboot),
            other => Err(Error::InvalidAction(format!(
                "'{other}' is not a VM power action; expected one of start, stop, shutdown, reboot"
            ))),
        }
    }
}

/// The operations the core needs from the hypervisor cluster.
pub trait Inventory {
    /// Names of the hypervisor hosts in the cluster.
    fn list_hosts(&self) -> Result<Vec<String>>;

    /// Ids of the VMs on `host`.
    fn list_vm_ids(&self, host: &str) -> Result<Vec<u32>>;

    fn vm_attributes(&self, vm: &VmId) -> Result<VmAttributes>;

    fn vm_status(&self, vm: &VmId) -> Result<VmStatus>;

    /// Write configuration attributes to a VM. Returns the provider's opaque result.
    fn set_vm_attributes(&self, vm: &VmId, attributes: &BTreeMap<String, String>)
        -> Result<String>;

    /// Issue a power action. Returns the provider's task handle.
    fn power_action(&self, vm: &VmId, action: PowerAction) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_a_shutdown_on_the_wire() {
        assert_eq!(PowerAction::Stop.api_action(), "shutdown");
        assert_eq!(PowerAction::Stop.to_string(), "stop");
        assert_eq!(PowerAction::Reboot.api_action(), "reboot");
    }

    #[test]
    fn unknown_action_is_rejected() {
        assert_eq!("reboot".parse::<PowerAction>().unwrap(), PowerAction::Reboot);
        assert!(matches!(
            "restart".parse::<PowerAction>(),
            Err(Error::InvalidAction(_))
        ));
    }
}
