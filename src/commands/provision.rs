// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use log::info;

use crate::{
    cluster::RolePartition,
    commands::Context,
    error::{Error, Result},
    settings::Settings,
    vm::Vm,
};

pub fn provision(context: &Context) -> Result<()> {
    let nodes = context.nodes()?;
    plan(&nodes, &context.settings)
}

fn names<'a>(vms: impl Iterator<Item = &'a Vm>) -> String {
    let names: Vec<String> = vms.map(|vm| vm.to_string()).collect();
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}

/// Log the deployment plan for `nodes`. Fails if there is no server to act as master.
pub fn plan(nodes: &RolePartition, settings: &Settings) -> Result<()> {
    let master = nodes.master().ok_or_else(|| {
        Error::Provision("no server nodes found, cannot select a master".to_string())
    })?;

    info!("provisioning K3s {} cluster", settings.k3s_version);
    info!("  master server: {master}");
    info!("  other servers: {}", names(nodes.non_master_servers()));
    info!("  agents: {}", names(nodes.agents()));
    info!("  storage: {}", names(nodes.storage()));
    info!("  kube-vip {} on VIP {}", settings.kube_vip_version, settings.vip_address);
    info!("  load balancer range: {}", settings.loadbalancer_range);
    info!("  remote user: {}", settings.remote_user);
    info!("K3s installation steps are not performed by this tool");
    Ok(())
}
