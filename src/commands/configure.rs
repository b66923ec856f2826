// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;
use log::{info, warn};

use crate::{
    commands::Context,
    config,
    error::Result,
    network::{self, AddressRange, ConvergeOptions, NetworkTarget},
};

#[derive(Args, Debug, Clone)]
pub struct ConfigureArgs {
    /// Write the configuration even to VMs that already match it.
    #[arg(short, long)]
    pub force: bool,

    /// Restart the modified VMs so that cloud-init applies the new settings.
    #[arg(short, long)]
    pub restart: bool,
}

pub fn configure_ips(context: &Context, args: &ConfigureArgs) -> Result<()> {
    let settings = &context.settings;
    let range = AddressRange::parse(&settings.network.range_start, &settings.network.range_end)?;
    let target = NetworkTarget::from_settings(&settings.network)?;

    let mut nodes = context.nodes()?;
    let inventory = context.inventory()?;

    let options = ConvergeOptions {
        force: args.force,
        restart_after: args.restart,
        ssh_key: network::resolve_ssh_key(
            settings.ssh_public_key.as_deref(),
            config::ssh_key(&settings.node_file).as_deref(),
            &settings.ssh_public_key_path,
        ),
    };

    info!("configuring {} VM(s) from range {range}", nodes.len());
    let ledger = network::converge(inventory, nodes.all_mut(), range, &target, &options);

    info!(
        "{} VM(s) assigned an address, {} modified, {} failed",
        ledger.assigned.len(),
        ledger.modified.len(),
        ledger.failed.len()
    );
    for (vm, failure) in ledger.failed.iter() {
        warn!("{vm} was not configured: {failure:?}");
    }
    Ok(())
}
