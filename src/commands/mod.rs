// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod configure;
pub mod discover;
pub mod power;
pub mod provision;
pub mod version;

use std::cell::OnceCell;

use {
    configure::ConfigureArgs,
    version::CheckVersionArgs,
};

use clap::{Parser, Subcommand};

use crate::{
    cluster::{self, RolePartition},
    error::Result,
    inventory::{proxmox::ProxmoxClient, Inventory},
    lifecycle::LifecycleAction,
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Settings file to read instead of the default.
    #[arg(long, global = true)]
    pub settings: Option<String>,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start every managed VM that is not running.
    Start,
    /// Gracefully shut down every managed VM that is not stopped.
    Stop,
    /// Reboot running VMs and start the others.
    Restart,
    /// Assign static addresses and DNS settings to every managed VM.
    ConfigureIps(ConfigureArgs),
    /// Select the server master and report the deployment plan.
    Provision,
    /// Compare the configured K3s version with the latest release.
    CheckVersion(CheckVersionArgs),
    /// Discover VMs by role tag and print them in the node file format.
    Discover,
}

/// Context is what every command runs against: the loaded settings, and a connection to the
/// hypervisor cluster that is only opened the first time a command needs it.
pub struct Context {
    pub settings: Settings,
    client: OnceCell<ProxmoxClient>,
}

impl Context {
    pub fn new(settings: Settings) -> Self {
        Context {
            settings,
            client: OnceCell::new(),
        }
    }

    /// Gets the inventory, connecting on first use. The connection is reused for the rest of
    /// the command.
    pub fn inventory(&self) -> Result<&dyn Inventory> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = ProxmoxClient::connect(&self.settings.proxmox)?;
        Ok(self.client.get_or_init(|| client))
    }

    /// The node set for this command: the node file if it names any nodes, else tag discovery.
    pub fn nodes(&self) -> Result<RolePartition> {
        cluster::resolve(&self.settings.node_file, &self.settings.tags, || {
            self.inventory()
        })
    }
}

pub fn main(cli: &Cli) -> Result<()> {
    let settings = Settings::load(cli.settings.as_deref())?;
    let context = Context::new(settings);

    match &cli.command {
        Commands::Start => power::power(&context, LifecycleAction::Start),
        Commands::Stop => power::power(&context, LifecycleAction::Stop),
        Commands::Restart => power::power(&context, LifecycleAction::Restart),
        Commands::ConfigureIps(args) => configure::configure_ips(&context, args),
        Commands::Provision => provision::provision(&context),
        Commands::CheckVersion(args) => version::check_version(&context, args),
        Commands::Discover => discover::discover(&context),
    }
}
