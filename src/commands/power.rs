// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use log::{info, warn};

use crate::{
    commands::Context,
    error::Result,
    lifecycle::{self, LifecycleAction},
};

/// Apply a power action to every managed VM. Per-VM failures are reported but do not fail the
/// command.
pub fn power(context: &Context, action: LifecycleAction) -> Result<()> {
    let mut nodes = context.nodes()?;
    let inventory = context.inventory()?;

    let report = lifecycle::apply(inventory, action, nodes.all_mut());

    info!(
        "VM action '{action}': {} issued, {} already in state, {} failed",
        report.issued.len(),
        report.unchanged.len(),
        report.failed.len()
    );
    if !report.failed.is_empty() {
        let failed: Vec<String> = report.failed.iter().map(|id| id.to_string()).collect();
        warn!("VM action '{action}' failed for: {}", failed.join(", "));
    }
    Ok(())
}
