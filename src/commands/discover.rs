// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::{
    cluster,
    commands::Context,
    config::NodeFile,
    error::{Error, Result},
};

/// Discover nodes by tag, ignoring any node file, and print them in node file format so the
/// output can be saved and edited.
pub fn discover(context: &Context) -> Result<()> {
    let partition = cluster::discover(context.inventory()?, &context.settings.tags)?;
    let node_file = NodeFile::from_partition(&partition);
    let json = serde_json::to_string_pretty(&node_file)
        .map_err(|e| Error::Unexpected(format!("could not serialize node file: {e}")))?;
    println!("{json}");
    Ok(())
}
