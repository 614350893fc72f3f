//! Unregistering devices and tearing the registry down.

use crate::cli_output;
use colored::*;
use xcoder_core::{Registry, XcoderError, XcoderResult};

/// Unregister every module of device `path`. An unregistered path is an error
/// so scripts notice typos.
pub fn run_remove(registry: &Registry, path: &str) -> XcoderResult<usize> {
    let removed = registry.remove_device(path)?;
    if removed == 0 {
        return Err(XcoderError::not_found(format!("{} is not registered", path)));
    }
    cli_output::success(&format!(
        "Removed {} ({})",
        path.cyan(),
        cli_output::modules(removed)
    ));
    Ok(removed)
}

/// Remove every registered device and the registry's own objects. With
/// `dry_run` only report what would go.
pub fn run_remove_all(registry: &Registry, dry_run: bool) -> XcoderResult<usize> {
    if !registry.paths().pool_shm().exists() {
        cli_output::empty(
            "No registry found",
            Some(&format!("looked in {}", registry.paths().root().display())),
        );
        return Ok(0);
    }

    if dry_run {
        let devices = registry.registered_devices()?;
        cli_output::info(&format!("Would remove {} device(s)", devices.len()));
        for device in &devices {
            cli_output::hint(device);
        }
        return Ok(0);
    }

    let removed = registry.remove_all_devices()?;
    cli_output::success(&format!(
        "Removed all devices ({})",
        cli_output::modules(removed)
    ));
    Ok(removed)
}
