use anyhow::Result;
use emuexec_core::db::WorkspaceLayout;
use emuexec_core::services::emulator::{EmulationBackend, QemuUserBackend};
use serde::Serialize;

use crate::canonicalize_or_current;
use crate::commands::{load_config_or_default, print_json};

#[derive(Debug, Serialize)]
pub struct ArchitectureInfo {
    pub architecture: String,
    pub emulator: String,
    /// Whether the emulator resolves to an existing file (only checked for explicit dirs).
    pub available: Option<bool>,
}

/// Architecture -> emulator table for the workspace (or built-in defaults).
pub fn architecture_table(root: &str) -> Result<Vec<ArchitectureInfo>> {
    let root_path = canonicalize_or_current(root)?;
    let layout = WorkspaceLayout::new(&root_path);
    let config = load_config_or_default(&layout)?;
    let backend = QemuUserBackend::new(&config.emulator);

    Ok(config
        .emulator
        .targets
        .keys()
        .map(|arch| {
            let path = backend.emulator_path(arch);
            let available =
                path.parent().filter(|p| !p.as_os_str().is_empty()).map(|_| path.is_file());
            ArchitectureInfo {
                architecture: arch.clone(),
                emulator: path.display().to_string(),
                available,
            }
        })
        .collect())
}

pub fn list_architectures_command(root: &str, json: bool) -> Result<()> {
    let table = architecture_table(root)?;

    if json {
        return print_json(&table);
    }

    println!("Architectures ({}):", table.len());
    for info in table {
        let status = match info.available {
            Some(true) => " [ok]",
            Some(false) => " [missing]",
            None => "",
        };
        println!("  - {} -> {}{}", info.architecture, info.emulator, status);
    }
    Ok(())
}
