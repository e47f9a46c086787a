//! Transport configuration assembly for oob-node

use crate::cli::Cli;
use anyhow::{Context, Result};
use oob_core::ProcessName;
use oob_tcp::TcpConfig;
use std::path::Path;

/// Load a JSON configuration file. Missing fields take their defaults.
pub fn load_config_file(path: &Path) -> Result<TcpConfig> {
    tracing::info!("Loading transport config from {:?}", path);
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config = TcpConfig::from_json(&content)?;
    Ok(config)
}

/// Start from the file (or defaults) and apply command line overrides.
pub fn build_config(cli: &Cli) -> Result<TcpConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_file(path)?,
        None => TcpConfig::default(),
    };
    config.local_name = ProcessName::new(cli.nspace.clone(), cli.rank)?;
    if let Some(version) = &cli.version_string {
        config.version = version.clone();
    }
    if let Some(addr) = cli.listen {
        config.listen_ipv4 = addr;
    }
    if !cli.ports.is_empty() {
        config.static_ipv4_ports = cli.ports.clone();
        config.dynamic_ipv4_ports = None;
    }
    if cli.ipv6 {
        config.disable_ipv6 = false;
    }
    config.validate()?;
    Ok(config)
}
