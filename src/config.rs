use crate::error::{CompileError, Result};
use crate::stage3::PlacementMode;
use crate::structs::*;

use serde::Deserialize;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

/// Which captured packets are admitted into the flows
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CaptureFilter {
    pub tcp: bool,
    pub udp: bool,
    /// When not empty, one of the two ports must be listed
    pub ports: Vec<u16>,
    /// When not empty, one of the two addresses must be listed
    pub hosts: Vec<Ipv4Addr>,
}

impl Default for CaptureFilter {
    fn default() -> Self {
        CaptureFilter {
            tcp: true,
            udp: true,
            ports: vec![],
            hosts: vec![],
        }
    }
}

impl CaptureFilter {
    pub fn admits(&self, proto: L4Proto, key: &RawFlowKey) -> bool {
        let proto_ok = match proto {
            L4Proto::TCP => self.tcp,
            L4Proto::UDP => self.udp,
        };
        let port_ok = self.ports.is_empty()
            || self.ports.contains(&key.src_port)
            || self.ports.contains(&key.dst_port);
        let host_ok = self.hosts.is_empty()
            || self.hosts.contains(&key.src_ip)
            || self.hosts.contains(&key.dst_ip);
        proto_ok && port_ok && host_ok
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PlacementConfig {
    /// Refuse Large packets that would span several blocks
    pub strict: bool,
}

/// Script tag given to every flow using a port
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScriptRule {
    pub port: u16,
    pub tag: u32,
}

/// The compiler configuration. Every section is optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub filter: CaptureFilter,
    pub placement: PlacementConfig,
    pub scripts: Vec<ScriptRule>,
}

impl Configuration {
    pub fn placement_mode(&self) -> PlacementMode {
        if self.placement.strict {
            PlacementMode::Strict
        } else {
            PlacementMode::Lenient
        }
    }

    /// The tag of the first rule matching one of the ports of the flow
    pub fn script_for(&self, key: &FlowKey) -> Option<u32> {
        self.scripts
            .iter()
            .find(|r| key.has_port(r.port))
            .map(|r| r.tag)
    }
}

pub fn import_config(config: &str) -> Result<Configuration> {
    let config: Configuration = toml::from_str(config)?;
    log::debug!("Configuration: {config:?}");
    Ok(config)
}

pub fn import_config_file(path: &Path) -> Result<Configuration> {
    let config_str = fs::read_to_string(path).map_err(|source| CompileError::ConfigRead {
        path: path.display().to_string(),
        source,
    })?;
    let config = import_config(&config_str)?;
    log::info!("Configuration loaded from {}", path.display());
    Ok(config)
}
