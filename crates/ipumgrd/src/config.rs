//! Daemon configuration.
//!
//! All knobs are fixed at startup; the resulting [`DaemonConfig`] is
//! immutable and cloned into the services that need it.

use clap::Parser;
use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::types::Mode;

/// Startup configuration for the port-manager daemon.
#[derive(Parser, Debug, Clone)]
#[command(name = "ipumgrd", about = "Port provisioning daemon for IPU offload cards")]
pub struct DaemonConfig {
    /// Attachment mode: "host" on the server, "ipu" on the card.
    #[arg(long, default_value = "host")]
    pub mode: Mode,

    /// Host-side control-plane IP address.
    #[arg(long = "host-ip", default_value = "192.168.1.1")]
    pub host_ip: Ipv4Addr,

    /// Card-side control-plane IP address.
    #[arg(long = "ipu-ip", default_value = "192.168.1.2")]
    pub ipu_ip: Ipv4Addr,

    /// TCP port of the control endpoint.
    #[arg(long, default_value_t = 50151)]
    pub port: u16,

    /// Path to the forwarding-rule compiler binary.
    #[arg(long = "rule-compiler", default_value = "/opt/p4/p4-cp-nws/bin/p4rt-ctl")]
    pub rule_compiler: String,

    /// Name of the OVS bridge holding function ports.
    #[arg(long = "bridge", default_value = "br-vf")]
    pub bridge_name: String,

    /// Directory containing the OVS CLI tools.
    #[arg(long = "ovs-cli-dir", default_value = "/usr/bin")]
    pub ovs_cli_dir: String,

    /// Management-controller SSH endpoint.
    #[arg(long = "imc-address", default_value = "192.168.0.1:22")]
    pub imc_address: String,

    /// Local path of the package uploaded during reprovisioning.
    #[arg(long = "override-package", default_value = "/rh_mvp.pkg")]
    pub override_package: PathBuf,
}

impl DaemonConfig {
    /// Returns a configuration with defaults, for tests and embedding.
    pub fn for_mode(mode: Mode) -> Self {
        let mut config = Self::parse_from(["ipumgrd"]);
        config.mode = mode;
        config
    }
}
