//! Shell command builders for bridge, address and driver operations

use ipu_mgr_common::shell::{self, shellquote};
use std::net::Ipv4Addr;

/// Name of the OVS CLI binary under the configured tool directory.
pub const OVS_VSCTL: &str = "ovs-vsctl";

/// Kernel driver for the card's host-side net devices.
pub const IDPF_DRIVER: &str = "idpf";

/// Prefix length used for control-channel addresses.
pub const CONTROL_PREFIX_LEN: u8 = 24;

/// Build an idempotent OVS bridge creation command
pub fn build_ensure_bridge_cmd(ovs_cli_dir: &str, bridge: &str) -> String {
    format!(
        "{}/{} --may-exist add-br {}",
        ovs_cli_dir,
        OVS_VSCTL,
        shellquote(bridge)
    )
}

/// Build an idempotent OVS bridge deletion command
pub fn build_delete_bridge_cmd(ovs_cli_dir: &str, bridge: &str) -> String {
    format!(
        "{}/{} --may-exist del-br {}",
        ovs_cli_dir,
        OVS_VSCTL,
        shellquote(bridge)
    )
}

/// Build an OVS port attach command
pub fn build_attach_port_cmd(ovs_cli_dir: &str, bridge: &str, port: &str) -> String {
    format!(
        "{}/{} add-port {} {}",
        ovs_cli_dir,
        OVS_VSCTL,
        shellquote(bridge),
        shellquote(port)
    )
}

/// Build an OVS port detach command
pub fn build_detach_port_cmd(ovs_cli_dir: &str, bridge: &str, port: &str) -> String {
    format!(
        "{}/{} del-port {} {}",
        ovs_cli_dir,
        OVS_VSCTL,
        shellquote(bridge),
        shellquote(port)
    )
}

/// Build an address assignment command for a device
pub fn build_addr_add_cmd(iface: &str, ip: Ipv4Addr, prefix_len: u8) -> String {
    format!(
        "{} addr add {}/{} dev {}",
        shell::IP_CMD,
        ip,
        prefix_len,
        shellquote(iface)
    )
}

/// Build an IPv4 address listing command for a device
pub fn build_addr_show_cmd(iface: &str) -> String {
    format!(
        "{} -4 -o addr show dev {}",
        shell::IP_CMD,
        shellquote(iface)
    )
}

/// Build a link-up command for a device
pub fn build_link_up_cmd(iface: &str) -> String {
    format!("{} link set dev {} up", shell::IP_CMD, shellquote(iface))
}

/// Build a NetworkManager daemon liveness probe
pub fn build_nm_status_cmd() -> String {
    format!("{} general status", shell::NMCLI_CMD)
}

/// Build a connection activation probe for a device
pub fn build_conn_state_cmd(iface: &str) -> String {
    format!(
        "{} -g GENERAL.STATE con show {} | {} activated",
        shell::NMCLI_CMD,
        shellquote(iface),
        shell::GREP_CMD
    )
}

/// Build a connection profile creation command for a device
pub fn build_conn_add_cmd(iface: &str, ip: Ipv4Addr, prefix_len: u8) -> String {
    let quoted = shellquote(iface);
    format!(
        "{} connection add type ethernet ifname {} con-name {} ip4 {}/{}",
        shell::NMCLI_CMD,
        quoted,
        quoted,
        ip,
        prefix_len
    )
}

/// Build a loaded-driver probe
pub fn build_driver_check_cmd() -> String {
    format!("{} | {} {}", shell::LSMOD_CMD, shell::GREP_CMD, IDPF_DRIVER)
}

/// Build a driver unload command
pub fn build_driver_remove_cmd() -> String {
    format!("{} {}", shell::RMMOD_CMD, IDPF_DRIVER)
}

/// Build a driver load command
pub fn build_driver_load_cmd() -> String {
    format!("{} {}", shell::MODPROBE_CMD, IDPF_DRIVER)
}
