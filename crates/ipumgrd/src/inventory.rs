//! Device inventory: enumeration and classification of host net devices.
//!
//! Interfaces are read from sysfs; IPv4 address presence comes from the
//! `ip` tool. Everything consumed by the provisioning services goes
//! through the [`DeviceInventory`] trait so tests can supply fixed
//! device sets.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use tracing::{debug, warn};

use ipu_mgr_common::{shell, PluginError, PluginResult};

use crate::commands;
use crate::types::{parse_mac, Mode};

/// PCI vendor id of the offload card.
pub const INTEL_VENDOR_ID: &str = "0x8086";

/// PCI device id of a physical function.
pub const PF_DEVICE_ID: &str = "0x1452";

/// PCI device id of a virtual function.
pub const VF_DEVICE_ID: &str = "0x145c";

/// Interfaces withheld from device listings; the tail three back the
/// bridge-port pool and the head one is the management interface.
pub const RESERVED_HOST_INTERFACES: [&str; 4] =
    ["enp0s1f0", "enp0s1f0d1", "enp0s1f0d2", "enp0s1f0d3"];

/// Number of SR-IOV virtual functions provisioned on the host.
pub const CONFIG_NUM_VFS: u32 = 8;

/// Largest VF count that has been validated on this device.
const MAX_NUM_VFS: u32 = 64;

/// PCI identity of a network device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceClass {
    /// PCI vendor id, e.g. "0x8086".
    pub vendor_id: String,
    /// PCI device id, e.g. "0x1452".
    pub device_id: String,
}

impl DeviceClass {
    /// True for the card's physical functions.
    pub fn is_pf(&self) -> bool {
        self.vendor_id == INTEL_VENDOR_ID && self.device_id == PF_DEVICE_ID
    }

    /// True for the card's virtual functions.
    pub fn is_vf(&self) -> bool {
        self.vendor_id == INTEL_VENDOR_ID && self.device_id == VF_DEVICE_ID
    }
}

/// A discovered network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interface {
    /// Kernel interface name.
    pub name: String,
    /// Hardware address octets; empty when sysfs had none.
    pub mac: Vec<u8>,
    /// IPv4 addresses currently assigned.
    pub ipv4_addrs: Vec<Ipv4Addr>,
}

/// Read-only access to the host's network devices.
#[async_trait]
pub trait DeviceInventory: Send + Sync {
    /// Lists all network interfaces with addresses present.
    async fn list_interfaces(&self) -> PluginResult<Vec<Interface>>;

    /// Returns the PCI identity of the named interface.
    async fn classify(&self, name: &str) -> PluginResult<DeviceClass>;
}

/// Returns the interfaces that are physical functions of the card.
///
/// Interfaces whose classification fails (virtual devices without a PCI
/// node) are skipped.
pub async fn filtered_pfs(inventory: &dyn DeviceInventory) -> PluginResult<Vec<Interface>> {
    let interfaces = inventory.list_interfaces().await?;
    if interfaces.is_empty() {
        return Err(PluginError::inventory("no network interfaces discovered"));
    }

    let mut pfs = Vec::new();
    for iface in interfaces {
        match inventory.classify(&iface.name).await {
            Ok(class) if class.is_pf() => pfs.push(iface),
            Ok(_) => {}
            Err(e) => debug!(iface = %iface.name, "skipping unclassifiable interface: {e}"),
        }
    }
    Ok(pfs)
}

/// Mode-dependent device listing for the upstream device agent.
///
/// IPU-attached: physical functions minus the reserved set. Host-attached:
/// virtual functions only.
pub async fn discover_host_devices(
    inventory: &dyn DeviceInventory,
    mode: Mode,
) -> PluginResult<Vec<String>> {
    let interfaces = inventory.list_interfaces().await?;

    let mut devices = Vec::new();
    for iface in interfaces {
        let class = match inventory.classify(&iface.name).await {
            Ok(class) => class,
            Err(_) => continue,
        };
        let wanted = match mode {
            Mode::Ipu => {
                class.is_pf() && !RESERVED_HOST_INTERFACES.contains(&iface.name.as_str())
            }
            Mode::Host => class.is_vf(),
        };
        if wanted {
            devices.push(iface.name);
        }
    }
    Ok(devices)
}

/// Sysfs-backed inventory of the running host.
pub struct SysfsInventory {
    sys_class_net: PathBuf,
    sys_bus_pci: PathBuf,
}

impl SysfsInventory {
    /// Inventory over the standard sysfs mount.
    pub fn new() -> Self {
        Self {
            sys_class_net: PathBuf::from("/sys/class/net"),
            sys_bus_pci: PathBuf::from("/sys/bus/pci/devices"),
        }
    }

    /// Inventory over alternate roots, for tests.
    pub fn with_roots(sys_class_net: impl Into<PathBuf>, sys_bus_pci: impl Into<PathBuf>) -> Self {
        Self {
            sys_class_net: sys_class_net.into(),
            sys_bus_pci: sys_bus_pci.into(),
        }
    }

    /// Provisions SR-IOV virtual functions on the card's physical
    /// functions. Only meaningful host-side; the requested count is
    /// pinned to [`CONFIG_NUM_VFS`].
    pub async fn set_num_vfs(&self, mode: Mode, requested: u32) -> PluginResult<u32> {
        if mode != Mode::Host {
            return Err(PluginError::inventory(format!(
                "VF provisioning is only supported on the host, mode is {mode}"
            )));
        }

        debug!(requested, allocating = CONFIG_NUM_VFS, "pinning VF count");
        let count = CONFIG_NUM_VFS;

        let mut entries = tokio::fs::read_dir(&self.sys_bus_pci)
            .await
            .map_err(|e| PluginError::inventory(format!("cannot read PCI devices: {e}")))?;

        let mut any_set = false;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginError::inventory(e.to_string()))?
        {
            let dev_path = entry.path();
            let device = read_id(dev_path.join("device")).await;
            let vendor = read_id(dev_path.join("vendor")).await;
            let (Some(device), Some(vendor)) = (device, vendor) else {
                continue;
            };

            if device == PF_DEVICE_ID && vendor == INTEL_VENDOR_ID {
                self.write_sriov_numvfs(&dev_path, count).await?;
                any_set = true;
            }
        }

        if any_set {
            Ok(count)
        } else {
            Err(PluginError::inventory(format!(
                "no device {PF_DEVICE_ID} found to provision VFs on"
            )))
        }
    }

    async fn write_sriov_numvfs(&self, dev_path: &std::path::Path, count: u32) -> PluginResult<()> {
        if count == 0 || count > MAX_NUM_VFS {
            return Err(PluginError::inventory(format!(
                "unsupported VF count {count}"
            )));
        }

        let numvfs = dev_path.join("sriov_numvfs");

        // The kernel rejects changing a non-zero count directly.
        tokio::fs::write(&numvfs, b"0")
            .await
            .map_err(|e| PluginError::inventory(format!("VF count reset failed: {e}")))?;
        tokio::fs::write(&numvfs, count.to_string().as_bytes())
            .await
            .map_err(|e| PluginError::inventory(format!("VF count update failed: {e}")))?;

        debug!(path = %numvfs.display(), count, "updated sriov_numvfs");
        Ok(())
    }
}

impl Default for SysfsInventory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeviceInventory for SysfsInventory {
    async fn list_interfaces(&self) -> PluginResult<Vec<Interface>> {
        let mut entries = tokio::fs::read_dir(&self.sys_class_net)
            .await
            .map_err(|e| PluginError::inventory(format!("cannot read {:?}: {e}", self.sys_class_net)))?;

        let mut interfaces = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PluginError::inventory(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();

            let mac = match tokio::fs::read_to_string(entry.path().join("address")).await {
                Ok(raw) => parse_mac(raw.trim()).unwrap_or_default(),
                Err(_) => Vec::new(),
            };

            // Address presence comes from the ip tool; a failure here
            // (device gone, tool missing in a test root) reads as no
            // addresses assigned.
            let ipv4_addrs = match shell::exec(&commands::build_addr_show_cmd(&name)).await {
                Ok(result) if result.success() => parse_addr_show(&result.stdout),
                Ok(_) => Vec::new(),
                Err(e) => {
                    warn!(iface = %name, "address listing failed: {e}");
                    Vec::new()
                }
            };

            interfaces.push(Interface {
                name,
                mac,
                ipv4_addrs,
            });
        }

        interfaces.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(interfaces)
    }

    async fn classify(&self, name: &str) -> PluginResult<DeviceClass> {
        let device_dir = self.sys_class_net.join(name).join("device");

        let device_id = read_id(device_dir.join("device"))
            .await
            .ok_or_else(|| PluginError::inventory(format!("no PCI device id for {name}")))?;
        let vendor_id = read_id(device_dir.join("vendor"))
            .await
            .ok_or_else(|| PluginError::inventory(format!("no PCI vendor id for {name}")))?;

        Ok(DeviceClass {
            vendor_id,
            device_id,
        })
    }
}

async fn read_id(path: PathBuf) -> Option<String> {
    tokio::fs::read_to_string(path)
        .await
        .ok()
        .map(|s| s.trim().to_string())
}

/// Parses `ip -4 -o addr show` output into addresses.
pub(crate) fn parse_addr_show(output: &str) -> Vec<Ipv4Addr> {
    let mut addrs = Vec::new();
    for line in output.lines() {
        let mut tokens = line.split_whitespace();
        while let Some(token) = tokens.next() {
            if token == "inet" {
                if let Some(addr) = tokens
                    .next()
                    .and_then(|cidr| cidr.split('/').next())
                    .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
                {
                    addrs.push(addr);
                }
            }
        }
    }
    addrs
}
