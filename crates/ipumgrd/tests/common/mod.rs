//! In-memory fakes for the daemon's external collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use ipu_mgr_common::{PluginError, PluginResult};
use ipumgrd::bridge::BridgeController;
use ipumgrd::channel::{ActivationProbe, AddressOps};
use ipumgrd::inventory::{DeviceClass, DeviceInventory, Interface, INTEL_VENDOR_ID, PF_DEVICE_ID};
use ipumgrd::remote::{RemoteChannel, VF_MAC_QUERY_CMD};
use ipumgrd::rules::RuleProgrammer;

/// Bridge controller recording attach/detach calls.
#[derive(Default)]
pub struct FakeBridge {
    pub fail_attach: bool,
    pub fail_detach: bool,
    pub attached: Mutex<Vec<String>>,
}

#[async_trait]
impl BridgeController for FakeBridge {
    async fn ensure_bridge(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn delete_bridges(&self) -> PluginResult<()> {
        Ok(())
    }

    async fn attach_port(&self, iface: &str) -> PluginResult<()> {
        if self.fail_attach {
            return Err(PluginError::bridge("attach", iface, "ovs-vsctl exited 1"));
        }
        self.attached.lock().unwrap().push(iface.to_string());
        Ok(())
    }

    async fn detach_port(&self, iface: &str) -> PluginResult<()> {
        if self.fail_detach {
            return Err(PluginError::bridge("detach", iface, "ovs-vsctl exited 1"));
        }
        self.attached.lock().unwrap().retain(|p| p != iface);
        Ok(())
    }
}

/// Rule programmer recording every invocation.
#[derive(Default)]
pub struct FakeRules {
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl RuleProgrammer for FakeRules {
    async fn install_point_to_point(&self, vf_macs: &[String]) -> PluginResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("p2p+ {}", vf_macs.len()));
        Ok(())
    }

    async fn remove_point_to_point(&self, vf_macs: &[String]) -> PluginResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("p2p- {}", vf_macs.len()));
        Ok(())
    }

    async fn install_port_rules(&self, mac: &[u8], vlan: u16) -> PluginResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("port+ {} {vlan}", ipumgrd::types::format_mac(mac)));
        Ok(())
    }

    async fn remove_port_rules(&self, mac: &[u8], vlan: u16) -> PluginResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("port- {} {vlan}", ipumgrd::types::format_mac(mac)));
        Ok(())
    }

    async fn install_nf_rules(
        &self,
        _vf_macs: &[String],
        input: &str,
        output: &str,
    ) -> PluginResult<()> {
        self.calls.lock().unwrap().push(format!("nf+ {input} {output}"));
        Ok(())
    }

    async fn remove_nf_rules(
        &self,
        _vf_macs: &[String],
        input: &str,
        output: &str,
    ) -> PluginResult<()> {
        self.calls.lock().unwrap().push(format!("nf- {input} {output}"));
        Ok(())
    }
}

/// Management-controller fake with a scripted marker and VF MAC table.
#[derive(Default)]
pub struct FakeRemote {
    pub marker_exists: bool,
    pub vf_macs: Vec<String>,
    pub fail_uploads: bool,
    pub commands: Mutex<Vec<String>>,
    pub uploads: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl RemoteChannel for FakeRemote {
    async fn run_command(&self, cmd: &str) -> PluginResult<String> {
        self.commands.lock().unwrap().push(cmd.to_string());
        if cmd.contains("/work/uuid") {
            return Ok(if self.marker_exists {
                "exists".to_string()
            } else {
                "missing".to_string()
            });
        }
        if cmd == VF_MAC_QUERY_CMD {
            let table = self
                .vf_macs
                .iter()
                .enumerate()
                .map(|(i, mac)| format!("vf{i} mac {mac} vsi {i}"))
                .collect::<Vec<_>>()
                .join("\n");
            return Ok(table);
        }
        Ok(String::new())
    }

    async fn upload_bytes(&self, remote_path: &str, data: &[u8]) -> PluginResult<()> {
        if self.fail_uploads {
            return Err(PluginError::remote("upload", "connection reset"));
        }
        self.uploads
            .lock()
            .unwrap()
            .push((remote_path.to_string(), data.to_vec()));
        Ok(())
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> PluginResult<()> {
        // The override package does not exist on test hosts; record the
        // transfer without touching the filesystem.
        self.upload_bytes(
            remote_path,
            local_path.display().to_string().as_bytes(),
        )
        .await
    }
}

/// Inventory serving a fixed interface set, all classified as PFs.
pub struct FakeInventory {
    pub interfaces: Vec<Interface>,
}

impl FakeInventory {
    pub fn new(interfaces: Vec<Interface>) -> Self {
        Self { interfaces }
    }

    /// `count` physical functions named d0..dN. The function at
    /// `marker_index` carries `marker` in its 4th MAC octet and no
    /// address, making it the control-channel candidate.
    pub fn pf_set(count: usize, marker_index: usize, marker: u8) -> Self {
        let interfaces = (0..count)
            .map(|i| Interface {
                name: format!("enp0s1f0d{i}"),
                mac: vec![0x00, 0x01, 0x00, if i == marker_index { marker } else { 0x00 }, 0x00, i as u8],
                ipv4_addrs: Vec::new(),
            })
            .collect();
        Self { interfaces }
    }
}

#[async_trait]
impl DeviceInventory for FakeInventory {
    async fn list_interfaces(&self) -> PluginResult<Vec<Interface>> {
        Ok(self.interfaces.clone())
    }

    async fn classify(&self, _name: &str) -> PluginResult<DeviceClass> {
        Ok(DeviceClass {
            vendor_id: INTEL_VENDOR_ID.to_string(),
            device_id: PF_DEVICE_ID.to_string(),
        })
    }
}

/// Address ops that activate after a fixed number of probes
/// (`usize::MAX` = never).
pub struct FakeAddressOps {
    pub activate_after: usize,
    pub probes: AtomicUsize,
    pub addresses: Mutex<Vec<(String, Ipv4Addr)>>,
}

impl FakeAddressOps {
    pub fn new(activate_after: usize) -> Self {
        Self {
            activate_after,
            probes: AtomicUsize::new(0),
            addresses: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AddressOps for FakeAddressOps {
    async fn add_address(&self, iface: &str, ip: Ipv4Addr, _prefix_len: u8) -> PluginResult<()> {
        self.addresses
            .lock()
            .unwrap()
            .push((iface.to_string(), ip));
        Ok(())
    }

    async fn list_v4_addresses(&self, iface: &str) -> PluginResult<Vec<Ipv4Addr>> {
        Ok(self
            .addresses
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == iface)
            .map(|(_, ip)| *ip)
            .collect())
    }

    async fn manager_ready(&self) -> bool {
        true
    }

    async fn probe_activation(&self, _iface: &str) -> PluginResult<ActivationProbe> {
        let n = self.probes.fetch_add(1, Ordering::SeqCst);
        if n >= self.activate_after {
            Ok(ActivationProbe::Activated)
        } else {
            Ok(ActivationProbe::NotActivated)
        }
    }

    async fn add_connection_profile(
        &self,
        _iface: &str,
        _ip: Ipv4Addr,
        _prefix_len: u8,
    ) -> PluginResult<()> {
        Ok(())
    }
}
