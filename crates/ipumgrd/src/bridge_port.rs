//! Bridge port service: create/delete/get/list for VF-backed bridge ports.
//!
//! The service owns the reserved-interface pool and the port-record map
//! behind one lock, so a create's allocate-and-insert is atomic with
//! respect to concurrent requests. A port is either absent or fully
//! materialized (interface bound, attached to the bridge, rules
//! programmed); no partial state survives a failed create.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use ipu_mgr_common::{PluginError, PluginResult};

use crate::bridge::BridgeController;
use crate::pool::InterfacePool;
use crate::rules::RuleProgrammer;
use crate::types::{
    first_vlan_id, BridgePortRecord, OperStatus, PortDescriptor, PortSpec, PortStatus,
};

/// Lowest VLAN id accepted for a port.
pub const VLAN_MIN: i64 = 2;

/// Highest VLAN id accepted for a port.
pub const VLAN_MAX: i64 = 4094;

// TODO: rule removal on delete still uses this fixed id instead of the
// VLAN recorded at create time; plumb the recorded VLAN through once the
// rule compiler accepts it.
const DELETE_RULE_VLAN: u16 = 10;

/// Pool and record map guarded as one unit.
struct PortTable {
    pool: InterfacePool,
    records: HashMap<String, BridgePortRecord>,
}

/// Create/delete/get/list operations over bridge ports.
pub struct BridgePortService {
    table: Mutex<PortTable>,
    bridge: Arc<dyn BridgeController>,
    rules: Arc<dyn RuleProgrammer>,
}

impl BridgePortService {
    /// Creates a service over the default reserved pool.
    pub fn new(bridge: Arc<dyn BridgeController>, rules: Arc<dyn RuleProgrammer>) -> Self {
        Self::with_pool(bridge, rules, InterfacePool::reserved())
    }

    /// Creates a service over a caller-provided pool.
    pub fn with_pool(
        bridge: Arc<dyn BridgeController>,
        rules: Arc<dyn RuleProgrammer>,
        pool: InterfacePool,
    ) -> Self {
        Self {
            table: Mutex::new(PortTable {
                pool,
                records: HashMap::new(),
            }),
            bridge,
            rules,
        }
    }

    /// Creates a bridge port, binding it to the first free reserved
    /// interface.
    ///
    /// Repeating a create for an existing name returns the stored
    /// descriptor unchanged, absorbing upstream retries. On a bridge
    /// attach failure the reserved interface is released before the
    /// error is returned.
    #[instrument(skip(self, hw_addr, vlan_ids), fields(port = %name))]
    pub async fn create_port(
        &self,
        name: &str,
        hw_addr: &[u8],
        vlan_ids: &[String],
    ) -> PluginResult<PortDescriptor> {
        if hw_addr.is_empty() || hw_addr.len() > 6 {
            return Err(PluginError::InvalidMac {
                octets: hw_addr.len(),
            });
        }
        if vlan_ids.is_empty() {
            return Err(PluginError::MissingVlan);
        }
        let vlan = first_vlan_id(vlan_ids);
        if !(VLAN_MIN..=VLAN_MAX).contains(&vlan) {
            debug!(vlan, "invalid vlan");
            return Err(PluginError::InvalidVlan { vlan });
        }
        // The second octet carries the VSI of the backing function.
        let vsi = hw_addr.get(1).copied().unwrap_or(0) as i64;
        if vsi < 1 {
            debug!(vsi, "invalid VSI");
            return Err(PluginError::InvalidVsi { vsi });
        }

        let mut table = self.table.lock().await;

        if let Some(record) = table.records.get(name) {
            debug!("port already exists, returning stored descriptor");
            return Ok(record.descriptor.clone());
        }

        let iface = table.pool.allocate()?;

        if let Err(e) = self.bridge.attach_port(&iface).await {
            warn!(iface = %iface, "bridge attach failed, releasing interface: {e}");
            table.pool.release(&iface);
            return Err(e);
        }

        // Rule failures do not unwind the port. The card keeps the port
        // attached and retries land on the programmer, not the pool.
        if let Err(e) = self.rules.install_port_rules(hw_addr, vlan as u16).await {
            warn!(vlan, "port rule programming failed: {e}");
        }

        let descriptor = PortDescriptor {
            name: name.to_string(),
            spec: PortSpec {
                mac_address: hw_addr.to_vec(),
                vlan_ids: vlan_ids.to_vec(),
            },
            status: PortStatus {
                oper_status: OperStatus::Up,
            },
        };
        table.records.insert(
            name.to_string(),
            BridgePortRecord {
                descriptor: descriptor.clone(),
                interface: iface.clone(),
            },
        );

        info!(iface = %iface, vsi, vlan, "bridge port created");
        Ok(descriptor)
    }

    /// Deletes a bridge port and returns its interface to the pool.
    ///
    /// Deleting an unknown name succeeds so that upstream agents retrying
    /// a delete never loop on an error. A detach failure keeps the record
    /// so a later retry can finish the teardown.
    #[instrument(skip(self), fields(port = %name))]
    pub async fn delete_port(&self, name: &str) -> PluginResult<()> {
        let mut table = self.table.lock().await;

        let Some(record) = table.records.get(name) else {
            info!("port not found, treating delete as complete");
            return Ok(());
        };
        let iface = record.interface.clone();
        let mac = record.descriptor.spec.mac_address.clone();

        self.bridge.detach_port(&iface).await?;
        table.pool.release(&iface);

        if let Err(e) = self.rules.remove_port_rules(&mac, DELETE_RULE_VLAN).await {
            warn!("port rule removal failed: {e}");
        }

        table.records.remove(name);
        info!(iface = %iface, "bridge port deleted");
        Ok(())
    }

    /// Returns the stored descriptor, or an empty one for unknown names.
    pub async fn get_port(&self, name: &str) -> PortDescriptor {
        let table = self.table.lock().await;
        table
            .records
            .get(name)
            .map(|r| r.descriptor.clone())
            .unwrap_or_else(|| PortDescriptor::named(name))
    }

    /// Returns descriptors for all current ports.
    pub async fn list_ports(&self) -> Vec<PortDescriptor> {
        let table = self.table.lock().await;
        let mut ports: Vec<PortDescriptor> =
            table.records.values().map(|r| r.descriptor.clone()).collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        ports
    }

    /// The interface a port is bound to, if the port exists.
    pub async fn port_interface(&self, name: &str) -> Option<String> {
        let table = self.table.lock().await;
        table.records.get(name).map(|r| r.interface.clone())
    }

    /// Number of reserved interfaces currently free.
    pub async fn available_interfaces(&self) -> usize {
        self.table.lock().await.pool.available()
    }
}
