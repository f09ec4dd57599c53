//! Bridge controller seam and its OVS implementation.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use tracing::{info, instrument, warn};

use ipu_mgr_common::{shell, PluginError, PluginResult};

use crate::commands;

/// Address assigned to the function bridge interface.
pub const BRIDGE_IP: Ipv4Addr = Ipv4Addr::new(192, 168, 100, 252);

/// Operations the port services need from the bridge layer.
#[async_trait]
pub trait BridgeController: Send + Sync {
    /// Creates the bridge if missing, assigns its address and brings it up.
    async fn ensure_bridge(&self) -> PluginResult<()>;

    /// Removes the bridge; implicitly drops any ports still attached.
    async fn delete_bridges(&self) -> PluginResult<()>;

    /// Attaches a reserved interface to the bridge.
    async fn attach_port(&self, iface: &str) -> PluginResult<()>;

    /// Detaches a reserved interface from the bridge.
    async fn detach_port(&self, iface: &str) -> PluginResult<()>;
}

/// Bridge controller backed by the OVS CLI.
pub struct OvsBridge {
    bridge_name: String,
    ovs_cli_dir: String,
}

impl OvsBridge {
    /// Creates a controller for the named bridge using tools under
    /// `ovs_cli_dir`.
    pub fn new(bridge_name: impl Into<String>, ovs_cli_dir: impl Into<String>) -> Self {
        Self {
            bridge_name: bridge_name.into(),
            ovs_cli_dir: ovs_cli_dir.into(),
        }
    }
}

#[async_trait]
impl BridgeController for OvsBridge {
    #[instrument(skip(self), fields(bridge = %self.bridge_name))]
    async fn ensure_bridge(&self) -> PluginResult<()> {
        let cmd = commands::build_ensure_bridge_cmd(&self.ovs_cli_dir, &self.bridge_name);
        shell::exec_ok(&cmd)
            .await
            .map_err(|e| PluginError::bridge("ensure", &self.bridge_name, e.to_string()))?;

        let addr_cmd = commands::build_addr_add_cmd(
            &self.bridge_name,
            BRIDGE_IP,
            commands::CONTROL_PREFIX_LEN,
        );
        shell::exec_ok(&addr_cmd)
            .await
            .map_err(|e| PluginError::bridge("ensure", &self.bridge_name, e.to_string()))?;

        let up_cmd = commands::build_link_up_cmd(&self.bridge_name);
        shell::exec_ok(&up_cmd)
            .await
            .map_err(|e| PluginError::bridge("ensure", &self.bridge_name, e.to_string()))?;

        info!("bridge {} ready", self.bridge_name);
        Ok(())
    }

    /// Called on shutdown; continues past errors so teardown never wedges.
    async fn delete_bridges(&self) -> PluginResult<()> {
        let cmd = commands::build_delete_bridge_cmd(&self.ovs_cli_dir, &self.bridge_name);
        if let Err(e) = shell::exec_ok(&cmd).await {
            warn!(bridge = %self.bridge_name, "bridge deletion failed: {e}");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(bridge = %self.bridge_name))]
    async fn attach_port(&self, iface: &str) -> PluginResult<()> {
        let cmd = commands::build_attach_port_cmd(&self.ovs_cli_dir, &self.bridge_name, iface);
        shell::exec_ok(&cmd)
            .await
            .map_err(|e| PluginError::bridge("attach", iface, e.to_string()))?;
        info!(iface, "port attached to bridge {}", self.bridge_name);
        Ok(())
    }

    #[instrument(skip(self), fields(bridge = %self.bridge_name))]
    async fn detach_port(&self, iface: &str) -> PluginResult<()> {
        let cmd = commands::build_detach_port_cmd(&self.ovs_cli_dir, &self.bridge_name, iface);
        shell::exec_ok(&cmd)
            .await
            .map_err(|e| PluginError::bridge("detach", iface, e.to_string()))?;
        info!(iface, "port detached from bridge {}", self.bridge_name);
        Ok(())
    }
}
