//! Lifecycle orchestration: bringing the node to a ready state.
//!
//! Init sequences the bootstrap check, conditional reprovisioning,
//! default rule preconfiguration, a best-effort host device recheck and
//! the control-channel bring-up, then hands back the control endpoint.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use ipu_mgr_common::{shell, PluginError, PluginResult, RetryPolicy};

use crate::bootstrap::{BootstrapValidator, Reprovisioner};
use crate::channel::{AddressOps, ChannelConfigurator};
use crate::commands;
use crate::config::DaemonConfig;
use crate::inventory::{filtered_pfs, DeviceInventory};
use crate::remote::{self, RemoteChannel};
use crate::rules::RuleProgrammer;
use crate::types::{IpPort, Mode};

/// Node bring-up and control-endpoint discovery.
pub struct LifeCycleService {
    config: DaemonConfig,
    inventory: Arc<dyn DeviceInventory>,
    remote: Arc<dyn RemoteChannel>,
    rules: Arc<dyn RuleProgrammer>,
    addr_ops: Arc<dyn AddressOps>,
    retry: RetryPolicy,
}

impl LifeCycleService {
    /// Creates the service over the given collaborators.
    pub fn new(
        config: DaemonConfig,
        inventory: Arc<dyn DeviceInventory>,
        remote: Arc<dyn RemoteChannel>,
        rules: Arc<dyn RuleProgrammer>,
        addr_ops: Arc<dyn AddressOps>,
    ) -> Self {
        Self {
            config,
            inventory,
            remote,
            rules,
            addr_ops,
            retry: RetryPolicy::address_activation(),
        }
    }

    /// Overrides the channel retry budget.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Brings the node to a ready state and returns the control endpoint.
    ///
    /// `dpu_mode` names the side the caller expects to be talking to; a
    /// mismatch with the configured mode is fatal. Card-attached init
    /// validates the bootstrap state (reprovisioning on failure) and
    /// programs the default point-to-point rules before the channel
    /// comes up. The reported IP is always the card-side control IP.
    #[instrument(skip(self))]
    pub async fn init(&self, dpu_mode: bool) -> PluginResult<IpPort> {
        let requested = if dpu_mode { Mode::Ipu } else { Mode::Host };
        if requested != self.config.mode {
            return Err(PluginError::ModeMismatch {
                requested: requested.as_str().to_string(),
                running: self.config.mode.as_str().to_string(),
            });
        }

        if dpu_mode {
            let validator =
                BootstrapValidator::new(self.inventory.clone(), self.remote.clone());
            if validator.validate().await {
                info!("bootstrap state valid, not reprovisioning");
            } else {
                info!("bootstrap state invalid, reprovisioning the offload card");
                Reprovisioner::new(self.remote.clone(), &self.config.override_package)
                    .reprovision()
                    .await?;
            }

            self.preconfigure_rules().await?;
        }

        self.recheck_host_devices().await;

        let channel = ChannelConfigurator::new(self.inventory.clone(), self.addr_ops.clone())
            .with_policy(self.retry);
        channel
            .configure(self.config.mode, self.config.host_ip, self.config.ipu_ip)
            .await?;

        Ok(IpPort {
            ip: self.config.ipu_ip.to_string(),
            port: self.config.port,
        })
    }

    /// Programs default point-to-point forwarding between the host VFs.
    async fn preconfigure_rules(&self) -> PluginResult<()> {
        let vf_macs = remote::vf_mac_list(self.remote.as_ref())
            .await
            .map_err(|e| PluginError::remote("vf-mac-query", format!("unable to reach the IMC: {e}")))?;
        if vf_macs.is_empty() {
            return Err(PluginError::internal("no NFs initialized on the host"));
        }

        // Stale rules from a previous run are cleared first; a failed
        // clear is not fatal, the install decides.
        if let Err(e) = self.rules.remove_point_to_point(&vf_macs).await {
            warn!("stale point-to-point rule removal failed: {e}");
        }
        self.rules.install_point_to_point(&vf_macs).await?;
        info!(vfs = vf_macs.len(), "default point-to-point rules programmed");
        Ok(())
    }

    /// Best effort: reload the host driver when the card's net devices
    /// are missing (an IMC reboot without a module unload leaves them
    /// gone). Failures are logged and never fail init.
    async fn recheck_host_devices(&self) {
        if self.config.mode != Mode::Host {
            return;
        }

        match filtered_pfs(self.inventory.as_ref()).await {
            Ok(pfs) if !pfs.is_empty() => {
                debug!(count = pfs.len(), "host net devices present");
            }
            Err(e) => {
                warn!("device recheck skipped, enumeration failed: {e}");
            }
            Ok(_) => {
                info!("host net devices missing, attempting driver reload");
                match shell::exec_ok(&commands::build_driver_check_cmd()).await {
                    Ok(_) => {}
                    Err(e) => {
                        warn!("driver not loaded, skipping reload: {e}");
                        return;
                    }
                }
                if let Err(e) = shell::exec_ok(&commands::build_driver_remove_cmd()).await {
                    warn!("driver unload failed: {e}");
                    return;
                }
                if let Err(e) = shell::exec_ok(&commands::build_driver_load_cmd()).await {
                    warn!("driver load failed: {e}");
                    return;
                }
                debug!("driver reload complete");
            }
        }
    }
}
