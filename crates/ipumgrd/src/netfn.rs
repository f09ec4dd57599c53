//! Network function service: steering host VF traffic through a function.
//!
//! Creating a network function replaces the default point-to-point VF
//! forwarding with rules that pass traffic through the function's
//! ingress and egress MACs; deleting it restores the default.

use std::sync::Arc;
use tracing::{info, instrument};

use ipu_mgr_common::{PluginError, PluginResult};

use crate::remote::{self, RemoteChannel};
use crate::rules::RuleProgrammer;

/// Create/delete operations for network functions.
pub struct NetworkFunctionService {
    rules: Arc<dyn RuleProgrammer>,
    remote: Arc<dyn RemoteChannel>,
}

impl NetworkFunctionService {
    /// Creates the service over the given collaborators.
    pub fn new(rules: Arc<dyn RuleProgrammer>, remote: Arc<dyn RemoteChannel>) -> Self {
        Self { rules, remote }
    }

    async fn host_vf_macs(&self) -> PluginResult<Vec<String>> {
        let macs = remote::vf_mac_list(self.remote.as_ref())
            .await
            .map_err(|e| PluginError::remote("vf-mac-query", format!("unable to reach the IMC: {e}")))?;
        if macs.is_empty() {
            return Err(PluginError::internal("no NFs initialized on the host"));
        }
        Ok(macs)
    }

    /// Programs forwarding through the function's ingress/egress MACs.
    #[instrument(skip(self))]
    pub async fn create_network_function(&self, input: &str, output: &str) -> PluginResult<()> {
        let vf_macs = self.host_vf_macs().await?;
        self.rules.install_nf_rules(&vf_macs, input, output).await?;
        info!(input, output, "network function created");
        Ok(())
    }

    /// Removes the function's rules and restores point-to-point
    /// forwarding between the host VFs.
    #[instrument(skip(self))]
    pub async fn delete_network_function(&self, input: &str, output: &str) -> PluginResult<()> {
        let vf_macs = self.host_vf_macs().await?;
        self.rules.remove_nf_rules(&vf_macs, input, output).await?;
        self.rules.install_point_to_point(&vf_macs).await?;
        info!(input, output, "network function deleted");
        Ok(())
    }
}
