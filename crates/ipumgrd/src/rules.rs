//! Forwarding-rule programmer seam and its rule-compiler implementation.
//!
//! The card's forwarding pipeline is programmed through an external
//! compiler binary. This module only shapes and runs its invocations;
//! rule semantics live entirely in the compiler.

use async_trait::async_trait;
use tracing::{debug, instrument};

use ipu_mgr_common::{shell, PluginError, PluginResult};

use crate::types::format_mac;

/// Operations the services need from the rule pipeline.
#[async_trait]
pub trait RuleProgrammer: Send + Sync {
    /// Programs default point-to-point forwarding between host VF pairs.
    async fn install_point_to_point(&self, vf_macs: &[String]) -> PluginResult<()>;

    /// Removes the default point-to-point forwarding rules.
    async fn remove_point_to_point(&self, vf_macs: &[String]) -> PluginResult<()>;

    /// Programs forwarding for a bridge port's (MAC, VLAN) pair.
    async fn install_port_rules(&self, mac: &[u8], vlan: u16) -> PluginResult<()>;

    /// Removes forwarding for a bridge port's (MAC, VLAN) pair.
    async fn remove_port_rules(&self, mac: &[u8], vlan: u16) -> PluginResult<()>;

    /// Programs a network function between an ingress and egress MAC.
    async fn install_nf_rules(
        &self,
        vf_macs: &[String],
        input: &str,
        output: &str,
    ) -> PluginResult<()>;

    /// Removes a network function's forwarding rules.
    async fn remove_nf_rules(
        &self,
        vf_macs: &[String],
        input: &str,
        output: &str,
    ) -> PluginResult<()>;
}

/// Rule programmer backed by the pipeline rule compiler CLI.
pub struct FxpRuleProgrammer {
    compiler: String,
}

impl FxpRuleProgrammer {
    /// Creates a programmer invoking the compiler at `compiler`.
    pub fn new(compiler: impl Into<String>) -> Self {
        Self {
            compiler: compiler.into(),
        }
    }

    async fn run(&self, verb: &str, args: &str) -> PluginResult<()> {
        let cmd = format!("{} {} {}", self.compiler, verb, args);
        debug!(command = %cmd, "programming forwarding rules");
        shell::exec_ok(&cmd)
            .await
            .map_err(|e| PluginError::rules(verb, e.to_string()))?;
        Ok(())
    }

    fn joined(macs: &[String]) -> String {
        macs.join(",")
    }
}

#[async_trait]
impl RuleProgrammer for FxpRuleProgrammer {
    #[instrument(skip(self, vf_macs))]
    async fn install_point_to_point(&self, vf_macs: &[String]) -> PluginResult<()> {
        self.run("add-p2p-rules", &Self::joined(vf_macs)).await
    }

    #[instrument(skip(self, vf_macs))]
    async fn remove_point_to_point(&self, vf_macs: &[String]) -> PluginResult<()> {
        self.run("del-p2p-rules", &Self::joined(vf_macs)).await
    }

    #[instrument(skip(self, mac))]
    async fn install_port_rules(&self, mac: &[u8], vlan: u16) -> PluginResult<()> {
        self.run("add-port-rules", &format!("{} {}", format_mac(mac), vlan))
            .await
    }

    #[instrument(skip(self, mac))]
    async fn remove_port_rules(&self, mac: &[u8], vlan: u16) -> PluginResult<()> {
        self.run("del-port-rules", &format!("{} {}", format_mac(mac), vlan))
            .await
    }

    #[instrument(skip(self, vf_macs))]
    async fn install_nf_rules(
        &self,
        vf_macs: &[String],
        input: &str,
        output: &str,
    ) -> PluginResult<()> {
        self.run(
            "add-nf-rules",
            &format!("{} {} {}", Self::joined(vf_macs), input, output),
        )
        .await
    }

    #[instrument(skip(self, vf_macs))]
    async fn remove_nf_rules(
        &self,
        vf_macs: &[String],
        input: &str,
        output: &str,
    ) -> PluginResult<()> {
        self.run(
            "del-nf-rules",
            &format!("{} {} {}", Self::joined(vf_macs), input, output),
        )
        .await
    }
}
