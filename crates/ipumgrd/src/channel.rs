//! Control-channel configuration: PF selection and address convergence.
//!
//! The control channel is the IP path between the host and card
//! control-plane processes. Bring-up selects the control-plane physical
//! function by its MAC marker octet and drives a bounded state machine
//! until the address is assigned and the connection reports activated.

use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use ipu_mgr_common::{shell, PluginError, PluginResult, RetryPolicy};

use crate::commands::{self, CONTROL_PREFIX_LEN};
use crate::inventory::{self, filtered_pfs, DeviceInventory, Interface};
use crate::types::Mode;

/// 4th MAC octet marking the host-side control-plane function.
pub const HOST_VPORT_OCTET: u8 = 0x03;

/// 4th MAC octet marking the card-side control-plane function.
pub const ACC_VPORT_OCTET: u8 = 0x04;

/// Outcome of one connection-activation probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationProbe {
    /// The connection reports activated.
    Activated,
    /// The connection exists but is not activated yet.
    NotActivated,
    /// No connection profile exists for the interface.
    NoProfile,
}

/// States of the per-call address bring-up machine.
///
/// Bring-up walks `AddressPending -> AddressSet -> ActivationPending ->
/// Activated` and stops at `Failed` when the retry budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressState {
    /// The address has not been confirmed on the interface yet.
    AddressPending,
    /// The address is present; activation has not been probed.
    AddressSet,
    /// Waiting for the connection to report activated.
    ActivationPending,
    /// Address present and connection activated.
    Activated,
    /// Retry budget exhausted.
    Failed,
}

/// Address assignment and activation probing on a host interface.
#[async_trait]
pub trait AddressOps: Send + Sync {
    /// Assigns an address; re-adding an existing address may error.
    async fn add_address(&self, iface: &str, ip: Ipv4Addr, prefix_len: u8) -> PluginResult<()>;

    /// Lists the IPv4 addresses currently on the interface.
    async fn list_v4_addresses(&self, iface: &str) -> PluginResult<Vec<Ipv4Addr>>;

    /// True when the network manager daemon is answering.
    async fn manager_ready(&self) -> bool;

    /// Probes the activation state of the interface's connection.
    async fn probe_activation(&self, iface: &str) -> PluginResult<ActivationProbe>;

    /// Creates a connection profile carrying the address.
    async fn add_connection_profile(
        &self,
        iface: &str,
        ip: Ipv4Addr,
        prefix_len: u8,
    ) -> PluginResult<()>;
}

/// Production address ops over the `ip` and `nmcli` tools.
pub struct NmcliAddressOps;

#[async_trait]
impl AddressOps for NmcliAddressOps {
    async fn add_address(&self, iface: &str, ip: Ipv4Addr, prefix_len: u8) -> PluginResult<()> {
        shell::exec_ok(&commands::build_addr_add_cmd(iface, ip, prefix_len)).await?;
        Ok(())
    }

    async fn list_v4_addresses(&self, iface: &str) -> PluginResult<Vec<Ipv4Addr>> {
        let stdout = shell::exec_ok(&commands::build_addr_show_cmd(iface)).await?;
        Ok(inventory::parse_addr_show(&stdout))
    }

    async fn manager_ready(&self) -> bool {
        matches!(shell::exec(&commands::build_nm_status_cmd()).await, Ok(r) if r.success())
    }

    async fn probe_activation(&self, iface: &str) -> PluginResult<ActivationProbe> {
        let result = shell::exec(&commands::build_conn_state_cmd(iface)).await?;
        if result.success() && result.stdout.contains("activated") {
            Ok(ActivationProbe::Activated)
        } else if result.stderr.contains("no such connection profile") {
            Ok(ActivationProbe::NoProfile)
        } else {
            Ok(ActivationProbe::NotActivated)
        }
    }

    async fn add_connection_profile(
        &self,
        iface: &str,
        ip: Ipv4Addr,
        prefix_len: u8,
    ) -> PluginResult<()> {
        shell::exec_ok(&commands::build_conn_add_cmd(iface, ip, prefix_len)).await?;
        Ok(())
    }
}

/// Brings the control-channel address up on the right interface.
pub struct ChannelConfigurator {
    inventory: Arc<dyn DeviceInventory>,
    addr_ops: Arc<dyn AddressOps>,
    policy: RetryPolicy,
}

impl ChannelConfigurator {
    /// Creates a configurator with the production retry budget.
    pub fn new(inventory: Arc<dyn DeviceInventory>, addr_ops: Arc<dyn AddressOps>) -> Self {
        Self {
            inventory,
            addr_ops,
            policy: RetryPolicy::address_activation(),
        }
    }

    /// Overrides the retry budget.
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The marker octet identifying the control-plane function per mode.
    pub fn marker_octet(mode: Mode) -> u8 {
        match mode {
            Mode::Host => HOST_VPORT_OCTET,
            Mode::Ipu => ACC_VPORT_OCTET,
        }
    }

    /// Picks the control-plane PF: marker octet matches and no IPv4
    /// address is assigned yet.
    ///
    /// The base MAC of the first function may carry the marker octet
    /// too, but that one already holds an address; requiring an empty
    /// address list tells the two apart and also makes a rerun a no-op.
    pub fn select_comm_pf(mode: Mode, pfs: &[Interface]) -> Option<&Interface> {
        let marker = Self::marker_octet(mode);
        pfs.iter()
            .find(|pf| pf.mac.len() >= 4 && pf.mac[3] == marker && pf.ipv4_addrs.is_empty())
    }

    /// Configures the control channel for the given mode.
    ///
    /// When no unconfigured candidate exists the channel is treated as
    /// already configured and the call succeeds without touching state.
    #[instrument(skip(self))]
    pub async fn configure(
        &self,
        mode: Mode,
        host_ip: Ipv4Addr,
        ipu_ip: Ipv4Addr,
    ) -> PluginResult<()> {
        let pfs = filtered_pfs(self.inventory.as_ref()).await?;

        let Some(pf) = Self::select_comm_pf(mode, &pfs) else {
            info!("no unconfigured control-plane function, channel already configured");
            return Ok(());
        };

        let ip = match mode {
            Mode::Ipu => ipu_ip,
            Mode::Host => host_ip,
        };
        info!(iface = %pf.name, %ip, "bringing up control channel");
        self.converge(&pf.name, ip).await
    }

    /// Drives the address state machine within the retry budget.
    async fn converge(&self, iface: &str, ip: Ipv4Addr) -> PluginResult<()> {
        let mut state = AddressState::AddressPending;
        let mut attempts = 0u32;

        while attempts < self.policy.max_attempts {
            attempts += 1;

            state = match state {
                AddressState::AddressPending => {
                    if let Err(e) = self.addr_ops.add_address(iface, ip, CONTROL_PREFIX_LEN).await
                    {
                        // Re-adding an existing address errors; presence
                        // below is what decides progress.
                        debug!("address add reported: {e}");
                    }
                    match self.addr_ops.list_v4_addresses(iface).await {
                        Ok(addrs) if addrs.contains(&ip) => AddressState::AddressSet,
                        Ok(addrs) => {
                            debug!(?addrs, "expected address not present yet");
                            AddressState::AddressPending
                        }
                        Err(e) => {
                            warn!("address listing failed: {e}");
                            AddressState::AddressPending
                        }
                    }
                }
                AddressState::AddressSet | AddressState::ActivationPending => {
                    if !self.addr_ops.manager_ready().await {
                        info!("network manager not answering yet");
                        AddressState::ActivationPending
                    } else {
                        match self.addr_ops.probe_activation(iface).await {
                            Ok(ActivationProbe::Activated) => AddressState::Activated,
                            Ok(ActivationProbe::NoProfile) => {
                                if let Err(e) = self
                                    .addr_ops
                                    .add_connection_profile(iface, ip, CONTROL_PREFIX_LEN)
                                    .await
                                {
                                    warn!("connection profile creation failed: {e}");
                                }
                                AddressState::ActivationPending
                            }
                            Ok(ActivationProbe::NotActivated) => AddressState::ActivationPending,
                            Err(e) => {
                                warn!("activation probe failed: {e}");
                                AddressState::ActivationPending
                            }
                        }
                    }
                }
                done @ (AddressState::Activated | AddressState::Failed) => done,
            };

            if state == AddressState::Activated {
                info!(iface, %ip, "control channel address active");
                return Ok(());
            }

            debug!(attempt = attempts, ?state, "address convergence retry");
            self.policy.pause().await;
        }

        state = AddressState::Failed;
        warn!(iface, ?state, attempts, "address convergence retry budget exhausted");
        Err(PluginError::ChannelConfigTimeout {
            iface: iface.to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    fn pf(name: &str, mac: [u8; 6], addrs: &[Ipv4Addr]) -> Interface {
        Interface {
            name: name.to_string(),
            mac: mac.to_vec(),
            ipv4_addrs: addrs.to_vec(),
        }
    }

    #[test]
    fn test_select_comm_pf_by_marker() {
        let pfs = vec![
            pf("enp0s1f0", [0, 0, 0, 0x00, 0, 0], &[]),
            pf("enp0s1f0d3", [0, 0, 0, 0x03, 0, 0], &[]),
        ];
        let selected = ChannelConfigurator::select_comm_pf(Mode::Host, &pfs).unwrap();
        assert_eq!(selected.name, "enp0s1f0d3");

        // The IPU marker does not match any of these.
        assert!(ChannelConfigurator::select_comm_pf(Mode::Ipu, &pfs).is_none());
    }

    #[test]
    fn test_select_comm_pf_skips_addressed_functions() {
        let configured = Ipv4Addr::new(192, 168, 1, 2);
        let pfs = vec![
            pf("d3", [0, 0, 0, 0x04, 0, 0], &[configured]),
            pf("d7", [0, 0, 0, 0x04, 0, 1], &[]),
        ];
        let selected = ChannelConfigurator::select_comm_pf(Mode::Ipu, &pfs).unwrap();
        assert_eq!(selected.name, "d7");

        // Every candidate already configured: nothing to do.
        let all_set = vec![pf("d3", [0, 0, 0, 0x04, 0, 0], &[configured])];
        assert!(ChannelConfigurator::select_comm_pf(Mode::Ipu, &all_set).is_none());
    }

    /// Address ops that confirm the address immediately and activate
    /// after a fixed number of probes (`usize::MAX` = never).
    struct ScriptedOps {
        activate_after: usize,
        probes: AtomicUsize,
        addresses: StdMutex<Vec<Ipv4Addr>>,
        profile_created: AtomicUsize,
        missing_profile: bool,
    }

    impl ScriptedOps {
        fn new(activate_after: usize) -> Self {
            Self {
                activate_after,
                probes: AtomicUsize::new(0),
                addresses: StdMutex::new(Vec::new()),
                profile_created: AtomicUsize::new(0),
                missing_profile: false,
            }
        }
    }

    #[async_trait]
    impl AddressOps for ScriptedOps {
        async fn add_address(&self, _iface: &str, ip: Ipv4Addr, _prefix: u8) -> PluginResult<()> {
            let mut addrs = self.addresses.lock().unwrap();
            if addrs.contains(&ip) {
                return Err(PluginError::internal("address already assigned"));
            }
            addrs.push(ip);
            Ok(())
        }

        async fn list_v4_addresses(&self, _iface: &str) -> PluginResult<Vec<Ipv4Addr>> {
            Ok(self.addresses.lock().unwrap().clone())
        }

        async fn manager_ready(&self) -> bool {
            true
        }

        async fn probe_activation(&self, _iface: &str) -> PluginResult<ActivationProbe> {
            let n = self.probes.fetch_add(1, Ordering::SeqCst);
            if self.missing_profile && self.profile_created.load(Ordering::SeqCst) == 0 {
                return Ok(ActivationProbe::NoProfile);
            }
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
            _prefix: u8,
        ) -> PluginResult<()> {
            self.profile_created.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FixedInventory(Vec<Interface>);

    #[async_trait]
    impl DeviceInventory for FixedInventory {
        async fn list_interfaces(&self) -> PluginResult<Vec<Interface>> {
            Ok(self.0.clone())
        }

        async fn classify(&self, _name: &str) -> PluginResult<crate::inventory::DeviceClass> {
            Ok(crate::inventory::DeviceClass {
                vendor_id: crate::inventory::INTEL_VENDOR_ID.to_string(),
                device_id: crate::inventory::PF_DEVICE_ID.to_string(),
            })
        }
    }

    fn test_policy() -> RetryPolicy {
        RetryPolicy::new(8, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_converge_reaches_activated() {
        let ops = Arc::new(ScriptedOps::new(2));
        let inv = Arc::new(FixedInventory(vec![pf("d3", [0, 0, 0, 0x03, 0, 0], &[])]));
        let cfg = ChannelConfigurator::new(inv, ops.clone()).with_policy(test_policy());

        cfg.configure(
            Mode::Host,
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 2),
        )
        .await
        .unwrap();

        // The host-side address was assigned.
        assert_eq!(
            ops.addresses.lock().unwrap().as_slice(),
            [Ipv4Addr::new(192, 168, 1, 1)]
        );
    }

    #[tokio::test]
    async fn test_converge_times_out_deterministically() {
        let ops = Arc::new(ScriptedOps::new(usize::MAX));
        let inv = Arc::new(FixedInventory(vec![pf("d3", [0, 0, 0, 0x03, 0, 0], &[])]));
        let cfg = ChannelConfigurator::new(inv, ops).with_policy(test_policy());

        let err = cfg
            .configure(
                Mode::Host,
                Ipv4Addr::new(192, 168, 1, 1),
                Ipv4Addr::new(192, 168, 1, 2),
            )
            .await
            .unwrap_err();

        match err {
            PluginError::ChannelConfigTimeout { iface, attempts } => {
                assert_eq!(iface, "d3");
                assert_eq!(attempts, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_converge_creates_missing_profile() {
        let mut scripted = ScriptedOps::new(1);
        scripted.missing_profile = true;
        let ops = Arc::new(scripted);
        let inv = Arc::new(FixedInventory(vec![pf("d3", [0, 0, 0, 0x03, 0, 0], &[])]));
        let cfg = ChannelConfigurator::new(inv, ops.clone()).with_policy(test_policy());

        cfg.configure(
            Mode::Host,
            Ipv4Addr::new(192, 168, 1, 1),
            Ipv4Addr::new(192, 168, 1, 2),
        )
        .await
        .unwrap();

        assert_eq!(ops.profile_created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_configure_is_noop_when_all_configured() {
        let configured = Ipv4Addr::new(192, 168, 1, 1);
        let inv = Arc::new(FixedInventory(vec![pf(
            "d3",
            [0, 0, 0, 0x03, 0, 0],
            &[configured],
        )]));
        let ops = Arc::new(ScriptedOps::new(usize::MAX));
        let cfg = ChannelConfigurator::new(inv, ops.clone()).with_policy(test_policy());

        // Succeeds without assigning anything.
        cfg.configure(Mode::Host, configured, Ipv4Addr::new(192, 168, 1, 2))
            .await
            .unwrap();
        assert!(ops.addresses.lock().unwrap().is_empty());
    }
}
