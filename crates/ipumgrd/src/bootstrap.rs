//! Bootstrap validation and remote reprovisioning of the offload card.
//!
//! A card is considered provisioned when it exposes the full set of
//! physical functions and the management controller carries the base-MAC
//! marker written by a previous provisioning run. When either check
//! fails the card is re-flashed: a fresh base MAC is generated, the
//! package override and its loader script are pushed to the controller,
//! and the card is rebooted. This runs at most once per boot cycle.

use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use ipu_mgr_common::PluginResult;

use crate::inventory::{filtered_pfs, DeviceInventory};
use crate::remote::RemoteChannel;

/// Physical functions a provisioned card exposes.
pub const REQUIRED_PF_COUNT: usize = 16;

/// Upper bound for the last MAC byte. Function ids are derived by
/// incrementing the last byte, so headroom for 16 of them is kept.
const LAST_MAC_BYTE_RANGE: u8 = 239;

/// Marker file on the controller recording the provisioned base MAC.
pub const MARKER_FILE: &str = "/work/uuid";

/// Where the package override lands on the controller.
const PACKAGE_REMOTE_PATH: &str = "/work/scripts/rh_mvp.pkg";

/// Where the loader script lands on the controller.
const LOAD_SCRIPT_REMOTE_PATH: &str = "/work/scripts/load_custom_pkg.sh";

/// Registers the ACC function configuration script for the next boot.
const POST_BOOT_APPEND_CMD: &str =
    r#"echo "python /usr/bin/scripts/cfg_acc_apf_x2.py" >> /work/scripts/pre_init_app.sh"#;

/// Probe for the base-MAC marker.
const MARKER_PROBE_CMD: &str =
    "if [ -f /work/uuid ]; then echo 'exists'; else echo 'missing'; fi";

/// Typed parameters patched into the controller's init configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageOverride {
    /// Base MAC the card derives function addresses from.
    pub pf_mac_address: String,
    /// Number of ACC physical functions to expose.
    pub acc_apf: u16,
    /// Semaphore page count for the enlarged function set.
    pub sem_num_pages: u16,
    /// Communication vport wiring between host and ACC.
    pub comm_vports: String,
}

impl PackageOverride {
    /// The override used for provisioning, parameterized by base MAC.
    pub fn for_mac(mac: impl Into<String>) -> Self {
        Self {
            pf_mac_address: mac.into(),
            acc_apf: 16,
            sem_num_pages: 25,
            comm_vports: r#"((\[5,0\],\[4,0\]),(\[0,3\],\[4,4\]))"#.to_string(),
        }
    }

    /// Renders the loader script applying this override on the next boot.
    pub fn render(&self) -> String {
        format!(
            r#"#!/bin/sh
CP_INIT_CFG=/etc/dpcp/cfg/cp_init.cfg
echo "Checking for custom package..."
if [ -e rh_mvp.pkg ]; then
    echo "Custom package rh_mvp.pkg found. Overriding default package"
    cp rh_mvp.pkg /etc/dpcp/package/
    rm -rf /etc/dpcp/package/default_pkg.pkg
    ln -s /etc/dpcp/package/rh_mvp.pkg /etc/dpcp/package/default_pkg.pkg
    sed -i 's/sem_num_pages = 1;/sem_num_pages = {sem};/g' $CP_INIT_CFG
    sed -i 's/pf_mac_address = "00:00:00:00:03:14";/pf_mac_address = "{mac}";/g' $CP_INIT_CFG
    sed -i 's/acc_apf = 4;/acc_apf = {apf};/g' $CP_INIT_CFG
    sed -i 's/comm_vports = .*/comm_vports = {vports};/g' $CP_INIT_CFG
else
    echo "No custom package found. Continuing with default package"
fi
"#,
            sem = self.sem_num_pages,
            mac = self.pf_mac_address,
            apf = self.acc_apf,
            vports = self.comm_vports,
        )
    }
}

/// Formats a base MAC from its two random suffix bytes.
pub(crate) fn format_base_mac(bytes: [u8; 2]) -> String {
    format!("00:00:00:00:{:x}:{:x}", bytes[0], bytes[1])
}

/// Keeps the last byte below the range reserved for function ids.
pub(crate) fn clamp_mac_suffix(mut bytes: [u8; 2]) -> [u8; 2] {
    if bytes[1] > LAST_MAC_BYTE_RANGE {
        bytes[1] = rand::thread_rng().gen_range(1..=LAST_MAC_BYTE_RANGE);
    }
    bytes
}

/// Generates a fresh base MAC with a random two-byte suffix.
pub fn generate_base_mac() -> String {
    let bytes = clamp_mac_suffix(rand::random::<[u8; 2]>());
    let mac = format_base_mac(bytes);
    info!(%mac, "allocated base MAC pattern");
    mac
}

/// Decides whether the card needs reprovisioning.
pub struct BootstrapValidator {
    inventory: Arc<dyn DeviceInventory>,
    remote: Arc<dyn RemoteChannel>,
}

impl BootstrapValidator {
    /// Creates a validator over the given collaborators.
    pub fn new(inventory: Arc<dyn DeviceInventory>, remote: Arc<dyn RemoteChannel>) -> Self {
        Self { inventory, remote }
    }

    /// True when the card exposes enough physical functions and the
    /// controller carries the base-MAC marker.
    ///
    /// A PF shortfall alone is decisive; the marker is not consulted in
    /// that case.
    #[instrument(skip(self))]
    pub async fn validate(&self) -> bool {
        let pf_count = match filtered_pfs(self.inventory.as_ref()).await {
            Ok(pfs) => pfs.len(),
            Err(e) => {
                warn!("PF enumeration failed: {e}");
                0
            }
        };
        if pf_count < REQUIRED_PF_COUNT {
            info!(pf_count, required = REQUIRED_PF_COUNT, "not enough physical functions");
            return false;
        }

        match self.remote.run_command(MARKER_PROBE_CMD).await {
            Ok(output) if output.trim() == "exists" => true,
            Ok(_) => {
                info!("base MAC marker missing on the management controller");
                false
            }
            Err(e) => {
                warn!("marker probe failed: {e}");
                false
            }
        }
    }
}

/// One-shot remote provisioning of the offload card.
pub struct Reprovisioner {
    remote: Arc<dyn RemoteChannel>,
    package: PathBuf,
}

impl Reprovisioner {
    /// Creates a reprovisioner uploading the package at `package`.
    pub fn new(remote: Arc<dyn RemoteChannel>, package: impl Into<PathBuf>) -> Self {
        Self {
            remote,
            package: package.into(),
        }
    }

    /// Pushes the override package and reboots the card.
    ///
    /// Any failure leaves the card on its previous package; the caller
    /// treats that as fatal rather than continuing half-provisioned.
    #[instrument(skip(self))]
    pub async fn reprovision(&self) -> PluginResult<()> {
        let mac = generate_base_mac();

        self.remote
            .upload_file(&self.package, PACKAGE_REMOTE_PATH)
            .await?;
        self.remote.run_command(POST_BOOT_APPEND_CMD).await?;

        let overrides = PackageOverride::for_mac(&mac);
        self.remote
            .upload_bytes(LOAD_SCRIPT_REMOTE_PATH, overrides.render().as_bytes())
            .await?;
        self.remote
            .upload_bytes(MARKER_FILE, format!("{mac}\n").as_bytes())
            .await?;

        info!(%mac, "override staged, rebooting the card");
        self.remote.run_command("reboot").await?;
        Ok(())
    }
}
