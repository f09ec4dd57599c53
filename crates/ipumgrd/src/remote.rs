//! Management-controller channel: remote commands and file transfer.
//!
//! The offload card's management controller is reached over a separate
//! management network. Everything the daemon does there (marker probes,
//! provisioning uploads, the VF MAC query, reboot) goes through the
//! [`RemoteChannel`] trait; the production implementation is an SSH
//! client.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, instrument};

use russh::client;
use russh::ChannelMsg;

use ipu_mgr_common::{shell, PluginError, PluginResult};

/// Management CLI query whose output carries the host VF MAC table.
pub const VF_MAC_QUERY_CMD: &str = "/usr/bin/cli_client -q -c";

/// Command channel to the management controller.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Runs a command remotely and returns its trimmed stdout.
    ///
    /// A non-zero remote exit status is an error.
    async fn run_command(&self, cmd: &str) -> PluginResult<String>;

    /// Writes `data` to `remote_path` on the controller.
    async fn upload_bytes(&self, remote_path: &str, data: &[u8]) -> PluginResult<()>;

    /// Copies a local file to `remote_path` on the controller.
    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> PluginResult<()> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            PluginError::remote("upload", format!("cannot read {}: {e}", local_path.display()))
        })?;
        self.upload_bytes(remote_path, &data).await
    }
}

/// Returns the MAC addresses of the host VFs known to the controller.
pub async fn vf_mac_list(remote: &dyn RemoteChannel) -> PluginResult<Vec<String>> {
    let output = remote.run_command(VF_MAC_QUERY_CMD).await?;
    let macs = parse_mac_tokens(&output);
    debug!(count = macs.len(), "VF MAC query complete");
    Ok(macs)
}

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[0-9a-fA-F]{2}(?::[0-9a-fA-F]{2}){5}\b").expect("Invalid regex pattern")
});

/// Extracts MAC-shaped tokens from CLI output, deduplicated in order.
pub(crate) fn parse_mac_tokens(output: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut macs = Vec::new();
    for m in MAC_RE.find_iter(output) {
        let mac = m.as_str().to_ascii_lowercase();
        if seen.insert(mac.clone()) {
            macs.push(mac);
        }
    }
    macs
}

struct AcceptHostKey;

#[async_trait]
impl client::Handler for AcceptHostKey {
    type Error = russh::Error;

    // The management network is a point-to-point link to the card; the
    // controller regenerates its host key on reprovision.
    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH-backed channel to the management controller.
pub struct SshRemoteChannel {
    address: String,
    user: String,
    password: String,
}

impl SshRemoteChannel {
    /// Creates a channel to `address` ("host:port") with password auth.
    pub fn new(
        address: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// The controller's stock access: root with an empty password.
    pub fn imc(address: impl Into<String>) -> Self {
        Self::new(address, "root", "")
    }

    async fn session(&self) -> PluginResult<client::Handle<AcceptHostKey>> {
        let config = Arc::new(client::Config::default());
        let mut session = client::connect(config, self.address.as_str(), AcceptHostKey)
            .await
            .map_err(|e| PluginError::remote("connect", e.to_string()))?;

        let authenticated = session
            .authenticate_password(self.user.clone(), self.password.clone())
            .await
            .map_err(|e| PluginError::remote("auth", e.to_string()))?;
        if !authenticated {
            return Err(PluginError::remote(
                "auth",
                format!("password rejected for {}@{}", self.user, self.address),
            ));
        }
        Ok(session)
    }
}

#[async_trait]
impl RemoteChannel for SshRemoteChannel {
    #[instrument(skip(self))]
    async fn run_command(&self, cmd: &str) -> PluginResult<String> {
        let session = self.session().await?;
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| PluginError::remote("exec", e.to_string()))?;
        channel
            .exec(true, cmd)
            .await
            .map_err(|e| PluginError::remote("exec", e.to_string()))?;

        let mut output = Vec::new();
        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        let stdout = String::from_utf8_lossy(&output).trim().to_string();
        match exit_status {
            Some(0) | None => Ok(stdout),
            Some(code) => Err(PluginError::remote(
                "exec",
                format!("'{cmd}' exited {code}: {stdout}"),
            )),
        }
    }

    #[instrument(skip(self, data))]
    async fn upload_bytes(&self, remote_path: &str, data: &[u8]) -> PluginResult<()> {
        let session = self.session().await?;
        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| PluginError::remote("upload", e.to_string()))?;

        let cmd = format!("cat > {}", shell::shellquote(remote_path));
        channel
            .exec(true, cmd)
            .await
            .map_err(|e| PluginError::remote("upload", e.to_string()))?;
        channel
            .data(data)
            .await
            .map_err(|e| PluginError::remote("upload", e.to_string()))?;
        channel
            .eof()
            .await
            .map_err(|e| PluginError::remote("upload", e.to_string()))?;

        let mut exit_status = None;
        while let Some(msg) = channel.wait().await {
            if let ChannelMsg::ExitStatus { exit_status: code } = msg {
                exit_status = Some(code);
            }
        }

        match exit_status {
            Some(0) | None => {
                debug!(remote_path, bytes = data.len(), "upload complete");
                Ok(())
            }
            Some(code) => Err(PluginError::remote(
                "upload",
                format!("write to {remote_path} exited {code}"),
            )),
        }
    }
}
