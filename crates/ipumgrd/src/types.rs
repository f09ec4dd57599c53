//! Type definitions for the port-manager daemon

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Attachment mode the daemon runs in.
///
/// Host-attached means the daemon runs on the server the card is plugged
/// into; IPU-attached means it runs on the card's compute complex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Running on the host server.
    Host,
    /// Running on the offload card.
    Ipu,
}

impl Mode {
    /// Mode name as used in configuration and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Host => "host",
            Mode::Ipu => "ipu",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "host" => Ok(Mode::Host),
            "ipu" => Ok(Mode::Ipu),
            other => Err(format!("unknown mode '{other}', expected 'host' or 'ipu'")),
        }
    }
}

/// Operational state of a bridge port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperStatus {
    /// Port is attached and forwarding.
    Up,
    /// Port is configured but not forwarding.
    Down,
    /// State not known (unpopulated descriptor).
    Unknown,
}

impl OperStatus {
    /// Status name for logs and listings.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperStatus::Up => "up",
            OperStatus::Down => "down",
            OperStatus::Unknown => "unknown",
        }
    }
}

/// Requested configuration of a bridge port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Hardware address octets. The second octet carries the VSI.
    pub mac_address: Vec<u8>,
    /// Logical bridge VLAN ids; only the first is programmed.
    pub vlan_ids: Vec<String>,
}

/// Observed state of a bridge port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    /// Operational state.
    pub oper_status: OperStatus,
}

/// A bridge port as exposed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    /// Caller-chosen port name, the idempotency key.
    pub name: String,
    /// Requested configuration.
    pub spec: PortSpec,
    /// Observed state.
    pub status: PortStatus,
}

impl PortDescriptor {
    /// Builds an empty descriptor for an unknown port name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            spec: PortSpec::default(),
            status: PortStatus {
                oper_status: OperStatus::Unknown,
            },
        }
    }
}

/// Internal record tying a created port to its reserved interface.
#[derive(Debug, Clone)]
pub struct BridgePortRecord {
    /// The descriptor returned to callers.
    pub descriptor: PortDescriptor,
    /// The pool interface attached to the bridge for this port.
    pub interface: String,
}

/// Control endpoint returned by lifecycle initialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPort {
    /// Control-plane IP address.
    pub ip: String,
    /// Control-plane TCP port.
    pub port: u16,
}

/// Parses a colon-separated hardware address into octets.
pub fn parse_mac(s: &str) -> Option<Vec<u8>> {
    let octets: Vec<u8> = s
        .split(':')
        .map(|o| u8::from_str_radix(o, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    if octets.is_empty() {
        None
    } else {
        Some(octets)
    }
}

/// Formats octets as a colon-separated hardware address.
pub fn format_mac(octets: &[u8]) -> String {
    octets
        .iter()
        .map(|o| format!("{o:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Returns the first VLAN id of a request, or 0 when it does not parse.
///
/// 0 is outside the usable range, so an unparsable id is rejected by the
/// same range check as an out-of-range one.
pub fn first_vlan_id(vlan_ids: &[String]) -> i64 {
    vlan_ids
        .first()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(0)
}
