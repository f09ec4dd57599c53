//! Error types shared by the IPU port-manager crates.
//!
//! All errors implement `std::error::Error` via `thiserror`. Each variant
//! belongs to one [`ErrorClass`], which callers use to decide whether a
//! failure changed any state (validation never does) or rolled back a
//! partial allocation (external failures).

use std::io;
use thiserror::Error;

/// Result type alias for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Broad failure classes, used for reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad request input; rejected before any state change.
    Validation,
    /// A bounded resource (the reserved interface pool) is exhausted.
    ResourceExhausted,
    /// A collaborator (bridge, rule compiler, remote shell, sysfs) failed.
    External,
    /// A bounded retry loop ran out of attempts.
    ConvergenceTimeout,
    /// The request targets a mode this process is not running in.
    Config,
    /// Unexpected internal state.
    Internal,
}

/// Errors surfaced by the port-manager services.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Hardware address outside the 1..=6 octet range.
    #[error("invalid mac address provided ({octets} octets)")]
    InvalidMac {
        /// Number of octets in the rejected address.
        octets: usize,
    },

    /// No VLAN id present in the request.
    #[error("vlan id is not provided")]
    MissingVlan,

    /// VLAN id outside the usable range.
    #[error("invalid vlan {vlan}, vlan must be within 2-4094 range")]
    InvalidVlan {
        /// The rejected VLAN id (0 when the id did not parse).
        vlan: i64,
    },

    /// VSI derived from the second MAC octet must be positive.
    #[error("invalid VSI {vsi} in given mac address, the 2nd octet must be > 0")]
    InvalidVsi {
        /// The derived VSI value.
        vsi: i64,
    },

    /// All reserved interfaces are in use.
    #[error("no reserved interface available")]
    PoolExhausted,

    /// The request asked for a mode the daemon is not running in.
    #[error("plugin running in {running} mode, request targets {requested} mode")]
    ModeMismatch {
        /// Mode named by the request.
        requested: String,
        /// Mode the daemon was started in.
        running: String,
    },

    /// The address-convergence loop exhausted its retry budget.
    #[error("channel configuration timed out on {iface} after {attempts} attempts")]
    ChannelConfigTimeout {
        /// Interface the address was being brought up on.
        iface: String,
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// A shell command could not be spawned.
    #[error("failed to execute '{command}': {source}")]
    ShellExec {
        /// The command that failed to spawn.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A shell command exited non-zero.
    #[error("command failed: '{command}' (exit code {exit_code}): {output}")]
    ShellCommandFailed {
        /// The command that failed.
        command: String,
        /// Its exit code.
        exit_code: i32,
        /// Combined stdout/stderr.
        output: String,
    },

    /// A bridge operation on an attached interface failed.
    #[error("bridge {op} failed for {port}: {message}")]
    Bridge {
        /// The operation ("attach", "detach", "ensure").
        op: String,
        /// The interface or bridge involved.
        port: String,
        /// Collaborator error text.
        message: String,
    },

    /// The forwarding-rule compiler failed.
    #[error("rule {op} failed: {message}")]
    Rules {
        /// The rule operation.
        op: String,
        /// Collaborator error text.
        message: String,
    },

    /// The management-controller channel failed.
    #[error("remote {op} failed: {message}")]
    Remote {
        /// The remote operation ("connect", "exec", "upload").
        op: String,
        /// Collaborator error text.
        message: String,
    },

    /// Device enumeration failed.
    #[error("device inventory error: {message}")]
    Inventory {
        /// Error message.
        message: String,
    },

    /// Unexpected internal state.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl PluginError {
    /// Creates a bridge operation error.
    pub fn bridge(op: impl Into<String>, port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Bridge {
            op: op.into(),
            port: port.into(),
            message: message.into(),
        }
    }

    /// Creates a rule-programming error.
    pub fn rules(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rules {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Creates a remote-channel error.
    pub fn remote(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Creates an inventory error.
    pub fn inventory(message: impl Into<String>) -> Self {
        Self::Inventory {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the failure class of this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            PluginError::InvalidMac { .. }
            | PluginError::MissingVlan
            | PluginError::InvalidVlan { .. }
            | PluginError::InvalidVsi { .. } => ErrorClass::Validation,
            PluginError::PoolExhausted => ErrorClass::ResourceExhausted,
            PluginError::ModeMismatch { .. } => ErrorClass::Config,
            PluginError::ChannelConfigTimeout { .. } => ErrorClass::ConvergenceTimeout,
            PluginError::ShellExec { .. }
            | PluginError::ShellCommandFailed { .. }
            | PluginError::Bridge { .. }
            | PluginError::Rules { .. }
            | PluginError::Remote { .. }
            | PluginError::Inventory { .. } => ErrorClass::External,
            PluginError::Internal { .. } => ErrorClass::Internal,
        }
    }

    /// True for request errors that never mutate state.
    pub fn is_validation(&self) -> bool {
        self.class() == ErrorClass::Validation
    }
}
