//! Reserved-interface pool for bridge ports.
//!
//! A fixed, ordered set of interfaces is held back from device listings
//! and handed out to bridge ports one at a time. Allocation picks the
//! first free entry in declared order, so the same request pattern
//! always binds the same interfaces.

use tracing::{debug, warn};

use ipu_mgr_common::{PluginError, PluginResult};

/// Interfaces reserved for bridge ports, in allocation order.
pub const RESERVED_PORT_INTERFACES: [&str; 3] = ["enp0s1f0d4", "enp0s1f0d5", "enp0s1f0d6"];

#[derive(Debug, Clone)]
struct PoolEntry {
    name: String,
    in_use: bool,
}

/// Fixed pool of reserved interfaces.
#[derive(Debug, Clone)]
pub struct InterfacePool {
    entries: Vec<PoolEntry>,
}

impl InterfacePool {
    /// Creates a pool over the given interface names, in order.
    pub fn new(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            entries: names
                .into_iter()
                .map(|name| PoolEntry {
                    name: name.into(),
                    in_use: false,
                })
                .collect(),
        }
    }

    /// The default pool over [`RESERVED_PORT_INTERFACES`].
    pub fn reserved() -> Self {
        Self::new(RESERVED_PORT_INTERFACES)
    }

    /// Total number of reserved interfaces.
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of interfaces currently free.
    pub fn available(&self) -> usize {
        self.entries.iter().filter(|e| !e.in_use).count()
    }

    /// True when the named interface is currently allocated.
    pub fn is_allocated(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name && e.in_use)
    }

    /// Allocates the first free interface in declared order.
    pub fn allocate(&mut self) -> PluginResult<String> {
        for entry in &mut self.entries {
            if !entry.in_use {
                entry.in_use = true;
                debug!(iface = %entry.name, "allocated reserved interface");
                return Ok(entry.name.clone());
            }
        }
        warn!("reserved interface pool exhausted");
        Err(PluginError::PoolExhausted)
    }

    /// Returns an allocated interface to the pool.
    ///
    /// Releasing an untracked or already-free name is a no-op; the
    /// condition is logged because it indicates a bookkeeping bug in the
    /// caller.
    pub fn release(&mut self, name: &str) {
        match self.entries.iter_mut().find(|e| e.name == name) {
            Some(entry) if entry.in_use => {
                entry.in_use = false;
                debug!(iface = %name, "released reserved interface");
            }
            Some(_) => warn!(iface = %name, "release of interface that was not allocated"),
            None => warn!(iface = %name, "release of interface not in the pool"),
        }
    }
}

impl Default for InterfacePool {
    fn default() -> Self {
        Self::reserved()
    }
}
