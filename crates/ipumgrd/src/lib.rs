//! ipumgrd - port provisioning and lifecycle manager for IPU offload cards.
//!
//! The daemon brings a node with an attached offload card to a ready
//! state and manages VF-backed bridge ports for network functions:
//!
//! - [`bridge_port::BridgePortService`]: create/delete/get/list over a
//!   fixed pool of reserved interfaces, with idempotent creates and
//!   rollback on attach failure
//! - [`lifecycle::LifeCycleService`]: bootstrap validation, conditional
//!   remote reprovisioning, rule preconfiguration and control-channel
//!   bring-up
//! - [`netfn::NetworkFunctionService`]: steering host VF traffic through
//!   a network function
//!
//! External collaborators (OVS bridge CLI, the forwarding-rule compiler,
//! the management-controller SSH channel, sysfs device enumeration) sit
//! behind constructor-injected traits with in-memory fakes in tests.

pub mod bootstrap;
pub mod bridge;
pub mod bridge_port;
pub mod channel;
pub mod commands;
pub mod config;
pub mod inventory;
pub mod lifecycle;
pub mod netfn;
pub mod pool;
pub mod remote;
pub mod rules;
pub mod types;

pub use bridge_port::BridgePortService;
pub use config::DaemonConfig;
pub use lifecycle::LifeCycleService;
pub use netfn::NetworkFunctionService;
pub use types::Mode;
