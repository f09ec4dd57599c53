//! ipumgrd - IPU Port Manager Daemon
//!
//! Entry point: parses configuration, wires the production
//! collaborators into the services and waits for shutdown. The control
//! transport is provided by the embedding process; this binary owns the
//! provisioning state.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use ipumgrd::bridge::{BridgeController, OvsBridge};
use ipumgrd::channel::NmcliAddressOps;
use ipumgrd::inventory::SysfsInventory;
use ipumgrd::remote::SshRemoteChannel;
use ipumgrd::rules::FxpRuleProgrammer;
use ipumgrd::{BridgePortService, DaemonConfig, LifeCycleService, NetworkFunctionService};

/// Initializes tracing/logging subsystem
fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = DaemonConfig::parse();
    init_logging();

    info!("--- Starting ipumgrd ({} mode) ---", config.mode);

    let inventory = Arc::new(SysfsInventory::new());
    let bridge = Arc::new(OvsBridge::new(&config.bridge_name, &config.ovs_cli_dir));
    let rules = Arc::new(FxpRuleProgrammer::new(&config.rule_compiler));
    let remote = Arc::new(SshRemoteChannel::imc(&config.imc_address));
    let addr_ops = Arc::new(NmcliAddressOps);

    bridge
        .ensure_bridge()
        .await
        .context("function bridge setup failed")?;

    let _ports = Arc::new(BridgePortService::new(bridge.clone(), rules.clone()));
    let _netfn = NetworkFunctionService::new(rules.clone(), remote.clone());
    let _lifecycle = LifeCycleService::new(config.clone(), inventory, remote, rules, addr_ops);

    info!("port, network-function and lifecycle services ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to wait for shutdown signal")?;

    info!("shutting down, removing function bridge");
    if let Err(e) = bridge.delete_bridges().await {
        warn!("bridge teardown failed: {e}");
    }

    Ok(())
}
