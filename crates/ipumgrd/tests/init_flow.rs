//! Lifecycle initialization flows over in-memory collaborators.

use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use ipu_mgr_common::{ErrorClass, PluginError, RetryPolicy};
use ipumgrd::bootstrap::BootstrapValidator;
use ipumgrd::{DaemonConfig, LifeCycleService, Mode, NetworkFunctionService};

mod common;
use common::{FakeAddressOps, FakeInventory, FakeRemote, FakeRules};

fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(8, Duration::ZERO)
}

fn lifecycle(
    mode: Mode,
    inventory: FakeInventory,
    remote: FakeRemote,
    activate_after: usize,
) -> (
    LifeCycleService,
    Arc<FakeRemote>,
    Arc<FakeRules>,
    Arc<FakeAddressOps>,
) {
    let remote = Arc::new(remote);
    let rules = Arc::new(FakeRules::default());
    let addr_ops = Arc::new(FakeAddressOps::new(activate_after));
    let service = LifeCycleService::new(
        DaemonConfig::for_mode(mode),
        Arc::new(inventory),
        remote.clone(),
        rules.clone(),
        addr_ops.clone(),
    )
    .with_retry_policy(fast_retry());
    (service, remote, rules, addr_ops)
}

fn two_vf_macs() -> Vec<String> {
    vec![
        "00:1a:00:00:03:14".to_string(),
        "00:1a:00:00:03:15".to_string(),
    ]
}

#[tokio::test]
async fn init_rejects_mode_mismatch() {
    let (service, _remote, _rules, _ops) = lifecycle(
        Mode::Host,
        FakeInventory::pf_set(3, 1, 0x03),
        FakeRemote::default(),
        0,
    );

    let err = service.init(true).await.unwrap_err();
    assert!(matches!(err, PluginError::ModeMismatch { .. }));
    assert_eq!(err.class(), ErrorClass::Config);
}

#[tokio::test]
async fn host_init_configures_channel_without_touching_the_controller() {
    let (service, remote, rules, ops) = lifecycle(
        Mode::Host,
        FakeInventory::pf_set(3, 1, 0x03),
        FakeRemote::default(),
        0,
    );

    let endpoint = service.init(false).await.unwrap();

    // The reported endpoint is always the card-side control IP.
    assert_eq!(endpoint.ip, "192.168.1.2");
    assert_eq!(endpoint.port, 50151);

    // The host-side address landed on the marked function.
    let addresses = ops.addresses.lock().unwrap().clone();
    assert_eq!(addresses.len(), 1);
    assert_eq!(addresses[0].0, "enp0s1f0d1");
    assert_eq!(addresses[0].1.to_string(), "192.168.1.1");

    // No bootstrap traffic in host mode.
    assert!(remote.commands.lock().unwrap().is_empty());
    assert!(rules.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn ipu_init_with_valid_bootstrap_programs_default_rules() {
    let remote = FakeRemote {
        marker_exists: true,
        vf_macs: two_vf_macs(),
        ..Default::default()
    };
    let (service, remote, rules, _ops) =
        lifecycle(Mode::Ipu, FakeInventory::pf_set(16, 3, 0x04), remote, 0);

    let endpoint = service.init(true).await.unwrap();
    assert_eq!(endpoint.ip, "192.168.1.2");

    // Stale rules cleared, then defaults installed.
    assert_eq!(
        rules.calls.lock().unwrap().clone(),
        vec!["p2p- 2".to_string(), "p2p+ 2".to_string()]
    );

    // Bootstrap was valid: nothing was uploaded, no reboot issued.
    assert!(remote.uploads.lock().unwrap().is_empty());
    assert!(!remote
        .commands
        .lock()
        .unwrap()
        .iter()
        .any(|c| c == "reboot"));
}

#[tokio::test]
async fn ipu_init_reprovisions_on_pf_shortfall() {
    // Marker present but too few functions: validation must fail and
    // trigger reprovisioning regardless of the marker.
    let remote = FakeRemote {
        marker_exists: true,
        vf_macs: two_vf_macs(),
        ..Default::default()
    };
    let (service, remote, _rules, _ops) =
        lifecycle(Mode::Ipu, FakeInventory::pf_set(8, 3, 0x04), remote, 0);

    service.init(true).await.unwrap();

    let uploads = remote.uploads.lock().unwrap().clone();
    let paths: Vec<&str> = uploads.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "/work/scripts/rh_mvp.pkg",
            "/work/scripts/load_custom_pkg.sh",
            "/work/uuid",
        ]
    );

    // The loader script carries the typed override values.
    let script = String::from_utf8(uploads[1].1.clone()).unwrap();
    assert!(script.contains("acc_apf = 16;"));
    assert!(script.contains("sem_num_pages = 25;"));

    // The marker records the generated base MAC.
    let marker = String::from_utf8(uploads[2].1.clone()).unwrap();
    assert!(marker.starts_with("00:00:00:00:"));
    assert!(marker.ends_with('\n'));

    let commands = remote.commands.lock().unwrap().clone();
    assert!(commands.iter().any(|c| c.contains("pre_init_app.sh")));
    assert_eq!(commands.last().map(|c| c.as_str()), Some("/usr/bin/cli_client -q -c"));
    assert!(commands.iter().any(|c| c == "reboot"));
}

#[tokio::test]
async fn ipu_init_fails_when_reprovisioning_fails() {
    let remote = FakeRemote {
        marker_exists: false,
        vf_macs: two_vf_macs(),
        fail_uploads: true,
        ..Default::default()
    };
    let (service, _remote, rules, _ops) =
        lifecycle(Mode::Ipu, FakeInventory::pf_set(8, 3, 0x04), remote, 0);

    let err = service.init(true).await.unwrap_err();
    assert_eq!(err.class(), ErrorClass::External);

    // Nothing was programmed on a failed bring-up.
    assert!(rules.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn ipu_init_fails_without_host_vfs() {
    let remote = FakeRemote {
        marker_exists: true,
        vf_macs: Vec::new(),
        ..Default::default()
    };
    let (service, _remote, _rules, _ops) =
        lifecycle(Mode::Ipu, FakeInventory::pf_set(16, 3, 0x04), remote, 0);

    let err = service.init(true).await.unwrap_err();
    assert!(err.to_string().contains("no NFs initialized"));
}

#[tokio::test]
async fn channel_timeout_is_deterministic() {
    let (service, _remote, _rules, ops) = lifecycle(
        Mode::Host,
        FakeInventory::pf_set(3, 1, 0x03),
        FakeRemote::default(),
        usize::MAX,
    );

    let err = service.init(false).await.unwrap_err();
    match err {
        PluginError::ChannelConfigTimeout { iface, attempts } => {
            assert_eq!(iface, "enp0s1f0d1");
            assert_eq!(attempts, 8);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The probe loop ran within its budget, not indefinitely.
    assert!(ops.probes.load(std::sync::atomic::Ordering::SeqCst) <= 8);
}

#[tokio::test]
async fn bootstrap_validation_requires_pf_count_and_marker() {
    let marker_only = BootstrapValidator::new(
        Arc::new(FakeInventory::pf_set(15, 0, 0x04)),
        Arc::new(FakeRemote {
            marker_exists: true,
            ..Default::default()
        }),
    );
    assert!(!marker_only.validate().await);

    let pfs_only = BootstrapValidator::new(
        Arc::new(FakeInventory::pf_set(16, 0, 0x04)),
        Arc::new(FakeRemote::default()),
    );
    assert!(!pfs_only.validate().await);

    let both = BootstrapValidator::new(
        Arc::new(FakeInventory::pf_set(16, 0, 0x04)),
        Arc::new(FakeRemote {
            marker_exists: true,
            ..Default::default()
        }),
    );
    assert!(both.validate().await);
}

#[tokio::test]
async fn network_function_rules_round_trip() {
    let remote = Arc::new(FakeRemote {
        vf_macs: two_vf_macs(),
        ..Default::default()
    });
    let rules = Arc::new(FakeRules::default());
    let service = NetworkFunctionService::new(rules.clone(), remote);

    service
        .create_network_function("00:0a:00:00:03:14", "00:0b:00:00:03:15")
        .await
        .unwrap();
    service
        .delete_network_function("00:0a:00:00:03:14", "00:0b:00:00:03:15")
        .await
        .unwrap();

    assert_eq!(
        rules.calls.lock().unwrap().clone(),
        vec![
            "nf+ 00:0a:00:00:03:14 00:0b:00:00:03:15".to_string(),
            "nf- 00:0a:00:00:03:14 00:0b:00:00:03:15".to_string(),
            "p2p+ 2".to_string(),
        ]
    );
}

#[tokio::test]
async fn network_function_requires_initialized_vfs() {
    let remote = Arc::new(FakeRemote::default());
    let rules = Arc::new(FakeRules::default());
    let service = NetworkFunctionService::new(rules.clone(), remote);

    let err = service
        .create_network_function("00:0a:00:00:03:14", "00:0b:00:00:03:15")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no NFs initialized"));
    assert!(rules.calls.lock().unwrap().is_empty());
}
