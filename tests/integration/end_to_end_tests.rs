//! Full launch-and-debug pipeline against the simulated device.

use devtunnel::config::{ClientConfig, DEFAULT_TUNNEL_MTU};
use devtunnel::error::ErrorKind;
use devtunnel::rpc::RemoteServerClient;
use devtunnel::rpc::process_control::{OPTION_KILL_EXISTING, OPTION_START_SUSPENDED};
use devtunnel::rpc::value::RpcValue;
use devtunnel::rsd::{DEBUGPROXY_SERVICE, SERVICE_HUB_SERVICE, ServiceCatalog};
use devtunnel::transport::TransportProvider;
use devtunnel::workflow;

use crate::mock_device::{
    DEBUGPROXY_PORT, DeviceOptions, MockDevice, RSD_PORT, SERVICE_HUB_PORT, STOP_REPLY,
    TEST_BUNDLE, TEST_PID, bound_adapter,
};

#[test]
fn launch_attach_detach_happy_path() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let report =
        workflow::launch_and_debug(&device.provider(), TEST_BUNDLE, &ClientConfig::default())
            .unwrap();

    assert_eq!(report.rsd_port, RSD_PORT);
    assert_eq!(report.pid, TEST_PID);
    assert_eq!(report.attach_response.as_deref(), Some(STOP_REPLY));
    assert_eq!(report.detach_responses, vec![Some("OK".to_string())]);

    let log = device.finish();
    assert!(log.authenticated);
    assert_eq!(log.requested_mtu, Some(DEFAULT_TUNNEL_MTU));
    assert_eq!(log.opened_ports, [RSD_PORT, SERVICE_HUB_PORT, DEBUGPROXY_PORT]);
    assert_eq!(log.launches, [TEST_BUNDLE]);
    assert_eq!(
        log.launch_options[0].get(OPTION_START_SUSPENDED),
        Some(&RpcValue::Bool(true))
    );
    assert_eq!(
        log.launch_options[0].get(OPTION_KILL_EXISTING),
        Some(&RpcValue::Bool(false))
    );
    assert_eq!(log.debug_commands, ["vAttach;1092", "D"]);
    // RSD and hub streams released on rebind, debug stream on close.
    assert_eq!(log.closed_streams, 3);
    assert!(log.shutdown);
}

#[test]
fn repeated_detach_surfaces_every_outcome() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let config = ClientConfig {
        detach_attempts: 3,
        ..ClientConfig::default()
    };
    let report = workflow::launch_and_debug(&device.provider(), TEST_BUNDLE, &config).unwrap();
    assert_eq!(report.detach_responses.len(), 3);

    let log = device.finish();
    assert_eq!(log.debug_commands, ["vAttach;1092", "D", "D", "D"]);
}

#[test]
fn no_ack_mode_is_negotiated_first() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let config = ClientConfig {
        disable_acks: true,
        ..ClientConfig::default()
    };
    let report = workflow::launch_and_debug(&device.provider(), TEST_BUNDLE, &config).unwrap();
    assert_eq!(report.attach_response.as_deref(), Some(STOP_REPLY));

    let log = device.finish();
    assert_eq!(log.debug_commands, ["QStartNoAckMode", "vAttach;1092", "D"]);
}

#[test]
fn unknown_bundle_is_bundle_not_found() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let err = workflow::launch_and_debug(
        &device.provider(),
        "com.example.missing",
        &ClientConfig::default(),
    )
    .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BundleNotFound);

    let log = device.finish();
    assert_eq!(log.launches, ["com.example.missing"]);
    assert!(log.debug_commands.is_empty());
}

#[test]
fn wrong_pairing_secret_is_handshake_error() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let other = devtunnel::pairing::PairingCredential::new("HOST-1", "BUID-1", &[7; 32]).unwrap();
    let provider = devtunnel::adapters::tcp_provider::TcpProvider::new(
        device.addr,
        other,
        &ClientConfig::default(),
    );
    let err = provider.connect().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Handshake);
    assert!(!device.finish().authenticated);
}

#[test]
fn missing_debug_service_aborts_before_launch() {
    let device = MockDevice::spawn(DeviceOptions {
        advertise_debugproxy: false,
        ..DeviceOptions::default()
    });
    let err = workflow::launch_and_debug(&device.provider(), TEST_BUNDLE, &ClientConfig::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert!(device.finish().launches.is_empty());
}

#[test]
fn refused_service_port_is_connect_error() {
    let device = MockDevice::spawn(DeviceOptions {
        refused_ports: vec![DEBUGPROXY_PORT],
        ..DeviceOptions::default()
    });
    let err = workflow::launch_and_debug(&device.provider(), TEST_BUNDLE, &ClientConfig::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);

    // The launch itself went through before the debug port was refused.
    assert_eq!(device.finish().launches, [TEST_BUNDLE]);
}

#[test]
fn catalog_lookup_miss_is_none() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let catalog = ServiceCatalog::open(bound_adapter(&proxy, proxy.server_rsd_port())).unwrap();

    assert_eq!(catalog.lookup("com.example.nonexistent").unwrap(), None);
    assert_eq!(
        catalog.lookup(DEBUGPROXY_SERVICE).unwrap().map(|s| s.port),
        Some(DEBUGPROXY_PORT)
    );
    let hub = catalog.lookup(SERVICE_HUB_SERVICE).unwrap().unwrap();
    assert_eq!(hub.port, SERVICE_HUB_PORT);
    assert_eq!(hub.features, ["com.apple.dt.profile"]);
    assert_eq!(catalog.services().unwrap().len(), 3);

    proxy.close();
    device.finish();
}

#[test]
fn kill_and_memory_limit_over_the_tunnel() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut rpc = RemoteServerClient::new(bound_adapter(&proxy, SERVICE_HUB_PORT));
    {
        let mut pc = devtunnel::rpc::process_control::ProcessControlClient::new(&mut rpc).unwrap();
        let pid = pc
            .launch_app(TEST_BUNDLE, &["-x"], &Default::default(), false, true)
            .unwrap();
        assert!(pc.disable_memory_limit(pid).unwrap());
        pc.kill_app(pid).unwrap();
    }
    rpc.into_inner().unwrap().close().unwrap();
    proxy.close();

    let log = device.finish();
    assert_eq!(log.killed, [TEST_PID]);
    assert_eq!(
        log.launch_options[0].get(OPTION_KILL_EXISTING),
        Some(&RpcValue::Bool(true))
    );
    assert_eq!(
        log.channels,
        ["com.apple.instruments.server.services.processcontrol"]
    );
}
