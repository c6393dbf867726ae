//! Adapter hand-off between protocol layers over a live tunnel.

use devtunnel::debug::DebugProxyClient;
use devtunnel::error::ErrorKind;
use devtunnel::rpc::RemoteServerClient;
use devtunnel::rsd::{DEBUGPROXY_SERVICE, ServiceCatalog};
use devtunnel::transport::Transport;
use devtunnel::tunnel::AdapterState;

use crate::mock_device::{
    DEBUGPROXY_PORT, DeviceOptions, MockDevice, SERVICE_HUB_PORT, STOP_REPLY, TEST_PID,
    bound_adapter,
};

#[test]
fn extracted_catalog_refuses_further_calls() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut catalog =
        ServiceCatalog::open(bound_adapter(&proxy, proxy.server_rsd_port())).unwrap();

    let adapter = catalog.extract_adapter().unwrap();
    // The adapter keeps its binding across the hand-off.
    assert_eq!(adapter.state(), AdapterState::Bound);
    assert_eq!(adapter.port(), Some(proxy.server_rsd_port()));

    assert_eq!(
        catalog.lookup(DEBUGPROXY_SERVICE).unwrap_err().kind(),
        ErrorKind::UseAfterExtract
    );
    assert_eq!(
        catalog.extract_adapter().unwrap_err().kind(),
        ErrorKind::UseAfterExtract
    );

    drop(adapter);
    proxy.close();
    assert_eq!(device.finish().closed_streams, 1);
}

#[test]
fn extracted_rpc_client_refuses_further_calls() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut rpc = RemoteServerClient::new(bound_adapter(&proxy, SERVICE_HUB_PORT));

    let _adapter = rpc.extract_adapter().unwrap();
    assert_eq!(
        rpc.make_channel("com.apple.instruments.server.services.deviceinfo")
            .unwrap_err()
            .kind(),
        ErrorKind::UseAfterExtract
    );

    proxy.close();
    // Nothing was sent on the hub stream.
    assert!(device.finish().channels.is_empty());
}

#[test]
fn extracted_debug_session_refuses_further_calls() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut session = DebugProxyClient::new(bound_adapter(&proxy, DEBUGPROXY_PORT));

    let _adapter = session.extract_adapter().unwrap();
    assert_eq!(
        session.attach(TEST_PID).unwrap_err().kind(),
        ErrorKind::UseAfterExtract
    );
    assert_eq!(
        session.continue_process().unwrap_err().kind(),
        ErrorKind::UseAfterExtract
    );

    proxy.close();
    assert!(device.finish().debug_commands.is_empty());
}

#[test]
fn bound_adapter_must_disconnect_before_rebinding() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut adapter = bound_adapter(&proxy, SERVICE_HUB_PORT);

    let err = adapter.connect(DEBUGPROXY_PORT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    // The failed call left the binding alone.
    assert_eq!(adapter.port(), Some(SERVICE_HUB_PORT));

    adapter.disconnect().unwrap();
    assert_eq!(adapter.state(), AdapterState::Idle);
    adapter.connect(DEBUGPROXY_PORT).unwrap();

    let mut session = DebugProxyClient::new(adapter);
    assert_eq!(session.attach(TEST_PID).unwrap().as_deref(), Some(STOP_REPLY));
    session.into_inner().unwrap().close().unwrap();
    proxy.close();

    let log = device.finish();
    assert_eq!(log.opened_ports, [SERVICE_HUB_PORT, DEBUGPROXY_PORT]);
    assert_eq!(log.closed_streams, 2);
}

#[test]
fn idle_adapter_io_is_protocol_violation() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut adapter = proxy.create_tcp_adapter().unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(
        adapter.read(&mut buf).unwrap_err().kind(),
        ErrorKind::ProtocolViolation
    );
    assert_eq!(
        adapter.write_all(b"ping").unwrap_err().kind(),
        ErrorKind::ProtocolViolation
    );
    assert_eq!(
        adapter.disconnect().unwrap_err().kind(),
        ErrorKind::ProtocolViolation
    );

    proxy.close();
    assert!(device.finish().opened_ports.is_empty());
}

#[test]
fn adapter_io_after_tunnel_close_is_transport_error() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut adapter = bound_adapter(&proxy, DEBUGPROXY_PORT);

    proxy.close();
    assert!(proxy.is_closed());
    assert_eq!(
        adapter.write_all(b"$D#44").unwrap_err().kind(),
        ErrorKind::Transport
    );
    assert_eq!(adapter.state(), AdapterState::Closed);
    assert_eq!(
        proxy.create_tcp_adapter().unwrap_err().kind(),
        ErrorKind::Transport
    );

    assert!(device.finish().shutdown);
}

#[test]
fn refused_connect_leaves_adapter_closed() {
    let device = MockDevice::spawn(DeviceOptions {
        refused_ports: vec![SERVICE_HUB_PORT],
        ..DeviceOptions::default()
    });
    let proxy = device.open_tunnel();
    let mut adapter = proxy.create_tcp_adapter().unwrap();

    let err = adapter.connect(SERVICE_HUB_PORT).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Connect);
    assert_eq!(adapter.state(), AdapterState::Closed);

    // The tunnel itself is still usable.
    let mut other = bound_adapter(&proxy, DEBUGPROXY_PORT);
    other.write_all(b"+").unwrap();
    drop(other);
    proxy.close();
    assert_eq!(device.finish().opened_ports, [SERVICE_HUB_PORT, DEBUGPROXY_PORT]);
}
