//! Debug session state machine against the simulated debugserver.

use devtunnel::debug::{DebugProxyClient, DebugserverCommand, SessionState};
use devtunnel::error::{Error, ErrorKind};

use crate::mock_device::{
    DEBUGPROXY_PORT, DeviceOptions, MockDevice, STOP_REPLY, TEST_PID, bound_adapter,
};

#[test]
fn second_attach_without_detach_is_rejected_locally() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut session = DebugProxyClient::new(bound_adapter(&proxy, DEBUGPROXY_PORT));

    session.attach(TEST_PID).unwrap();
    let err = session.attach(TEST_PID).unwrap_err();
    assert!(matches!(err, Error::AlreadyAttached { pid: TEST_PID }));
    assert_eq!(session.state(), SessionState::Attached { pid: TEST_PID });

    session.into_inner().unwrap().close().unwrap();
    proxy.close();
    // Only one attach reached the device.
    assert_eq!(device.finish().debug_commands, ["vAttach;1092"]);
}

#[test]
fn reattach_after_detach() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut session = DebugProxyClient::new(bound_adapter(&proxy, DEBUGPROXY_PORT));

    assert_eq!(session.attach(TEST_PID).unwrap().as_deref(), Some(STOP_REPLY));
    assert_eq!(session.detach().unwrap().as_deref(), Some("OK"));
    assert_eq!(session.attached_pid(), None);
    assert_eq!(session.attach(TEST_PID).unwrap().as_deref(), Some(STOP_REPLY));
    assert_eq!(session.continue_process().unwrap().as_deref(), Some("T05"));

    session.into_inner().unwrap().close().unwrap();
    proxy.close();
    assert_eq!(
        device.finish().debug_commands,
        ["vAttach;1092", "D", "vAttach;1092", "c"]
    );
}

#[test]
fn attach_to_unknown_pid_is_refused() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut session = DebugProxyClient::new(bound_adapter(&proxy, DEBUGPROXY_PORT));

    let err = session.attach(1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AttachRefused);
    assert_eq!(session.state(), SessionState::Connected);

    session.into_inner().unwrap().close().unwrap();
    proxy.close();
    device.finish();
}

#[test]
fn detach_without_attach_still_reaches_device() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut session = DebugProxyClient::new(bound_adapter(&proxy, DEBUGPROXY_PORT));

    assert_eq!(session.detach().unwrap().as_deref(), Some("OK"));
    assert_eq!(session.state(), SessionState::Connected);

    session.into_inner().unwrap().close().unwrap();
    proxy.close();
    assert_eq!(device.finish().debug_commands, ["D"]);
}

#[test]
fn unsupported_command_yields_empty_reply() {
    let device = MockDevice::spawn(DeviceOptions::default());
    let proxy = device.open_tunnel();
    let mut session = DebugProxyClient::new(bound_adapter(&proxy, DEBUGPROXY_PORT));

    session.set_ack_mode(false).unwrap();
    let reply = session
        .send_command(&DebugserverCommand::new("qHostInfo", Vec::new()))
        .unwrap();
    assert_eq!(reply, None);
    assert_eq!(
        session.set_ack_mode(true).unwrap_err().kind(),
        ErrorKind::Input
    );

    session.into_inner().unwrap().close().unwrap();
    proxy.close();
    assert_eq!(
        device.finish().debug_commands,
        ["QStartNoAckMode", "qHostInfo"]
    );
}
