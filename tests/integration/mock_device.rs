//! Simulated device for integration tests.
//!
//! Listens on loopback, runs the pairing proof and CDTunnel handshake,
//! then serves three services over the mux: the RSD catalog, the
//! instruments hub (process control) and the debugserver proxy.  Every
//! request it sees is recorded in a [`DeviceLog`] the test inspects after
//! the client hangs up.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::{SocketAddr, TcpListener};
use std::thread::{self, JoinHandle};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

use devtunnel::adapters::tcp_provider::{PairingMessage, TcpProvider, TcpTransport};
use devtunnel::codec;
use devtunnel::config::ClientConfig;
use devtunnel::debug::packet::{PacketDecoder, PacketEvent, encode_packet};
use devtunnel::error::{Error, Result};
use devtunnel::pairing::PairingCredential;
use devtunnel::rpc::codec::{
    CONVERSATION_REPLY, CONVERSATION_REQUEST, Envelope, EnvelopeReader, write_envelope,
};
use devtunnel::rpc::process_control::{
    DISABLE_MEMORY_LIMIT_SELECTOR, KILL_SELECTOR, LAUNCH_SELECTOR, PROCESS_CONTROL_CHANNEL,
};
use devtunnel::rpc::value::{FAULT_NOT_FOUND, RpcMessage, RpcValue};
use devtunnel::rpc::REQUEST_CHANNEL_SELECTOR;
use devtunnel::rsd::{
    CatalogReply, CatalogRequest, DEBUGPROXY_SERVICE, SERVICE_HUB_SERVICE, ServiceEntry,
    ServiceProperties,
};
use devtunnel::transport::{Transport, TransportProvider};
use devtunnel::tunnel::handshake::{
    self, ClientParameters, HandshakeRequest, HandshakeResponse, SERVER_HANDSHAKE_RESPONSE,
};
use devtunnel::tunnel::mux::{FrameKind, MuxDecoder, MuxFrame};
use devtunnel::tunnel::{Adapter, CoreDeviceProxy};

pub const RSD_PORT: u16 = 58783;
pub const DEBUGPROXY_PORT: u16 = 52001;
pub const SERVICE_HUB_PORT: u16 = 52002;
pub const DEVICE_MTU: u32 = 1500;

pub const TEST_BUNDLE: &str = "com.example.app";
pub const TEST_PID: u64 = 4242;
pub const STOP_REPLY: &str = "T11thread:1c03;name:app;";

// ── Configuration and record ──────────────────────────────────

#[derive(Clone)]
pub struct DeviceOptions {
    pub secret: [u8; 32],
    pub installed_bundle: String,
    pub pid: u64,
    pub advertise_debugproxy: bool,
    /// Ports whose `Open` is refused even though they are advertised.
    pub refused_ports: Vec<u16>,
    /// Send an unsolicited notification before each RPC reply.
    pub chatty_hub: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            secret: [0x42; 32],
            installed_bundle: TEST_BUNDLE.to_string(),
            pid: TEST_PID,
            advertise_debugproxy: true,
            refused_ports: Vec::new(),
            chatty_hub: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct DeviceLog {
    pub authenticated: bool,
    pub requested_mtu: Option<u32>,
    pub opened_ports: Vec<u16>,
    pub closed_streams: usize,
    pub channels: Vec<String>,
    pub launches: Vec<String>,
    pub launch_options: Vec<RpcValue>,
    pub killed: Vec<u64>,
    pub debug_commands: Vec<String>,
    pub shutdown: bool,
}

// ── In-memory pipe for the hub's message parser ───────────────

struct Pipe {
    input: Vec<u8>,
    pos: usize,
    output: Vec<u8>,
}

impl Pipe {
    fn new(input: &[u8]) -> Self {
        Self {
            input: input.to_vec(),
            pos: 0,
            output: Vec::new(),
        }
    }
}

impl Transport for Pipe {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let remaining = &self.input[self.pos..];
        if remaining.is_empty() {
            return Err(Error::Transport {
                context: "pipe drained",
                source: None,
            });
        }
        let n = buf.len().min(remaining.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.output.extend_from_slice(data);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

// ── Services ──────────────────────────────────────────────────

enum Service {
    Catalog { buf: Vec<u8> },
    Hub { buf: Vec<u8>, next_notice: u32 },
    Debug { decoder: PacketDecoder, ack_mode: bool },
}

impl Service {
    fn for_port(port: u16) -> Option<Self> {
        match port {
            RSD_PORT => Some(Self::Catalog { buf: Vec::new() }),
            SERVICE_HUB_PORT => Some(Self::Hub {
                buf: Vec::new(),
                next_notice: 1000,
            }),
            DEBUGPROXY_PORT => Some(Self::Debug {
                decoder: PacketDecoder::new(),
                ack_mode: true,
            }),
            _ => None,
        }
    }

    /// Consume stream bytes, returning whatever the service answers.
    fn on_data(&mut self, data: &[u8], opts: &DeviceOptions, log: &mut DeviceLog) -> Vec<u8> {
        match self {
            Self::Catalog { buf } => {
                buf.extend_from_slice(data);
                if buf.len() < 4 {
                    return Vec::new();
                }
                let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
                if buf.len() < 4 + len {
                    return Vec::new();
                }
                let request: CatalogRequest = serde_json::from_slice(&buf[4..4 + len]).unwrap();
                buf.drain(..4 + len);
                assert_eq!(request, CatalogRequest::default());
                let body = serde_json::to_vec(&catalog_reply(opts)).unwrap();
                codec::encode_frame(&body).unwrap()
            }
            Self::Hub { buf, next_notice } => {
                buf.extend_from_slice(data);
                let mut out = Vec::new();
                loop {
                    let mut pipe = Pipe::new(buf);
                    let Ok(envelope) = EnvelopeReader::new().read(&mut pipe) else {
                        break;
                    };
                    buf.drain(..pipe.pos);
                    if opts.chatty_hub && envelope.expects_reply {
                        let notice = Envelope {
                            message_id: *next_notice,
                            conversation: CONVERSATION_REQUEST,
                            channel: 0,
                            expects_reply: false,
                            message: RpcMessage::invoke("_notifyOfPublishedCapabilities:", vec![]),
                        };
                        *next_notice += 1;
                        write_envelope(&mut pipe, &notice, usize::MAX).unwrap();
                    }
                    if let Some(reply) = hub_answer(&envelope, opts, log) {
                        let reply = Envelope {
                            message_id: envelope.message_id,
                            conversation: CONVERSATION_REPLY,
                            channel: envelope.channel,
                            expects_reply: false,
                            message: reply,
                        };
                        write_envelope(&mut pipe, &reply, 1024).unwrap();
                    }
                    out.extend_from_slice(&pipe.output);
                }
                out
            }
            Self::Debug { decoder, ack_mode } => {
                decoder.feed(data);
                let mut out = Vec::new();
                while let Some(event) = decoder.next_event().unwrap() {
                    let PacketEvent::Packet(payload) = event else {
                        continue;
                    };
                    if *ack_mode {
                        out.push(b'+');
                    }
                    let command = String::from_utf8(payload).unwrap();
                    log.debug_commands.push(command.clone());
                    let reply = debug_answer(&command, opts);
                    out.extend_from_slice(&encode_packet(reply.as_bytes()));
                    if command == "QStartNoAckMode" {
                        *ack_mode = false;
                    }
                }
                out
            }
        }
    }
}

fn catalog_reply(opts: &DeviceOptions) -> CatalogReply {
    let mut services = BTreeMap::new();
    services.insert(
        SERVICE_HUB_SERVICE.to_string(),
        ServiceEntry {
            port: SERVICE_HUB_PORT.to_string(),
            entitlement: Some("com.apple.private.dt.instruments".into()),
            properties: Some(ServiceProperties {
                uses_remote_xpc: false,
                features: vec!["com.apple.dt.profile".into()],
                service_version: Some(1),
            }),
        },
    );
    if opts.advertise_debugproxy {
        services.insert(
            DEBUGPROXY_SERVICE.to_string(),
            ServiceEntry {
                port: DEBUGPROXY_PORT.to_string(),
                entitlement: None,
                properties: None,
            },
        );
    }
    services.insert(
        "com.apple.mobile.lockdown.remote.trusted".to_string(),
        ServiceEntry {
            port: "52003".into(),
            entitlement: None,
            properties: Some(ServiceProperties {
                uses_remote_xpc: true,
                ..ServiceProperties::default()
            }),
        },
    );
    CatalogReply {
        message_type: "Handshake".into(),
        services,
        uuid: Some("5B1A6E2C-0000-4000-8000-00000000D3E1".into()),
        properties: None,
    }
}

fn hub_answer(envelope: &Envelope, opts: &DeviceOptions, log: &mut DeviceLog) -> Option<RpcMessage> {
    let RpcMessage::Invoke { selector, args } = &envelope.message else {
        panic!("device received a non-invocation: {:?}", envelope.message);
    };
    let answer = match selector.as_str() {
        REQUEST_CHANNEL_SELECTOR => {
            let identifier = args[1].as_str().unwrap().to_string();
            let known = identifier == PROCESS_CONTROL_CHANNEL;
            log.channels.push(identifier);
            if known {
                RpcMessage::Reply(RpcValue::Null)
            } else {
                RpcMessage::Fault {
                    code: 2,
                    description: "unknown channel".into(),
                }
            }
        }
        LAUNCH_SELECTOR => {
            let bundle = args[1].as_str().unwrap().to_string();
            log.launches.push(bundle.clone());
            log.launch_options.push(args[4].clone());
            if bundle == opts.installed_bundle {
                RpcMessage::Reply(RpcValue::U64(opts.pid))
            } else {
                RpcMessage::Fault {
                    code: FAULT_NOT_FOUND,
                    description: format!("{bundle} is not installed"),
                }
            }
        }
        KILL_SELECTOR => {
            log.killed.push(args[0].as_u64().unwrap());
            return None;
        }
        DISABLE_MEMORY_LIMIT_SELECTOR => RpcMessage::Reply(RpcValue::Bool(true)),
        other => RpcMessage::Fault {
            code: 1,
            description: format!("unrecognized selector {other}"),
        },
    };
    envelope.expects_reply.then_some(answer)
}

fn debug_answer(command: &str, opts: &DeviceOptions) -> String {
    if let Some(hex) = command.strip_prefix("vAttach;") {
        return match u64::from_str_radix(hex, 16) {
            Ok(pid) if pid == opts.pid => STOP_REPLY.to_string(),
            _ => "E96".to_string(),
        };
    }
    match command {
        "D" | "QStartNoAckMode" => "OK".to_string(),
        "c" => "T05".to_string(),
        _ => String::new(),
    }
}

// ── Device thread ─────────────────────────────────────────────

pub struct MockDevice {
    pub addr: SocketAddr,
    opts: DeviceOptions,
    handle: JoinHandle<DeviceLog>,
}

impl MockDevice {
    pub fn spawn(opts: DeviceOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let device_opts = opts.clone();
        let handle = thread::spawn(move || serve(&listener, &device_opts));
        Self { addr, opts, handle }
    }

    pub fn credential(&self) -> PairingCredential {
        PairingCredential::new("HOST-1", "BUID-1", &self.opts.secret).unwrap()
    }

    pub fn provider(&self) -> TcpProvider {
        TcpProvider::new(self.addr, self.credential(), &ClientConfig::default())
    }

    /// Authenticate and negotiate a tunnel with the default MTU.
    pub fn open_tunnel(&self) -> CoreDeviceProxy {
        let transport = self.provider().connect().unwrap();
        CoreDeviceProxy::connect(transport).unwrap()
    }

    /// Wait for the client to hang up and return what the device saw.
    pub fn finish(self) -> DeviceLog {
        self.handle.join().unwrap()
    }
}

/// A fresh adapter already bound to `port`.
pub fn bound_adapter(proxy: &CoreDeviceProxy, port: u16) -> Adapter {
    let mut adapter = proxy.create_tcp_adapter().unwrap();
    adapter.connect(port).unwrap();
    adapter
}

fn serve(listener: &TcpListener, opts: &DeviceOptions) -> DeviceLog {
    let mut log = DeviceLog::default();
    let (stream, _) = listener.accept().unwrap();
    let mut t = TcpTransport::from_stream(stream).unwrap();

    if !prove_pairing(&mut t, opts) {
        return log;
    }
    log.authenticated = true;

    let request: HandshakeRequest = handshake::read_message(&mut t).unwrap();
    log.requested_mtu = Some(request.mtu);
    let response = HandshakeResponse {
        kind: SERVER_HANDSHAKE_RESPONSE.into(),
        client_parameters: ClientParameters {
            address: "fd35:d15d:9fc::2".into(),
            netmask: "ffff:ffff:ffff:ffff::".into(),
            mtu: DEVICE_MTU,
        },
        server_address: "fd35:d15d:9fc::1".into(),
        server_rsd_port: RSD_PORT,
    };
    handshake::write_message(&mut t, &response).unwrap();

    let mut decoder = MuxDecoder::new();
    let mut streams: HashMap<u32, Service> = HashMap::new();
    let mut buf = [0u8; 16 * 1024];
    loop {
        let Ok(n) = t.read(&mut buf) else {
            return log;
        };
        for frame in decoder.feed(&buf[..n]).unwrap() {
            let mut replies = Vec::new();
            match frame.kind {
                FrameKind::Open => {
                    let port = frame.port().unwrap();
                    log.opened_ports.push(port);
                    match Service::for_port(port) {
                        Some(service) if !opts.refused_ports.contains(&port) => {
                            streams.insert(frame.stream, service);
                            replies.push(MuxFrame::accept(frame.stream));
                        }
                        _ => replies.push(MuxFrame::refuse(frame.stream, "connection refused")),
                    }
                }
                FrameKind::Data => {
                    if let Some(service) = streams.get_mut(&frame.stream) {
                        let out = service.on_data(&frame.payload, opts, &mut log);
                        for chunk in out.chunks(DEVICE_MTU as usize) {
                            replies.push(MuxFrame::data(frame.stream, chunk));
                        }
                    }
                }
                FrameKind::Close => {
                    if streams.remove(&frame.stream).is_some() {
                        log.closed_streams += 1;
                    }
                }
                FrameKind::Shutdown => {
                    log.shutdown = true;
                    return log;
                }
                FrameKind::Accept | FrameKind::Refuse => {
                    panic!("host sent device-side frame {:?}", frame);
                }
            }
            for reply in replies {
                if t.write_all(&reply.encode()).is_err() {
                    return log;
                }
            }
        }
    }
}

fn prove_pairing(t: &mut TcpTransport, opts: &DeviceOptions) -> bool {
    let device_cred = PairingCredential::new("HOST-1", "BUID-1", &opts.secret).unwrap();
    let hello: PairingMessage = codec::read_json(t).unwrap();
    assert!(matches!(hello, PairingMessage::StartSession { .. }));

    let nonce = [0x17u8; 32];
    codec::write_json(
        t,
        &PairingMessage::Challenge {
            nonce: BASE64.encode(nonce),
        },
    )
    .unwrap();

    let PairingMessage::ProveIdentity { proof } = codec::read_json(t).unwrap() else {
        panic!("expected a proof");
    };
    let ok = device_cred.verify(&nonce, &BASE64.decode(proof).unwrap());
    codec::write_json(
        t,
        &PairingMessage::Result {
            error: (!ok).then(|| "InvalidHostID".to_string()),
        },
    )
    .unwrap();
    ok
}
