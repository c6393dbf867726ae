//! Launch-and-debug pipeline.
//!
//! ```text
//!  provider.connect() ─▶ CoreDeviceProxy ─▶ adapter ─▶ ServiceCatalog (RSD)
//!                                              │ into_inner, disconnect
//!                                              ▼
//!                         RemoteServerClient ─▶ ProcessControlClient::launch_app
//!                                              │ into_inner, disconnect
//!                                              ▼
//!                         DebugProxyClient ─▶ attach ─▶ detach × N
//! ```
//!
//! One adapter travels through all three protocol layers; each hop
//! releases the previous port and binds the next.  The first failure
//! aborts the pipeline.

use log::info;

use crate::config::ClientConfig;
use crate::debug::DebugProxyClient;
use crate::error::{Error, Result};
use crate::rpc::RemoteServerClient;
use crate::rpc::process_control::ProcessControlClient;
use crate::rsd::{DEBUGPROXY_SERVICE, SERVICE_HUB_SERVICE, ServiceCatalog, ServiceDescriptor};
use crate::transport::TransportProvider;
use crate::tunnel::{Adapter, CoreDeviceProxy};

/// What one run observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchReport {
    pub rsd_port: u16,
    pub pid: u64,
    pub attach_response: Option<String>,
    /// One entry per detach sent, in order.
    pub detach_responses: Vec<Option<String>>,
}

fn require(catalog: &ServiceCatalog, name: &str) -> Result<ServiceDescriptor> {
    catalog
        .lookup(name)?
        .ok_or_else(|| Error::protocol(format!("device does not advertise {name}")))
}

/// Release the adapter's current port and bind it to `port`.
fn rebind(mut adapter: Adapter, port: u16) -> Result<Adapter> {
    adapter.disconnect()?;
    adapter.connect(port)?;
    Ok(adapter)
}

/// Launch `bundle_id` suspended, attach the debugger to it, then detach.
pub fn launch_and_debug<P: TransportProvider>(
    provider: &P,
    bundle_id: &str,
    config: &ClientConfig,
) -> Result<LaunchReport> {
    config.validate()?;
    if bundle_id.is_empty() {
        return Err(Error::Input("bundle identifier must not be empty".into()));
    }

    info!("workflow: connecting via {}", provider.label());
    let transport = provider.connect()?;
    let proxy = CoreDeviceProxy::connect_with_mtu(transport, config.tunnel_mtu)?;
    let rsd_port = proxy.server_rsd_port();

    // Service discovery.
    let mut adapter = proxy.create_tcp_adapter()?;
    adapter.connect(rsd_port)?;
    let catalog = ServiceCatalog::open(adapter)?;
    let debug_service = require(&catalog, DEBUGPROXY_SERVICE)?;
    let hub_service = require(&catalog, SERVICE_HUB_SERVICE)?;

    // Launch.
    let adapter = rebind(catalog.into_inner()?, hub_service.port)?;
    let mut rpc = RemoteServerClient::with_compress_threshold(adapter, config.rpc_compress_threshold);
    let arguments: Vec<&str> = config.arguments.iter().map(String::as_str).collect();
    let pid = ProcessControlClient::new(&mut rpc)?.launch_app(
        bundle_id,
        &arguments,
        &config.environment,
        config.start_suspended,
        config.kill_existing,
    )?;

    // Attach and detach.
    let adapter = rebind(rpc.into_inner()?, debug_service.port)?;
    let mut session = DebugProxyClient::new(adapter);
    if config.disable_acks {
        session.set_ack_mode(false)?;
    }
    let attach_response = session.attach(pid)?;
    let mut detach_responses = Vec::with_capacity(usize::from(config.detach_attempts));
    for _ in 0..config.detach_attempts {
        detach_responses.push(session.detach()?);
    }

    session.into_inner()?.close()?;
    proxy.close();
    info!("workflow: {} (pid {}) attached and detached", bundle_id, pid);

    Ok(LaunchReport {
        rsd_port,
        pid,
        attach_response,
        detach_responses,
    })
}
