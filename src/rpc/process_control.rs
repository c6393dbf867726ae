//! Process lifecycle control over the RPC channel.
//!
//! Launches an application by bundle identifier (optionally suspended at
//! its entry point so a debugger can attach before any user code runs),
//! kills processes and lifts the per-process memory limit.

use std::collections::BTreeMap;

use log::{info, warn};

use super::value::{FAULT_NOT_FOUND, RpcValue};
use super::{RemoteServerClient, Reply};
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::tunnel::Adapter;

pub const PROCESS_CONTROL_CHANNEL: &str = "com.apple.instruments.server.services.processcontrol";

pub const LAUNCH_SELECTOR: &str =
    "launchSuspendedProcessWithDevicePath:bundleIdentifier:environment:arguments:options:";
pub const KILL_SELECTOR: &str = "killPid:";
pub const DISABLE_MEMORY_LIMIT_SELECTOR: &str = "requestDisableMemoryLimitsForPid:";

/// Device path argument; the bundle identifier is what selects the app.
const DEVICE_PATH: &str = "/private/";

pub const OPTION_START_SUSPENDED: &str = "StartSuspendedKey";
pub const OPTION_KILL_EXISTING: &str = "KillExisting";

/// Borrowing view of a [`RemoteServerClient`] with the process-control
/// channel open.
pub struct ProcessControlClient<'a, T: Transport = Adapter> {
    client: &'a mut RemoteServerClient<T>,
    channel: i32,
}

impl<'a, T: Transport> ProcessControlClient<'a, T> {
    /// Request the process-control channel on `client`.
    pub fn new(client: &'a mut RemoteServerClient<T>) -> Result<Self> {
        let channel = client.make_channel(PROCESS_CONTROL_CHANNEL)?;
        Ok(Self { client, channel })
    }

    pub fn channel(&self) -> i32 {
        self.channel
    }

    /// Launch `bundle_id` and return its pid.
    pub fn launch_app(
        &mut self,
        bundle_id: &str,
        arguments: &[&str],
        environment: &BTreeMap<String, String>,
        start_suspended: bool,
        kill_existing: bool,
    ) -> Result<u64> {
        if bundle_id.is_empty() {
            return Err(Error::Input("bundle identifier must not be empty".into()));
        }

        let env = RpcValue::dict(environment.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        let args = RpcValue::Array(arguments.iter().map(|a| RpcValue::from(*a)).collect());
        let options = RpcValue::dict([
            (OPTION_START_SUSPENDED, start_suspended),
            (OPTION_KILL_EXISTING, kill_existing),
        ]);

        let reply = self.client.invoke(
            self.channel,
            LAUNCH_SELECTOR,
            vec![
                RpcValue::from(DEVICE_PATH),
                RpcValue::from(bundle_id),
                env,
                args,
                options,
            ],
        )?;

        match reply {
            Reply::Value(value) => match value.as_u64() {
                Some(pid) if pid != 0 => {
                    info!("process: launched {} as pid {}", bundle_id, pid);
                    Ok(pid)
                }
                _ => Err(Error::protocol(format!(
                    "launch of {bundle_id} answered with {value:?} instead of a pid"
                ))),
            },
            Reply::Fault(fault) if fault.code == FAULT_NOT_FOUND => {
                warn!("process: {} is not installed", bundle_id);
                Err(Error::BundleNotFound(bundle_id.to_string()))
            }
            Reply::Fault(fault) => {
                warn!("process: launch of {} refused: {}", bundle_id, fault);
                Err(Error::LaunchRefused(fault.description))
            }
        }
    }

    /// Terminate `pid`.  Fire-and-forget: the device sends no reply.
    pub fn kill_app(&mut self, pid: u64) -> Result<()> {
        info!("process: killing pid {}", pid);
        self.client
            .send_oneway(self.channel, KILL_SELECTOR, vec![RpcValue::U64(pid)])
    }

    /// Lift the memory limit of `pid`.  `Ok(false)` when the device
    /// declines.
    pub fn disable_memory_limit(&mut self, pid: u64) -> Result<bool> {
        let reply = self.client.invoke(
            self.channel,
            DISABLE_MEMORY_LIMIT_SELECTOR,
            vec![RpcValue::U64(pid)],
        )?;
        match reply {
            Reply::Value(value) => value.as_bool().ok_or_else(|| {
                Error::protocol(format!("memory limit request answered with {value:?}"))
            }),
            Reply::Fault(fault) => {
                warn!("process: memory limit for pid {} kept: {}", pid, fault);
                Ok(false)
            }
        }
    }
}
