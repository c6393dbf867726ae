//! Service catalog (RSD) client.
//!
//! Opened over an adapter bound to the tunnel's RSD port.  One handshake
//! exchange enumerates every developer service the device exposes:
//!
//! ```text
//!  host ── {"MessageType":"Handshake","MessagingProtocolVersion":3} ──▶ device
//!  host ◀── {"MessageType":"Handshake","Services":{name:{"Port":"N",..}},..} ──
//! ```
//!
//! Both messages use the length-prefixed JSON framing of [`crate::codec`].
//! After the handshake the catalog only answers local lookups; the
//! adapter can be extracted and rebound to one of the advertised ports.

use std::collections::BTreeMap;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::codec;
use crate::error::{Error, Result};
use crate::transport::Transport;
use crate::tunnel::Adapter;

pub const MESSAGE_TYPE_HANDSHAKE: &str = "Handshake";
pub const MESSAGING_PROTOCOL_VERSION: u32 = 3;

/// Debugserver proxy service.
pub const DEBUGPROXY_SERVICE: &str = "com.apple.internal.dt.remote.debugproxy";
/// Instruments service hub (process control lives behind it).
pub const SERVICE_HUB_SERVICE: &str = "com.apple.instruments.dtservicehub";

// ───────────────────────────────────────────────────────────────
// Wire messages
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogRequest {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "MessagingProtocolVersion")]
    pub protocol_version: u32,
}

impl Default for CatalogRequest {
    fn default() -> Self {
        Self {
            message_type: MESSAGE_TYPE_HANDSHAKE.to_string(),
            protocol_version: MESSAGING_PROTOCOL_VERSION,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceProperties {
    #[serde(rename = "UsesRemoteXPC", default)]
    pub uses_remote_xpc: bool,
    #[serde(rename = "Features", default, skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    #[serde(rename = "ServiceVersion", default, skip_serializing_if = "Option::is_none")]
    pub service_version: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    /// Decimal port number, carried as text on the wire.
    #[serde(rename = "Port")]
    pub port: String,
    #[serde(rename = "Entitlement", default, skip_serializing_if = "Option::is_none")]
    pub entitlement: Option<String>,
    #[serde(rename = "Properties", default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<ServiceProperties>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogReply {
    #[serde(rename = "MessageType")]
    pub message_type: String,
    #[serde(rename = "Services")]
    pub services: BTreeMap<String, ServiceEntry>,
    #[serde(rename = "UUID", default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(rename = "Properties", default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Map<String, Value>>,
}

// ───────────────────────────────────────────────────────────────
// ServiceDescriptor
// ───────────────────────────────────────────────────────────────

/// One advertised service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: String,
    pub port: u16,
    pub entitlement: Option<String>,
    pub uses_remote_xpc: bool,
    pub features: Vec<String>,
    pub service_version: Option<i64>,
}

impl ServiceDescriptor {
    fn from_entry(name: &str, entry: ServiceEntry) -> Result<Self> {
        let port: u16 = entry.port.trim().parse().map_err(|_| {
            Error::protocol(format!("service {name:?} has non-numeric port {:?}", entry.port))
        })?;
        if port == 0 {
            return Err(Error::protocol(format!("service {name:?} advertises port 0")));
        }
        let props = entry.properties.unwrap_or_default();
        Ok(Self {
            name: name.to_string(),
            port,
            entitlement: entry.entitlement,
            uses_remote_xpc: props.uses_remote_xpc,
            features: props.features,
            service_version: props.service_version,
        })
    }
}

// ───────────────────────────────────────────────────────────────
// ServiceCatalog
// ───────────────────────────────────────────────────────────────

pub struct ServiceCatalog<T: Transport = Adapter> {
    adapter: Option<T>,
    services: BTreeMap<String, ServiceDescriptor>,
    uuid: Option<String>,
    properties: Map<String, Value>,
}

impl<T: Transport> ServiceCatalog<T> {
    /// Run the catalog handshake over an adapter bound to the RSD port.
    pub fn open(mut adapter: T) -> Result<Self> {
        codec::write_json(&mut adapter, &CatalogRequest::default())?;
        let reply: CatalogReply = codec::read_json(&mut adapter)?;
        if reply.message_type != MESSAGE_TYPE_HANDSHAKE {
            return Err(Error::protocol(format!(
                "catalog replied with MessageType {:?}",
                reply.message_type
            )));
        }

        let mut services = BTreeMap::new();
        for (name, entry) in reply.services {
            let descriptor = ServiceDescriptor::from_entry(&name, entry)?;
            debug!("rsd: {} -> port {}", name, descriptor.port);
            services.insert(name, descriptor);
        }
        info!(
            "rsd: {} services advertised by device {}",
            services.len(),
            reply.uuid.as_deref().unwrap_or("<unknown>")
        );

        Ok(Self {
            adapter: Some(adapter),
            services,
            uuid: reply.uuid,
            properties: reply.properties.unwrap_or_default(),
        })
    }

    fn ensure_owned(&self) -> Result<()> {
        match self.adapter {
            Some(_) => Ok(()),
            None => Err(Error::UseAfterExtract),
        }
    }

    /// Exact, case-sensitive lookup.  An unknown name is `Ok(None)`.
    pub fn lookup(&self, name: &str) -> Result<Option<ServiceDescriptor>> {
        self.ensure_owned()?;
        Ok(self.services.get(name).cloned())
    }

    /// Every advertised service, ordered by name.
    pub fn services(&self) -> Result<Vec<ServiceDescriptor>> {
        self.ensure_owned()?;
        Ok(self.services.values().cloned().collect())
    }

    /// Device UUID from the catalog reply.  Like every catalog query it
    /// fails once the adapter has been extracted.
    pub fn device_uuid(&self) -> Result<Option<&str>> {
        self.ensure_owned()?;
        Ok(self.uuid.as_deref())
    }

    pub fn device_properties(&self) -> Result<&Map<String, Value>> {
        self.ensure_owned()?;
        Ok(&self.properties)
    }

    /// Take the adapter out, leaving the catalog unusable.  The adapter
    /// is still bound to the RSD port.
    pub fn extract_adapter(&mut self) -> Result<T> {
        self.adapter.take().ok_or(Error::UseAfterExtract)
    }

    /// Consume the catalog and return its adapter.
    pub fn into_inner(mut self) -> Result<T> {
        self.extract_adapter()
    }
}
