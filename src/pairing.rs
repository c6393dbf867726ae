//! Pairing credential: the host's proof of a prior trust relationship.
//!
//! The credential is a JSON document produced when the host was paired with
//! the device:
//!
//! ```json
//! {
//!   "HostID": "5B9E1C1A-...",
//!   "SystemBUID": "30E1F2D8-...",
//!   "PairingSecret": "<base64, >= 16 bytes>",
//!   "DeviceID": "00008110-..."
//! }
//! ```
//!
//! The secret never leaves this type; the transport asks it to answer a
//! device challenge with `HMAC-SHA256(secret, nonce)`.

use core::fmt;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Shortest secret accepted.
const MIN_SECRET_LEN: usize = 16;

/// On-disk representation.
#[derive(Serialize, Deserialize)]
struct PairingRecord {
    #[serde(rename = "HostID")]
    host_id: String,
    #[serde(rename = "SystemBUID")]
    system_buid: String,
    #[serde(rename = "PairingSecret")]
    pairing_secret: String,
    #[serde(rename = "DeviceID", default, skip_serializing_if = "Option::is_none")]
    device_id: Option<String>,
}

/// Loaded, validated pairing credential.  Read-only once constructed.
#[derive(Clone)]
pub struct PairingCredential {
    host_id: String,
    system_buid: String,
    secret: Vec<u8>,
    device_id: Option<String>,
}

impl PairingCredential {
    /// Build a credential from its parts.
    pub fn new(
        host_id: impl Into<String>,
        system_buid: impl Into<String>,
        secret: &[u8],
    ) -> Result<Self> {
        let cred = Self {
            host_id: host_id.into(),
            system_buid: system_buid.into(),
            secret: secret.to_vec(),
            device_id: None,
        };
        cred.validate()?;
        Ok(cred)
    }

    /// Parse a credential from the bytes of a pairing file.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let record: PairingRecord = serde_json::from_slice(data)
            .map_err(|e| Error::Input(format!("pairing file is not valid JSON: {e}")))?;
        let secret = BASE64
            .decode(record.pairing_secret.trim())
            .map_err(|e| Error::Input(format!("PairingSecret is not valid base64: {e}")))?;

        let cred = Self {
            host_id: record.host_id,
            system_buid: record.system_buid,
            secret,
            device_id: record.device_id,
        };
        cred.validate()?;
        Ok(cred)
    }

    /// Read and parse a pairing file from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            Error::Input(format!("cannot read pairing file {}: {e}", path.display()))
        })?;
        Self::from_bytes(&data)
    }

    /// Serialise back into the pairing file format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let record = PairingRecord {
            host_id: self.host_id.clone(),
            system_buid: self.system_buid.clone(),
            pairing_secret: BASE64.encode(&self.secret),
            device_id: self.device_id.clone(),
        };
        // A record of plain strings always serialises.
        serde_json::to_vec_pretty(&record).unwrap_or_default()
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn system_buid(&self) -> &str {
        &self.system_buid
    }

    pub fn device_id(&self) -> Option<&str> {
        self.device_id.as_deref()
    }

    /// Answer a device challenge: `HMAC-SHA256(secret, nonce)`.
    pub fn prove(&self, nonce: &[u8]) -> [u8; 32] {
        hmac_sha256::HMAC::mac(nonce, &self.secret)
    }

    /// Constant-time check of a proof against this credential (device side
    /// of the exchange; used by simulators and tests).
    pub fn verify(&self, nonce: &[u8], proof: &[u8]) -> bool {
        let Ok(tag) = <&[u8; 32]>::try_from(proof) else {
            return false;
        };
        hmac_sha256::HMAC::verify(nonce, &self.secret, tag)
    }

    fn validate(&self) -> Result<()> {
        if self.host_id.trim().is_empty() {
            return Err(Error::Input("pairing credential has an empty HostID".into()));
        }
        if self.system_buid.trim().is_empty() {
            return Err(Error::Input(
                "pairing credential has an empty SystemBUID".into(),
            ));
        }
        if self.secret.len() < MIN_SECRET_LEN {
            return Err(Error::Input(format!(
                "PairingSecret is {} bytes, need at least {MIN_SECRET_LEN}",
                self.secret.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for PairingCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PairingCredential")
            .field("host_id", &self.host_id)
            .field("system_buid", &self.system_buid)
            .field("secret", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────
