//! The relay transport envelope.
//!
//! The relay wraps every message in a thin routing envelope; the hub needs
//! nothing from the wire format beyond this shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tether_id::DeviceId;

/// The sending device, attached by the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    pub device_id: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Delivery target: one device or a list of devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Targets {
    One(DeviceId),
    Many(Vec<DeviceId>),
}

impl Targets {
    /// Iterate the targeted devices.
    pub fn iter(&self) -> impl Iterator<Item = DeviceId> + '_ {
        let slice: &[DeviceId] = match self {
            Targets::One(id) => std::slice::from_ref(id),
            Targets::Many(ids) => ids,
        };
        slice.iter().copied()
    }
}

/// Broadcast scope understood by the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Broadcast {
    /// Every connected client device.
    Clients,
}

/// Inbound transport envelope: `{type, payload?, from?, to?, broadcast?}`.
///
/// The `type` stays a plain string here so unrecognized types survive
/// parsing; dispatch drops unknowns silently instead of failing the
/// connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Peer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Targets>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broadcast: Option<Broadcast>,
}
