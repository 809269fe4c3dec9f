//! Packed hierarchical identifiers for Tether routing.
//!
//! Every routable entity — environment, device, workspace, conversation — is
//! addressed by one packed integer. The layout is hierarchical: each level
//! embeds the full identifier of the level above it.
//!
//! ```text
//! DeviceId        (7 bits):  env(2) | kind(1) | index(4)
//! WorkspaceId    (14 bits):  DeviceId(7) | workspace_index(7)
//! ConversationId (24 bits):  WorkspaceId(14) | conversation_index(10)
//! ```
//!
//! Host device indices are 1-based (1..=15); peer device indices are 0-based
//! (0..=15). The asymmetry is intentional and load-bearing: the legacy 21-bit
//! scheme (no env field, 4-bit host id 1..=10) decodes identically to the
//! `env = 0` case of the current scheme because the extra bits are leading
//! zeros.
//!
//! Encoding is the one place in the system allowed to fail loudly: every
//! field is range-checked before any bits are written, and out-of-range input
//! is an error, never a clamp or a wrap.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest valid environment id (2 bits, but only 0..=2 are assigned).
pub const ENV_MAX: u8 = 2;
/// Highest valid device index (4 bits).
pub const DEVICE_INDEX_MAX: u8 = 15;
/// Highest host device index under the legacy scheme.
pub const LEGACY_DEVICE_MAX: u8 = 10;
/// Highest valid workspace index (7 bits, 1-based).
pub const WORKSPACE_INDEX_MAX: u8 = 127;
/// Highest valid conversation index (10 bits, 1-based).
pub const CONVERSATION_INDEX_MAX: u16 = 1023;

const DEVICE_BITS: u32 = 7;
const WORKSPACE_BITS: u32 = 7;
const CONVERSATION_BITS: u32 = 10;

/// Result type for identifier construction.
pub type IdResult<T> = Result<T, IdError>;

/// Errors raised when an identifier field is outside its documented range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// A field does not fit its bit width or documented minimum.
    #[error("{field} out of range: {value} (expected {min}..={max})")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    /// A raw packed value does not decode to a valid identifier.
    #[error("invalid packed {level} id: {value}")]
    InvalidPacked { level: &'static str, value: u32 },
}

fn check(field: &'static str, value: u32, min: u32, max: u32) -> IdResult<()> {
    if value < min || value > max {
        return Err(IdError::FieldOutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Whether a device is the host machine or a peer/client device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// The machine running agent sessions. Indices are 1-based.
    Host,
    /// A client device connected through the relay. Indices are 0-based.
    Peer,
}

/// Packed device identifier: `env(2) | kind(1) | index(4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DeviceId(u8);

impl DeviceId {
    /// Pack a device identifier, validating every field.
    pub fn new(env: u8, kind: DeviceKind, index: u8) -> IdResult<Self> {
        check("env", env as u32, 0, ENV_MAX as u32)?;
        match kind {
            DeviceKind::Host => check("device index", index as u32, 1, DEVICE_INDEX_MAX as u32)?,
            DeviceKind::Peer => check("device index", index as u32, 0, DEVICE_INDEX_MAX as u32)?,
        }
        let kind_bit = match kind {
            DeviceKind::Host => 0,
            DeviceKind::Peer => 1,
        };
        Ok(Self((env << 5) | (kind_bit << 4) | index))
    }

    /// Pack a host device under the legacy 21-bit scheme: no env field,
    /// 4-bit id in 1..=10. Numerically identical to `new(0, Host, index)`.
    pub fn legacy(index: u8) -> IdResult<Self> {
        check("legacy device id", index as u32, 1, LEGACY_DEVICE_MAX as u32)?;
        Self::new(0, DeviceKind::Host, index)
    }

    /// Environment id (0..=2).
    pub fn env(self) -> u8 {
        self.0 >> 5
    }

    /// Host or peer.
    pub fn kind(self) -> DeviceKind {
        if self.0 & 0b1_0000 == 0 {
            DeviceKind::Host
        } else {
            DeviceKind::Peer
        }
    }

    /// Device index within its kind.
    pub fn index(self) -> u8 {
        self.0 & 0b1111
    }

    /// The raw 7-bit packed value.
    pub fn raw(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for DeviceId {
    type Error = IdError;

    fn try_from(value: u8) -> IdResult<Self> {
        if value >> DEVICE_BITS != 0 {
            return Err(IdError::InvalidPacked {
                level: "device",
                value: value as u32,
            });
        }
        let id = Self(value);
        // Host index 0 never exists; reject rather than alias peer 0.
        if id.kind() == DeviceKind::Host && id.index() == 0 {
            return Err(IdError::InvalidPacked {
                level: "device",
                value: value as u32,
            });
        }
        Ok(id)
    }
}

impl From<DeviceId> for u8 {
    fn from(id: DeviceId) -> u8 {
        id.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind_bit = match self.kind() {
            DeviceKind::Host => 0,
            DeviceKind::Peer => 1,
        };
        write!(f, "{}:{}:{}", self.env(), kind_bit, self.index())
    }
}

/// Packed workspace identifier: `DeviceId(7) | workspace_index(7)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct WorkspaceId(u16);

impl WorkspaceId {
    /// Pack a workspace identifier under a device.
    pub fn new(device: DeviceId, workspace_index: u8) -> IdResult<Self> {
        check(
            "workspace index",
            workspace_index as u32,
            1,
            WORKSPACE_INDEX_MAX as u32,
        )?;
        Ok(Self(((device.raw() as u16) << WORKSPACE_BITS) | workspace_index as u16))
    }

    /// The owning device.
    pub fn device(self) -> DeviceId {
        DeviceId((self.0 >> WORKSPACE_BITS) as u8)
    }

    /// Workspace index within the device (1..=127).
    pub fn workspace_index(self) -> u8 {
        (self.0 & 0x7F) as u8
    }

    /// Pack a conversation under this workspace.
    pub fn conversation(self, conversation_index: u16) -> IdResult<ConversationId> {
        ConversationId::new(self, conversation_index)
    }

    /// The 24-bit "workspace-only" shape: conversation index zero.
    pub fn workspace_only(self) -> u32 {
        (self.0 as u32) << CONVERSATION_BITS
    }

    /// The raw 14-bit packed value.
    pub fn raw(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for WorkspaceId {
    type Error = IdError;

    fn try_from(value: u16) -> IdResult<Self> {
        let device = (value >> WORKSPACE_BITS) as u8;
        let index = (value & 0x7F) as u8;
        if value >> (DEVICE_BITS + WORKSPACE_BITS) != 0 || index == 0 {
            return Err(IdError::InvalidPacked {
                level: "workspace",
                value: value as u32,
            });
        }
        DeviceId::try_from(device).map_err(|_| IdError::InvalidPacked {
            level: "workspace",
            value: value as u32,
        })?;
        Ok(Self(value))
    }
}

impl From<WorkspaceId> for u16 {
    fn from(id: WorkspaceId) -> u16 {
        id.0
    }
}

impl std::fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.device(), self.workspace_index())
    }
}

/// Packed conversation identifier: `WorkspaceId(14) | conversation_index(10)`.
///
/// This is the canonical handle used everywhere else in the system: history
/// caches, viewer sets, debounce keys and driver events are all keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ConversationId(u32);

impl ConversationId {
    /// Pack a conversation identifier under a workspace.
    pub fn new(workspace: WorkspaceId, conversation_index: u16) -> IdResult<Self> {
        check(
            "conversation index",
            conversation_index as u32,
            1,
            CONVERSATION_INDEX_MAX as u32,
        )?;
        Ok(Self(
            ((workspace.raw() as u32) << CONVERSATION_BITS) | conversation_index as u32,
        ))
    }

    /// Pack under the legacy 21-bit scheme (no env field, host id 1..=10).
    ///
    /// Compatibility invariant: equals the current scheme with `env = 0`.
    pub fn legacy(device_index: u8, workspace_index: u8, conversation_index: u16) -> IdResult<Self> {
        let device = DeviceId::legacy(device_index)?;
        let workspace = WorkspaceId::new(device, workspace_index)?;
        Self::new(workspace, conversation_index)
    }

    /// The owning workspace.
    pub fn workspace(self) -> WorkspaceId {
        WorkspaceId((self.0 >> CONVERSATION_BITS) as u16)
    }

    /// The owning device.
    pub fn device(self) -> DeviceId {
        self.workspace().device()
    }

    /// Conversation index within the workspace (1..=1023).
    pub fn conversation_index(self) -> u16 {
        (self.0 & 0x3FF) as u16
    }

    /// The raw 24-bit packed value.
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for ConversationId {
    type Error = IdError;

    fn try_from(value: u32) -> IdResult<Self> {
        let index = value & 0x3FF;
        if value >> (DEVICE_BITS + WORKSPACE_BITS + CONVERSATION_BITS) != 0 || index == 0 {
            return Err(IdError::InvalidPacked {
                level: "conversation",
                value,
            });
        }
        WorkspaceId::try_from((value >> CONVERSATION_BITS) as u16).map_err(|_| {
            IdError::InvalidPacked {
                level: "conversation",
                value,
            }
        })?;
        Ok(Self(value))
    }
}

impl From<ConversationId> for u32 {
    fn from(id: ConversationId) -> u32 {
        id.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.workspace(), self.conversation_index())
    }
}

/// Which level of the hierarchy a raw packed value addresses.
///
/// Classification is by numeric range, which is unambiguous because every
/// field has a documented minimum: devices fit in 7 bits; workspaces carry a
/// workspace index >= 1 below the device bits, so the smallest valid
/// workspace value (host device 1, workspace 1) is 129; conversations shift
/// a workspace left ten bits, so the smallest exceeds 14 bits. A value above
/// 14 bits whose low ten bits are zero is the workspace-only shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdLevel {
    Device,
    Workspace,
    Conversation,
}

impl IdLevel {
    /// Classify a raw packed value.
    pub fn of(raw: u32) -> IdLevel {
        if raw <= 0x7F {
            IdLevel::Device
        } else if raw <= 0x3FFF || raw & 0x3FF == 0 {
            IdLevel::Workspace
        } else {
            IdLevel::Conversation
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(env: u8, index: u8) -> DeviceId {
        DeviceId::new(env, DeviceKind::Host, index).unwrap()
    }

    #[test]
    fn test_round_trip_all_levels() {
        for env in 0..=ENV_MAX {
            for (kind, lo) in [(DeviceKind::Host, 1), (DeviceKind::Peer, 0)] {
                for index in lo..=DEVICE_INDEX_MAX {
                    let device = DeviceId::new(env, kind, index).unwrap();
                    assert_eq!(device.env(), env);
                    assert_eq!(device.kind(), kind);
                    assert_eq!(device.index(), index);

                    let workspace = WorkspaceId::new(device, 127).unwrap();
                    assert_eq!(workspace.device(), device);
                    assert_eq!(workspace.workspace_index(), 127);

                    let conversation = workspace.conversation(1023).unwrap();
                    assert_eq!(conversation.workspace(), workspace);
                    assert_eq!(conversation.conversation_index(), 1023);
                }
            }
        }
    }

    #[test]
    fn test_round_trip_sampled_indices() {
        let device = DeviceId::new(1, DeviceKind::Peer, 7).unwrap();
        for ws in [1u8, 2, 64, 126, 127] {
            for conv in [1u16, 2, 511, 1022, 1023] {
                let id = WorkspaceId::new(device, ws).unwrap().conversation(conv).unwrap();
                assert_eq!(id.device(), device);
                assert_eq!(id.workspace().workspace_index(), ws);
                assert_eq!(id.conversation_index(), conv);
                assert_eq!(ConversationId::try_from(id.raw()).unwrap(), id);
            }
        }
    }

    #[test]
    fn test_legacy_matches_env_zero() {
        for p in 1..=LEGACY_DEVICE_MAX {
            for w in [1u8, 63, 127] {
                for c in [1u16, 512, 1023] {
                    let legacy = ConversationId::legacy(p, w, c).unwrap();
                    let device = host(0, p);
                    let current = WorkspaceId::new(device, w).unwrap().conversation(c).unwrap();
                    assert_eq!(legacy, current);
                    // Legacy values fit the documented 21-bit width.
                    assert!(legacy.raw() >> 21 == 0);
                }
            }
        }
    }

    #[test]
    fn test_monotonic_env_ordering() {
        let make = |env| {
            WorkspaceId::new(host(env, 3), 5)
                .unwrap()
                .conversation(9)
                .unwrap()
        };
        assert!(make(2) > make(1));
        assert!(make(1) > make(0));
    }

    #[test]
    fn test_width_exhaustion_rejected() {
        assert!(DeviceId::new(3, DeviceKind::Host, 1).is_err());
        assert!(DeviceId::new(0, DeviceKind::Host, 16).is_err());
        assert!(DeviceId::new(0, DeviceKind::Peer, 16).is_err());
        assert!(DeviceId::legacy(11).is_err());
        assert!(DeviceId::legacy(0).is_err());

        let device = host(0, 1);
        assert!(WorkspaceId::new(device, 0).is_err());
        assert!(WorkspaceId::new(device, 128).is_err());

        let workspace = WorkspaceId::new(device, 1).unwrap();
        assert!(workspace.conversation(0).is_err());
        assert!(workspace.conversation(1024).is_err());
    }

    #[test]
    fn test_host_index_is_one_based_peer_zero_based() {
        assert!(DeviceId::new(0, DeviceKind::Host, 0).is_err());
        assert!(DeviceId::new(0, DeviceKind::Peer, 0).is_ok());
    }

    #[test]
    fn test_no_collisions_within_device() {
        // Distinct valid tuples never collide: spot-check one device's full
        // workspace/conversation plane.
        let device = host(0, 1);
        let mut seen = std::collections::HashSet::new();
        for ws in 1..=WORKSPACE_INDEX_MAX {
            for conv in (1..=CONVERSATION_INDEX_MAX).step_by(73) {
                let id = WorkspaceId::new(device, ws).unwrap().conversation(conv).unwrap();
                assert!(seen.insert(id.raw()));
            }
        }
    }

    #[test]
    fn test_level_classification() {
        let device = host(0, 1);
        let workspace = WorkspaceId::new(device, 1).unwrap();
        let conversation = workspace.conversation(1).unwrap();

        assert_eq!(IdLevel::of(device.raw() as u32), IdLevel::Device);
        assert_eq!(IdLevel::of(workspace.raw() as u32), IdLevel::Workspace);
        assert_eq!(IdLevel::of(workspace.workspace_only()), IdLevel::Workspace);
        assert_eq!(IdLevel::of(conversation.raw()), IdLevel::Conversation);

        // Largest peer device still classifies as a device.
        let peer = DeviceId::new(2, DeviceKind::Peer, 15).unwrap();
        assert_eq!(IdLevel::of(peer.raw() as u32), IdLevel::Device);
    }

    #[test]
    fn test_display_colon_joined() {
        let device = DeviceId::new(1, DeviceKind::Peer, 4).unwrap();
        let workspace = WorkspaceId::new(device, 12).unwrap();
        let conversation = workspace.conversation(345).unwrap();

        assert_eq!(device.to_string(), "1:1:4");
        assert_eq!(workspace.to_string(), "1:1:4:12");
        assert_eq!(conversation.to_string(), "1:1:4:12:345");
    }

    #[test]
    fn test_try_from_rejects_garbage() {
        assert!(DeviceId::try_from(0x80).is_err());
        // Host kind with index zero cannot exist.
        assert!(DeviceId::try_from(0b00_0_0000).is_err());
        // Workspace index zero.
        assert!(WorkspaceId::try_from(1 << 7).is_err());
        // Conversation index zero.
        assert!(ConversationId::try_from(129 << 10).is_err());
        // Above 24 bits.
        assert!(ConversationId::try_from(1 << 24 | 1).is_err());
    }

    #[test]
    fn test_serde_as_plain_integer() {
        let id = ConversationId::legacy(1, 1, 1).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, id.raw().to_string());
        let back: ConversationId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
