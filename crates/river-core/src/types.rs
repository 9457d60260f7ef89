//! Core types for the River transport core
//!
//! This module defines the fundamental types used throughout the SDK transport,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::Sub;
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Constructor Tag
// ----------------------------------------------------------------------------

/// Wire-format type tag of an envelope payload
///
/// The generated message definitions are opaque to the transport core; only the
/// tag is inspected, for retry policy and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Constructor(pub i64);

impl Constructor {
    pub const MESSAGES_SEND: Self = Self(3000244183);
    pub const MESSAGES_SEND_MEDIA: Self = Self(25498545);
    pub const MESSAGES_READ_HISTORY: Self = Self(1300826534);
    pub const MESSAGES_GET_HISTORY: Self = Self(3396939832);
    pub const CONTACTS_IMPORT: Self = Self(3473528730);
    pub const CONTACTS_GET: Self = Self(1412732665);
    pub const AUTH_SEND_CODE: Self = Self(3984043365);
    pub const AUTH_REGISTER: Self = Self(2228369460);
    pub const AUTH_LOGIN: Self = Self(2587620888);
    pub const ERROR: Self = Self(2619118453);

    /// Create a constructor tag from its raw value
    pub const fn new(tag: i64) -> Self {
        Self(tag)
    }

    /// Get the raw tag value
    pub const fn value(&self) -> i64 {
        self.0
    }

    /// Human readable name for well-known tags
    pub fn name(&self) -> Option<&'static str> {
        let name = match *self {
            Self::MESSAGES_SEND => "MessagesSend",
            Self::MESSAGES_SEND_MEDIA => "MessagesSendMedia",
            Self::MESSAGES_READ_HISTORY => "MessagesReadHistory",
            Self::MESSAGES_GET_HISTORY => "MessagesGetHistory",
            Self::CONTACTS_IMPORT => "ContactsImport",
            Self::CONTACTS_GET => "ContactsGet",
            Self::AUTH_SEND_CODE => "AuthSendCode",
            Self::AUTH_REGISTER => "AuthRegister",
            Self::AUTH_LOGIN => "AuthLogin",
            Self::ERROR => "Error",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Display for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "Constructor({})", self.0),
        }
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond timestamp since Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Sub for Timestamp {
    type Output = u64;

    fn sub(self, other: Timestamp) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current wall-clock timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Get duration since another timestamp
    pub fn duration_since(&self, other: Self) -> core::time::Duration {
        core::time::Duration::from_millis(self.0.saturating_sub(other.0))
    }
}

// ----------------------------------------------------------------------------
// Network Quality
// ----------------------------------------------------------------------------

/// Connection quality reported by the network port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetworkQuality {
    Disconnected,
    Connecting,
    Weak,
    Slow,
    Fast,
}

impl NetworkQuality {
    /// Whether requests can be handed to the transport at this quality
    pub fn is_usable(&self) -> bool {
        !matches!(self, NetworkQuality::Disconnected | NetworkQuality::Connecting)
    }
}

impl fmt::Display for NetworkQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NetworkQuality::Disconnected => "disconnected",
            NetworkQuality::Connecting => "connecting",
            NetworkQuality::Weak => "weak",
            NetworkQuality::Slow => "slow",
            NetworkQuality::Fast => "fast",
        };
        f.write_str(label)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
