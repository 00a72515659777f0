//! Run and peer identifiers plus the profile data exchanged at run start

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted length for identifiers and display names on the wire.
pub const MAX_IDENTIFIER_LEN: usize = 128;

/// Identifies one shared run instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(transparent)]
pub struct RunId(String);

/// Identifies one participating device/runner.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
#[serde(transparent)]
pub struct PeerId(String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Non-empty and within [`MAX_IDENTIFIER_LEN`].
            pub fn is_valid(&self) -> bool {
                !self.0.is_empty() && self.0.len() <= MAX_IDENTIFIER_LEN
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(RunId);
string_id!(PeerId);

/// The local runner's identity as announced to the partner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct LocalProfile {
    pub peer_id: PeerId,
    pub display_name: String,
    pub avatar: Option<String>,
    pub max_heart_rate: Option<u16>,
}

impl LocalProfile {
    pub fn new(peer_id: impl Into<PeerId>, display_name: impl Into<String>) -> Self {
        Self { peer_id: peer_id.into(), display_name: display_name.into(), avatar: None, max_heart_rate: None }
    }
}

/// Identity fields for the remote runner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "tauri", derive(specta::Type))]
pub struct PartnerProfile {
    #[serde(rename = "id")]
    pub peer_id: PeerId,
    #[serde(rename = "n")]
    pub display_name: String,
    #[serde(rename = "av", default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(rename = "mhr", default, skip_serializing_if = "Option::is_none")]
    pub max_heart_rate: Option<u16>,
}

impl PartnerProfile {
    pub fn new(peer_id: impl Into<PeerId>, display_name: impl Into<String>) -> Self {
        Self { peer_id: peer_id.into(), display_name: display_name.into(), avatar: None, max_heart_rate: None }
    }

    pub fn with_max_heart_rate(mut self, bpm: u16) -> Self {
        self.max_heart_rate = Some(bpm);
        self
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.peer_id.is_valid()
            && self.display_name.len() <= MAX_IDENTIFIER_LEN
            && self.avatar.as_ref().is_none_or(|a| a.len() <= MAX_IDENTIFIER_LEN * 4)
    }
}

impl From<&LocalProfile> for PartnerProfile {
    /// How the local runner appears from the partner's side.
    fn from(local: &LocalProfile) -> Self {
        Self {
            peer_id: local.peer_id.clone(),
            display_name: local.display_name.clone(),
            avatar: local.avatar.clone(),
            max_heart_rate: local.max_heart_rate,
        }
    }
}
