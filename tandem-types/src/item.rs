//! Raw items exchanged with service providers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Kind of synchronizable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    Track,
    Playlist,
    Event,
}

impl ItemType {
    pub const ALL: [ItemType; 3] = [ItemType::Track, ItemType::Playlist, ItemType::Event];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Track => "track",
            Self::Playlist => "playlist",
            Self::Event => "event",
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "track" | "tracks" | "song" => Ok(Self::Track),
            "playlist" | "playlists" => Ok(Self::Playlist),
            "event" | "events" => Ok(Self::Event),
            other => Err(Error::UnknownVariant {
                kind: "item type",
                value: other.to_string(),
            }),
        }
    }
}

/// What happened to an item upstream since the last sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemAction {
    #[default]
    Create,
    Update,
    Delete,
}

impl fmt::Display for ItemAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A changed record pulled from a provider, still in the provider's own shape.
///
/// `item_type` stays a string because providers may report kinds the engine
/// does not know; those are rejected during normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncItem {
    pub external_id: String,
    pub item_type: String,
    #[serde(default)]
    pub action: ItemAction,
    pub data: serde_json::Value,
}

impl SyncItem {
    pub fn new(
        external_id: impl Into<String>,
        item_type: impl Into<String>,
        action: ItemAction,
        data: serde_json::Value,
    ) -> Self {
        Self {
            external_id: external_id.into(),
            item_type: item_type.into(),
            action,
            data,
        }
    }
}
