use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tandem_types::{ItemAction, ItemType};

/// Capabilities every normalized item exposes to the executor.
pub trait ItemCapabilities {
    fn item_type(&self) -> ItemType;

    /// Identifier of the item on the service it came from.
    fn identifier(&self) -> &str;

    fn action(&self) -> ItemAction;
}

/// A music track as seen by any service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalTrack {
    pub external_id: String,
    pub service: String,
    pub title: String,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub duration_ms: Option<u64>,
    pub isrc: Option<String>,
    pub action: ItemAction,
}

/// A playlist as seen by any service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalPlaylist {
    pub external_id: String,
    pub service: String,
    pub name: String,
    pub description: Option<String>,
    pub track_count: Option<u32>,
    pub owner: Option<String>,
    pub action: ItemAction,
}

/// A calendar event as seen by any service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniversalEvent {
    pub external_id: String,
    pub service: String,
    pub title: String,
    pub organizer: Option<String>,
    pub location: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub action: ItemAction,
}

/// The normalized cross-service representation of a synchronizable record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "item_type", rename_all = "snake_case")]
pub enum UniversalItem {
    Track(UniversalTrack),
    Playlist(UniversalPlaylist),
    Event(UniversalEvent),
}

impl ItemCapabilities for UniversalItem {
    fn item_type(&self) -> ItemType {
        match self {
            Self::Track(_) => ItemType::Track,
            Self::Playlist(_) => ItemType::Playlist,
            Self::Event(_) => ItemType::Event,
        }
    }

    fn identifier(&self) -> &str {
        match self {
            Self::Track(t) => &t.external_id,
            Self::Playlist(p) => &p.external_id,
            Self::Event(e) => &e.external_id,
        }
    }

    fn action(&self) -> ItemAction {
        match self {
            Self::Track(t) => t.action,
            Self::Playlist(p) => p.action,
            Self::Event(e) => e.action,
        }
    }
}

impl UniversalItem {
    /// Name of the service this item was read from (or will be written to).
    pub fn service(&self) -> &str {
        match self {
            Self::Track(t) => &t.service,
            Self::Playlist(p) => &p.service,
            Self::Event(e) => &e.service,
        }
    }

    /// Human-readable label used in logs and item errors.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Track(t) => &t.title,
            Self::Playlist(p) => &p.name,
            Self::Event(e) => &e.title,
        }
    }

    /// Returns a copy carrying another service's identity.
    ///
    /// Content is unchanged; used when source content is written over an
    /// existing target item.
    #[must_use]
    pub fn with_identity(&self, external_id: &str, service: &str, action: ItemAction) -> Self {
        let mut item = self.clone();
        match &mut item {
            Self::Track(t) => {
                t.external_id = external_id.to_string();
                t.service = service.to_string();
                t.action = action;
            }
            Self::Playlist(p) => {
                p.external_id = external_id.to_string();
                p.service = service.to_string();
                p.action = action;
            }
            Self::Event(e) => {
                e.external_id = external_id.to_string();
                e.service = service.to_string();
                e.action = action;
            }
        }
        item
    }

    /// Content fields in the service-neutral JSON shape.
    ///
    /// Identifiers, service name and action are excluded. This is also the
    /// shape [`transform_to_universal`](crate::transform_to_universal) accepts
    /// for services without a dedicated parser.
    pub fn to_payload(&self) -> serde_json::Value {
        match self {
            Self::Track(t) => json!({
                "title": t.title,
                "artists": t.artists,
                "album": t.album,
                "duration_ms": t.duration_ms,
                "isrc": t.isrc,
            }),
            Self::Playlist(p) => json!({
                "name": p.name,
                "description": p.description,
                "track_count": p.track_count,
                "owner": p.owner,
            }),
            Self::Event(e) => json!({
                "title": e.title,
                "organizer": e.organizer,
                "location": e.location,
                "start": e.start.map(|t| t.to_rfc3339()),
                "end": e.end.map(|t| t.to_rfc3339()),
                "description": e.description,
            }),
        }
    }

    /// Hex SHA-256 over the item kind and its content payload.
    ///
    /// Two items with equal content hash equally regardless of which service
    /// they live on.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.item_type().as_str().as_bytes());
        hasher.update([0x1f]);
        // Key order is fixed by `to_payload`, so the encoding is stable.
        hasher.update(self.to_payload().to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}
