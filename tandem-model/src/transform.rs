//! Conversion of provider payloads into [`UniversalItem`]s.
//!
//! Field lookup is alias based rather than per-service: Spotify, Deezer and
//! Google Calendar name the same facts differently (`name` / `title` /
//! `summary`, `duration_ms` / `duration` in seconds, `artists[]` / `artist`),
//! and the first alias present wins. The neutral shape produced by
//! [`UniversalItem::to_payload`] is accepted as well.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use tandem_types::{ItemType, SyncItem};

use crate::error::{ModelError, ModelResult};
use crate::item::{UniversalEvent, UniversalItem, UniversalPlaylist, UniversalTrack};

/// Normalizes a raw item reported by `service`.
pub fn transform_to_universal(service: &str, item: &SyncItem) -> ModelResult<UniversalItem> {
    let item_type: ItemType =
        item.item_type
            .parse()
            .map_err(|_| ModelError::UnsupportedItemType {
                service: service.to_string(),
                item_type: item.item_type.clone(),
            })?;

    let ctx = Ctx { service, item };
    if item.external_id.trim().is_empty() {
        return Err(ctx.invalid("external_id is empty"));
    }
    if !item.data.is_object() {
        return Err(ctx.invalid("payload is not a JSON object"));
    }

    match item_type {
        ItemType::Track => ctx.track().map(UniversalItem::Track),
        ItemType::Playlist => ctx.playlist().map(UniversalItem::Playlist),
        ItemType::Event => ctx.event().map(UniversalItem::Event),
    }
}

struct Ctx<'a> {
    service: &'a str,
    item: &'a SyncItem,
}

impl Ctx<'_> {
    fn invalid(&self, reason: impl Into<String>) -> ModelError {
        ModelError::InvalidPayload {
            service: self.service.to_string(),
            external_id: self.item.external_id.clone(),
            reason: reason.into(),
        }
    }

    /// Payload root. Spotify wraps saved tracks as `{added_at, track: {..}}`.
    fn root(&self) -> &Value {
        match self.item.data.get("track") {
            Some(inner) if inner.is_object() => inner,
            _ => &self.item.data,
        }
    }

    fn track(&self) -> ModelResult<UniversalTrack> {
        let d = self.root();
        let title = text(d, &["title", "name"]).ok_or_else(|| self.invalid("missing track title"))?;

        let duration_ms = d
            .get("duration_ms")
            .and_then(Value::as_u64)
            .or_else(|| d.get("duration").and_then(Value::as_u64).map(|s| s * 1000));

        let isrc = text(d, &["isrc"]).or_else(|| {
            d.get("external_ids")
                .and_then(|ids| text(ids, &["isrc"]))
        });

        Ok(UniversalTrack {
            external_id: self.item.external_id.clone(),
            service: self.service.to_string(),
            title,
            artists: artists(d),
            album: d.get("album").and_then(|a| name_of(a, &["name", "title"])),
            duration_ms,
            isrc,
            action: self.item.action,
        })
    }

    fn playlist(&self) -> ModelResult<UniversalPlaylist> {
        let d = &self.item.data;
        let name = text(d, &["name", "title"]).ok_or_else(|| self.invalid("missing playlist name"))?;

        let track_count = d
            .get("track_count")
            .or_else(|| d.get("nb_tracks"))
            .or_else(|| d.pointer("/tracks/total"))
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok());

        let owner = d
            .get("owner")
            .or_else(|| d.get("creator"))
            .and_then(|o| name_of(o, &["display_name", "name", "id"]));

        Ok(UniversalPlaylist {
            external_id: self.item.external_id.clone(),
            service: self.service.to_string(),
            name,
            description: text(d, &["description"]),
            track_count,
            owner,
            action: self.item.action,
        })
    }

    fn event(&self) -> ModelResult<UniversalEvent> {
        let d = &self.item.data;
        let title = text(d, &["title", "summary"]).ok_or_else(|| self.invalid("missing event title"))?;

        let start = self.optional_time(d, "start")?;
        let end = self.optional_time(d, "end")?;

        Ok(UniversalEvent {
            external_id: self.item.external_id.clone(),
            service: self.service.to_string(),
            title,
            organizer: d
                .get("organizer")
                .and_then(|o| name_of(o, &["displayName", "email", "name"])),
            location: text(d, &["location"]),
            start,
            end,
            description: text(d, &["description"]),
            action: self.item.action,
        })
    }

    /// Absent or null is `None`; anything present must parse.
    fn optional_time(&self, d: &Value, key: &str) -> ModelResult<Option<DateTime<Utc>>> {
        match d.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => timestamp(v)
                .map(Some)
                .ok_or_else(|| self.invalid(format!("unreadable {key} time"))),
        }
    }
}

/// First non-empty string among `keys`.
fn text(value: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// A bare string, or the first non-empty `keys` field of an object.
fn name_of(value: &Value, keys: &[&str]) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Object(_) => text(value, keys),
        _ => None,
    }
}

fn artists(d: &Value) -> Vec<String> {
    if let Some(list) = d.get("artists").and_then(Value::as_array) {
        return list
            .iter()
            .filter_map(|a| name_of(a, &["name"]))
            .collect();
    }
    d.get("artist")
        .and_then(|a| name_of(a, &["name"]))
        .into_iter()
        .collect()
}

/// RFC 3339 string, or a Google-style `{dateTime}` / `{date}` object.
/// All-day dates resolve to midnight UTC.
fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = match value {
        Value::String(s) => s.as_str(),
        Value::Object(_) => value
            .get("dateTime")
            .or_else(|| value.get("date"))
            .and_then(Value::as_str)?,
        _ => return None,
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
