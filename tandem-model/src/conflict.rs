//! Conflict-policy resolution for matched items.

use tandem_types::{ConflictPolicy, ItemAction};

use crate::error::{ModelError, ModelResult};
use crate::item::{ItemCapabilities, UniversalItem};

/// What the executor should do with a matched target item.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Policy says leave the target alone.
    Skip,
    /// The resolved content already equals the target; nothing to write.
    Unchanged,
    /// Write this item over the target. It carries the target's identity.
    Write(UniversalItem),
}

/// Applies `policy` to a source item and its matched target.
///
/// - `Skip` never writes.
/// - `Overwrite` replaces the target content with the source content.
/// - `Merge` keeps target values only where the source field is empty.
pub fn resolve_conflict(
    policy: ConflictPolicy,
    source: &UniversalItem,
    target: &UniversalItem,
) -> ModelResult<Resolution> {
    if source.item_type() != target.item_type() {
        return Err(ModelError::IncompatibleItems {
            source_type: source.item_type().as_str(),
            target_type: target.item_type().as_str(),
        });
    }

    let resolved = match policy {
        ConflictPolicy::Skip => return Ok(Resolution::Skip),
        ConflictPolicy::Overwrite => source.clone(),
        ConflictPolicy::Merge => merge(source, target),
    };
    let resolved = resolved.with_identity(target.identifier(), target.service(), ItemAction::Update);

    if resolved.checksum() == target.checksum() {
        Ok(Resolution::Unchanged)
    } else {
        Ok(Resolution::Write(resolved))
    }
}

fn merge(source: &UniversalItem, target: &UniversalItem) -> UniversalItem {
    match (source, target) {
        (UniversalItem::Track(s), UniversalItem::Track(t)) => {
            let mut m = s.clone();
            m.title = pick(&s.title, &t.title);
            if m.artists.is_empty() {
                m.artists = t.artists.clone();
            }
            m.album = pick_opt(&s.album, &t.album);
            m.duration_ms = s.duration_ms.or(t.duration_ms);
            m.isrc = pick_opt(&s.isrc, &t.isrc);
            UniversalItem::Track(m)
        }
        (UniversalItem::Playlist(s), UniversalItem::Playlist(t)) => {
            let mut m = s.clone();
            m.name = pick(&s.name, &t.name);
            m.description = pick_opt(&s.description, &t.description);
            m.track_count = s.track_count.or(t.track_count);
            m.owner = pick_opt(&s.owner, &t.owner);
            UniversalItem::Playlist(m)
        }
        (UniversalItem::Event(s), UniversalItem::Event(t)) => {
            let mut m = s.clone();
            m.title = pick(&s.title, &t.title);
            m.organizer = pick_opt(&s.organizer, &t.organizer);
            m.location = pick_opt(&s.location, &t.location);
            m.start = s.start.or(t.start);
            m.end = s.end.or(t.end);
            m.description = pick_opt(&s.description, &t.description);
            UniversalItem::Event(m)
        }
        // Kinds are checked by the caller.
        _ => source.clone(),
    }
}

fn pick(source: &str, target: &str) -> String {
    if source.trim().is_empty() {
        target.to_string()
    } else {
        source.to_string()
    }
}

fn pick_opt(source: &Option<String>, target: &Option<String>) -> Option<String> {
    match source.as_deref() {
        Some(s) if !s.trim().is_empty() => Some(s.to_string()),
        _ => target.clone(),
    }
}
