//! Universal item model for Tandem.
//!
//! Providers hand the engine records in their own JSON shapes. This crate
//! normalizes them into a [`UniversalItem`] so items from different services
//! can be compared:
//! - [`transform_to_universal`] parses a provider [`SyncItem`](tandem_types::SyncItem)
//! - [`find_best_match`] scores a source item against a candidate pool
//! - [`resolve_conflict`] applies a [`ConflictPolicy`](tandem_types::ConflictPolicy)
//!   to a matched pair
//!
//! Only [`UniversalItem::checksum`] fingerprints are ever persisted; item
//! content stays in memory for the duration of one sync run.

mod conflict;
mod error;
mod item;
mod matcher;
mod normalize;
mod transform;

pub use conflict::{resolve_conflict, Resolution};
pub use error::{ModelError, ModelResult};
pub use item::{ItemCapabilities, UniversalEvent, UniversalItem, UniversalPlaylist, UniversalTrack};
pub use matcher::{
    analyze_matches, find_best_match, matches_sync_type, similarity, MatchSummary, UniversalMatch,
};
pub use normalize::normalize_text;
pub use transform::transform_to_universal;
