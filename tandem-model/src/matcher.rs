//! Fuzzy matching of items across services.
//!
//! Services rarely share identifiers, so a source item is paired with a
//! target item by comparing normalized content. Each item kind defines a set
//! of weighted components (title, artist, duration, ...). Components missing
//! on either side are left out and the remaining weights are renormalized, so
//! a sparse payload is not penalized for data it never had.

use serde::Serialize;
use tandem_types::ItemType;

use crate::item::{UniversalEvent, UniversalItem, UniversalPlaylist, UniversalTrack};
use crate::normalize::text_similarity;

/// Durations within this distance are considered identical.
const DURATION_EXACT_MS: u64 = 2_000;
/// Durations this far apart contribute nothing.
const DURATION_CUTOFF_MS: u64 = 10_000;
/// Event start times this far apart contribute nothing.
const START_CUTOFF_MINUTES: i64 = 60;

/// Best candidate for one source item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UniversalMatch {
    /// The matched target item, `None` when nothing cleared the threshold.
    pub target: Option<UniversalItem>,
    /// Position of the target in the candidate slice.
    pub candidate_index: Option<usize>,
    pub confidence: f64,
}

impl UniversalMatch {
    /// The sentinel "no match" value.
    pub fn none() -> Self {
        Self {
            target: None,
            candidate_index: None,
            confidence: 0.0,
        }
    }

    pub fn is_match(&self) -> bool {
        self.target.is_some()
    }
}

/// Aggregate statistics over a batch of matches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchSummary {
    pub total: usize,
    pub matched: usize,
    pub unmatched: usize,
    /// Mean confidence of the matched items, 0 when nothing matched.
    pub average_confidence: f64,
}

/// Finds the candidate most similar to `source`.
///
/// Ties go to the earliest candidate. A best score below `threshold`, or a
/// best score of zero, yields [`UniversalMatch::none`].
pub fn find_best_match(
    source: &UniversalItem,
    candidates: &[UniversalItem],
    threshold: f64,
) -> UniversalMatch {
    let mut best: Option<(usize, f64)> = None;

    for (index, candidate) in candidates.iter().enumerate() {
        let score = similarity(source, candidate);
        // Strict comparison keeps the earliest candidate on ties.
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((index, score));
        }
    }

    match best {
        Some((index, score)) if score > 0.0 && score >= threshold => UniversalMatch {
            target: Some(candidates[index].clone()),
            candidate_index: Some(index),
            confidence: score,
        },
        _ => UniversalMatch::none(),
    }
}

/// Similarity of two items in `[0, 1]`. Items of different kinds score 0.
pub fn similarity(a: &UniversalItem, b: &UniversalItem) -> f64 {
    match (a, b) {
        (UniversalItem::Track(a), UniversalItem::Track(b)) => track_similarity(a, b),
        (UniversalItem::Playlist(a), UniversalItem::Playlist(b)) => playlist_similarity(a, b),
        (UniversalItem::Event(a), UniversalItem::Event(b)) => event_similarity(a, b),
        _ => 0.0,
    }
}

/// Summarizes a batch of matches for logging.
pub fn analyze_matches(matches: &[UniversalMatch]) -> MatchSummary {
    let matched: Vec<f64> = matches
        .iter()
        .filter(|m| m.is_match())
        .map(|m| m.confidence)
        .collect();

    let average_confidence = if matched.is_empty() {
        0.0
    } else {
        matched.iter().sum::<f64>() / matched.len() as f64
    };

    MatchSummary {
        total: matches.len(),
        matched: matched.len(),
        unmatched: matches.len() - matched.len(),
        average_confidence,
    }
}

/// Returns true if items of `item_type` belong to a sync of `sync_type`.
///
/// Accepts `all`, a kind in singular or plural form, an `-only` suffix
/// (`tracks-only`), and the category names `music` and `calendar`.
pub fn matches_sync_type(item_type: ItemType, sync_type: &str) -> bool {
    let sync_type = sync_type.trim().to_ascii_lowercase();
    let base = sync_type
        .strip_suffix("-only")
        .or_else(|| sync_type.strip_suffix("_only"))
        .unwrap_or(&sync_type);

    match base {
        "all" | "*" => true,
        "music" => matches!(item_type, ItemType::Track | ItemType::Playlist),
        "calendar" => item_type == ItemType::Event,
        other => other.parse::<ItemType>().is_ok_and(|t| t == item_type),
    }
}

// ── Scoring ──────────────────────────────────────────────────────

/// Accumulates weighted components, skipping those absent on either side.
#[derive(Default)]
struct Score {
    weighted: f64,
    weight: f64,
}

impl Score {
    fn add(&mut self, weight: f64, value: Option<f64>) {
        if let Some(value) = value {
            self.weighted += weight * value;
            self.weight += weight;
        }
    }

    fn finish(self) -> f64 {
        if self.weight == 0.0 {
            0.0
        } else {
            (self.weighted / self.weight).clamp(0.0, 1.0)
        }
    }
}

fn both<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<(&'a str, &'a str)> {
    match (a.as_deref(), b.as_deref()) {
        (Some(a), Some(b)) if !a.trim().is_empty() && !b.trim().is_empty() => Some((a, b)),
        _ => None,
    }
}

fn track_similarity(a: &UniversalTrack, b: &UniversalTrack) -> f64 {
    if let Some((x, y)) = both(&a.isrc, &b.isrc) {
        if x.eq_ignore_ascii_case(y) {
            return 1.0;
        }
    }

    let mut score = Score::default();
    score.add(0.5, Some(text_similarity(&a.title, &b.title)));

    let artist = a
        .artists
        .iter()
        .flat_map(|x| b.artists.iter().map(move |y| text_similarity(x, y)))
        .fold(None, |best: Option<f64>, s| Some(best.map_or(s, |b| b.max(s))));
    score.add(0.3, artist);

    let duration = match (a.duration_ms, b.duration_ms) {
        (Some(x), Some(y)) => Some(linear_decay(
            x.abs_diff(y),
            DURATION_EXACT_MS,
            DURATION_CUTOFF_MS,
        )),
        _ => None,
    };
    score.add(0.2, duration);

    score.finish()
}

fn playlist_similarity(a: &UniversalPlaylist, b: &UniversalPlaylist) -> f64 {
    let mut score = Score::default();
    score.add(0.8, Some(text_similarity(&a.name, &b.name)));
    score.add(0.1, both(&a.owner, &b.owner).map(|(x, y)| text_similarity(x, y)));

    let count = match (a.track_count, b.track_count) {
        (Some(0), Some(0)) => Some(1.0),
        (Some(x), Some(y)) => Some(1.0 - f64::from(x.abs_diff(y)) / f64::from(x.max(y))),
        _ => None,
    };
    score.add(0.1, count);

    score.finish()
}

fn event_similarity(a: &UniversalEvent, b: &UniversalEvent) -> f64 {
    let mut score = Score::default();
    score.add(0.5, Some(text_similarity(&a.title, &b.title)));

    let start = match (a.start, b.start) {
        (Some(x), Some(y)) => {
            let minutes = (x - y).num_minutes().unsigned_abs();
            Some(linear_decay(minutes, 0, START_CUTOFF_MINUTES as u64))
        }
        _ => None,
    };
    score.add(0.35, start);
    score.add(
        0.15,
        both(&a.organizer, &b.organizer).map(|(x, y)| text_similarity(x, y)),
    );

    score.finish()
}

/// 1 up to `exact`, 0 from `cutoff`, linear in between.
fn linear_decay(distance: u64, exact: u64, cutoff: u64) -> f64 {
    if distance <= exact {
        1.0
    } else if distance >= cutoff {
        0.0
    } else {
        1.0 - (distance - exact) as f64 / (cutoff - exact) as f64
    }
}
