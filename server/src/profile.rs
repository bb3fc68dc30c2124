//! Player identity, ratings and match history
//!
//! Everything that outlives a single match lives behind the [`ProfileStore`]
//! seam: display names, ratings, win/loss counters and the append-only match
//! history. The server ships with an in-memory implementation; the rest of
//! the code only ever talks to the trait.

use crate::utils::epoch_millis;
use log::debug;
use serde::{Deserialize, Serialize};
use shared::DEFAULT_RATING;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

pub type PlayerId = u32;

/// How a finished match is categorized in a player's history.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Regular,
    Forfeit,
    TournamentFinal,
    TournamentThirdPlace,
    CancelledTournament,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Win,
    Loss,
    Forfeit,
    Cancelled,
}

/// One entry in a player's match history.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MatchRecord {
    pub opponent: String,
    pub outcome: MatchOutcome,
    pub match_type: MatchType,
    pub timestamp: u64,
}

impl MatchRecord {
    pub fn new(opponent: impl Into<String>, outcome: MatchOutcome, match_type: MatchType) -> Self {
        Self {
            opponent: opponent.into(),
            outcome,
            match_type,
            timestamp: epoch_millis(),
        }
    }
}

/// Settlement applied to one player when a match or tournament resolves.
#[derive(Debug, Clone)]
pub struct ProfileUpdate {
    pub new_rating: i32,
    pub wins_delta: u32,
    pub losses_delta: u32,
    pub record: Option<MatchRecord>,
}

/// Storage seam for identity and ratings.
///
/// Matchmaking, the match loops and the tournament manager all read and
/// settle ratings through this trait and never hold onto profile state
/// themselves.
pub trait ProfileStore: Send + Sync {
    /// Current rating, falling back to the default for unknown players.
    fn rating(&self, id: PlayerId) -> i32;
    /// Display name shown to opponents and in rankings.
    fn display_name(&self, id: PlayerId) -> String;
    /// Applies a settlement to one player.
    fn apply_result(&self, id: PlayerId, update: ProfileUpdate);
}

#[derive(Debug, Clone)]
pub struct Profile {
    pub id: PlayerId,
    pub name: String,
    pub rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub history: Vec<MatchRecord>,
}

/// In-memory [`ProfileStore`] keyed by login name.
#[derive(Clone, Default)]
pub struct InMemoryProfiles {
    inner: Arc<Mutex<ProfilesInner>>,
}

#[derive(Default)]
struct ProfilesInner {
    by_id: HashMap<PlayerId, Profile>,
    by_name: HashMap<String, PlayerId>,
    next_id: PlayerId,
}

impl InMemoryProfiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id registered for `name`, creating a fresh profile with
    /// the default rating on first sight.
    pub fn get_or_create(&self, name: &str) -> PlayerId {
        let mut inner = self.locked();
        if let Some(id) = inner.by_name.get(name) {
            return *id;
        }

        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_name.insert(name.to_string(), id);
        inner.by_id.insert(
            id,
            Profile {
                id,
                name: name.to_string(),
                rating: DEFAULT_RATING,
                wins: 0,
                losses: 0,
                history: Vec::new(),
            },
        );
        debug!("Registered new profile {} ({})", name, id);
        id
    }

    /// Snapshot of one profile, mainly for tests and diagnostics.
    pub fn profile(&self, id: PlayerId) -> Option<Profile> {
        self.locked().by_id.get(&id).cloned()
    }

    fn locked(&self) -> MutexGuard<'_, ProfilesInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ProfileStore for InMemoryProfiles {
    fn rating(&self, id: PlayerId) -> i32 {
        self.locked()
            .by_id
            .get(&id)
            .map(|p| p.rating)
            .unwrap_or(DEFAULT_RATING)
    }

    fn display_name(&self, id: PlayerId) -> String {
        self.locked()
            .by_id
            .get(&id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| format!("player_{}", id))
    }

    fn apply_result(&self, id: PlayerId, update: ProfileUpdate) {
        let mut inner = self.locked();
        if let Some(profile) = inner.by_id.get_mut(&id) {
            profile.rating = update.new_rating;
            profile.wins += update.wins_delta;
            profile.losses += update.losses_delta;
            if let Some(record) = update.record {
                profile.history.push(record);
            }
        }
    }
}
