//! Live match registry and the fixed-tick loops that drive matches
//!
//! A [`SessionRegistry`] owns every running match it created: the locked
//! per-match state, the player-to-match bindings and the spawned loop task
//! driving the simulation. The matchmaking lobby and the tournament manager
//! each hold their own registry, so neither can reach into the other's
//! matches.
//!
//! The loop task is the only writer of match state. Everyone else goes
//! through [`SessionRegistry::set_input`] or severs a player's binding and
//! lets the loop notice on its next tick.

use crate::engine;
use crate::participant::SharedHandle;
use crate::profile::{MatchOutcome, MatchRecord, MatchType, PlayerId, ProfileStore, ProfileUpdate};
use crate::rating;
use log::{info, warn};
use shared::{GameState, PlayerSnapshot, ServerMessage, Side};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Terminal report for a tournament bracket match.
#[derive(Debug, Clone)]
pub struct BracketOutcome {
    pub match_id: String,
    pub winner: PlayerId,
    pub loser: PlayerId,
    pub left_score: u32,
    pub right_score: u32,
    pub forfeit: bool,
}

/// What happens when a match ends.
#[derive(Debug, Clone)]
pub enum MatchKind {
    /// Ladder match: the loop settles ratings and history itself.
    Ranked,
    /// Bracket match: the loop reports the outcome to the bracket owner.
    Bracket {
        results: mpsc::UnboundedSender<BracketOutcome>,
    },
}

/// Fixed per-match data shared between the registry and the loop task.
struct MatchSeats {
    left: PlayerId,
    right: PlayerId,
    left_handle: SharedHandle,
    right_handle: SharedHandle,
}

impl MatchSeats {
    fn broadcast(&self, message: &ServerMessage) {
        self.left_handle.send(message);
        self.right_handle.send(message);
    }
}

/// Mutable per-match state, locked per tick by the loop and per write by
/// the input entry point.
struct MatchEntry {
    state: GameState,
    inputs: HashMap<PlayerId, i32>,
}

struct LiveMatch {
    entry: Arc<Mutex<MatchEntry>>,
    task: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct RegistryInner {
    matches: HashMap<String, LiveMatch>,
    bindings: HashMap<PlayerId, String>,
}

/// Registry of live matches with their driving loop tasks.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    profiles: Arc<dyn ProfileStore>,
    tick_rate: f32,
}

impl SessionRegistry {
    pub fn new(profiles: Arc<dyn ProfileStore>, tick_rate: f32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner::default())),
            profiles,
            tick_rate,
        }
    }

    /// Creates a match, binds both players to it and spawns its loop.
    /// Returns the freshly served initial state.
    pub async fn create_match(
        &self,
        match_id: &str,
        kind: MatchKind,
        left: (PlayerId, SharedHandle),
        right: (PlayerId, SharedHandle),
    ) -> GameState {
        let (left_player, left_handle) = left;
        let (right_player, right_handle) = right;

        let state = GameState::new(
            self.snapshot(left_player),
            self.snapshot(right_player),
        );
        let seats = Arc::new(MatchSeats {
            left: left_player,
            right: right_player,
            left_handle,
            right_handle,
        });
        let entry = Arc::new(Mutex::new(MatchEntry {
            state: state.clone(),
            inputs: HashMap::new(),
        }));

        let mut inner = self.inner.lock().await;
        inner.bindings.insert(left_player, match_id.to_string());
        inner.bindings.insert(right_player, match_id.to_string());
        let task = self.spawn_loop(match_id.to_string(), seats, Arc::clone(&entry), kind);
        inner.matches.insert(
            match_id.to_string(),
            LiveMatch {
                entry,
                task: Some(task),
            },
        );

        info!(
            "Match {} created ({} vs {})",
            match_id, left_player, right_player
        );
        state
    }

    /// The single write path for paddle input. Unknown players and players
    /// without a live match are ignored.
    pub async fn set_input(&self, player: PlayerId, input: i32) -> bool {
        let entry = {
            let inner = self.inner.lock().await;
            let live = inner
                .bindings
                .get(&player)
                .and_then(|match_id| inner.matches.get(match_id));
            match live {
                Some(live) => Arc::clone(&live.entry),
                None => return false,
            }
        };

        entry.lock().await.inputs.insert(player, input);
        true
    }

    /// Severs a player's binding. A running loop treats the missing binding
    /// as a forfeit on its next tick. Returns the match the player was
    /// bound to, if any.
    pub async fn clear_binding(&self, player: PlayerId) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let match_id = inner.bindings.remove(&player);
        if let Some(id) = &match_id {
            info!("Player {} unbound from match {}", player, id);
        }
        match_id
    }

    /// Kills a match outright: the loop task is aborted and no outcome is
    /// reported. Used when a tournament bracket is cancelled.
    pub async fn abort_match(&self, match_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        match inner.matches.remove(match_id) {
            Some(live) => {
                if let Some(task) = live.task {
                    task.abort();
                }
                inner.bindings.retain(|_, bound| bound != match_id);
                info!("Match {} aborted", match_id);
                true
            }
            None => false,
        }
    }

    pub async fn binding(&self, player: PlayerId) -> Option<String> {
        self.inner.lock().await.bindings.get(&player).cloned()
    }

    pub async fn is_bound(&self, player: PlayerId) -> bool {
        self.inner.lock().await.bindings.contains_key(&player)
    }

    pub async fn active_matches(&self) -> usize {
        self.inner.lock().await.matches.len()
    }

    /// Snapshot of a live match's state, mainly for tests and diagnostics.
    pub async fn state_of(&self, match_id: &str) -> Option<GameState> {
        let entry = {
            let inner = self.inner.lock().await;
            inner.matches.get(match_id).map(|live| Arc::clone(&live.entry))
        };
        match entry {
            Some(entry) => Some(entry.lock().await.state.clone()),
            None => None,
        }
    }

    fn snapshot(&self, player: PlayerId) -> PlayerSnapshot {
        PlayerSnapshot {
            id: player,
            name: self.profiles.display_name(player),
            rating: self.profiles.rating(player),
        }
    }

    fn spawn_loop(
        &self,
        match_id: String,
        seats: Arc<MatchSeats>,
        entry: Arc<Mutex<MatchEntry>>,
        kind: MatchKind,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.run_match_loop(match_id, seats, entry, kind).await;
        })
    }

    async fn run_match_loop(
        &self,
        match_id: String,
        seats: Arc<MatchSeats>,
        entry: Arc<Mutex<MatchEntry>>,
        kind: MatchKind,
    ) {
        let mut timer = interval(Duration::from_secs_f32(1.0 / self.tick_rate));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        timer.tick().await;

        loop {
            timer.tick().await;

            // A player whose binding is gone has left the match
            if let Some(forfeiter) = self.unbound_player(&match_id, &seats).await {
                let winner_side = if forfeiter == seats.left {
                    Side::Right
                } else {
                    Side::Left
                };
                let final_state = entry.lock().await.state.clone();
                self.settle(&match_id, &seats, &kind, &final_state, winner_side, true)
                    .await;
                return;
            }

            let (snapshot, winner) = {
                let mut locked = entry.lock().await;
                let left_input = locked.inputs.get(&seats.left).copied().unwrap_or(0);
                let right_input = locked.inputs.get(&seats.right).copied().unwrap_or(0);
                engine::step(&mut locked.state, left_input, right_input);
                let winner = engine::check_goal(&mut locked.state).and_then(|goal| goal.winner);
                (locked.state.clone(), winner)
            };

            if let Some(winner_side) = winner {
                self.settle(&match_id, &seats, &kind, &snapshot, winner_side, false)
                    .await;
                return;
            }

            seats.broadcast(&ServerMessage::GameState {
                match_id: match_id.clone(),
                state: snapshot,
            });
        }
    }

    async fn unbound_player(&self, match_id: &str, seats: &MatchSeats) -> Option<PlayerId> {
        let inner = self.inner.lock().await;
        for player in [seats.left, seats.right] {
            if inner.bindings.get(&player).map(|bound| bound.as_str()) != Some(match_id) {
                return Some(player);
            }
        }
        None
    }

    async fn settle(
        &self,
        match_id: &str,
        seats: &MatchSeats,
        kind: &MatchKind,
        final_state: &GameState,
        winner_side: Side,
        forfeit: bool,
    ) {
        let (winner, loser) = match winner_side {
            Side::Left => (seats.left, seats.right),
            Side::Right => (seats.right, seats.left),
        };

        self.finish_match(match_id).await;

        match kind {
            MatchKind::Ranked => {
                self.settle_ranked(match_id, seats, final_state, winner, loser, forfeit);
            }
            MatchKind::Bracket { results } => {
                let outcome = BracketOutcome {
                    match_id: match_id.to_string(),
                    winner,
                    loser,
                    left_score: final_state.left_score,
                    right_score: final_state.right_score,
                    forfeit,
                };
                if results.send(outcome).is_err() {
                    warn!("No listener left for the outcome of match {}", match_id);
                }
            }
        }
    }

    /// Drops a finished match and both bindings without touching the loop
    /// task, which is already on its way out.
    async fn finish_match(&self, match_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.matches.remove(match_id);
        inner.bindings.retain(|_, bound| bound != match_id);
    }

    fn settle_ranked(
        &self,
        match_id: &str,
        seats: &MatchSeats,
        final_state: &GameState,
        winner: PlayerId,
        loser: PlayerId,
        forfeit: bool,
    ) {
        let winner_name = self.profiles.display_name(winner);
        let loser_name = self.profiles.display_name(loser);
        let winner_rating = self.profiles.rating(winner);
        let loser_rating = self.profiles.rating(loser);

        let (new_winner_rating, new_loser_rating) = if forfeit {
            rating::settle_forfeit(winner_rating, loser_rating)
        } else {
            rating::settle_duel(winner_rating, loser_rating)
        };

        let match_type = if forfeit {
            MatchType::Forfeit
        } else {
            MatchType::Regular
        };
        let loser_outcome = if forfeit {
            MatchOutcome::Forfeit
        } else {
            MatchOutcome::Loss
        };

        self.profiles.apply_result(
            winner,
            ProfileUpdate {
                new_rating: new_winner_rating,
                wins_delta: 1,
                losses_delta: 0,
                record: Some(MatchRecord::new(
                    loser_name.clone(),
                    MatchOutcome::Win,
                    match_type,
                )),
            },
        );
        self.profiles.apply_result(
            loser,
            ProfileUpdate {
                new_rating: new_loser_rating,
                wins_delta: 0,
                losses_delta: 1,
                record: Some(MatchRecord::new(
                    winner_name.clone(),
                    loser_outcome,
                    match_type,
                )),
            },
        );

        let message = if forfeit {
            format!("{} wins by forfeit", winner_name)
        } else {
            format!("{} wins the match", winner_name)
        };
        info!("Match {} over: {}", match_id, message);

        seats.broadcast(&ServerMessage::GameOver {
            match_id: match_id.to_string(),
            winner: winner_name,
            message,
            left_score: final_state.left_score,
            right_score: final_state.right_score,
        });
    }
}
