//! Four-player single-elimination tournaments
//!
//! A bracket fills with four seats, runs two semifinals in parallel, then a
//! third-place match followed by the final. Bracket matches run on the
//! manager's own registry and report their outcomes over a channel instead
//! of settling ratings themselves; the manager applies placement rating
//! changes only when the whole bracket completes. A disconnect or walkout
//! after the bracket has started cancels it for everyone.

use crate::participant::SharedHandle;
use crate::profile::{MatchOutcome, MatchRecord, MatchType, PlayerId, ProfileStore, ProfileUpdate};
use crate::rating::{abandon_rating, placement_delta};
use crate::session::{BracketOutcome, MatchKind, SessionRegistry};
use log::{info, warn};
use shared::{RankingEntry, ServerMessage, Side, TournamentSeat};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Seats per bracket.
pub const BRACKET_SIZE: usize = 4;

/// The four matches a bracket is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BracketSlot {
    Semifinal1,
    Semifinal2,
    ThirdPlace,
    Final,
}

impl BracketSlot {
    fn as_str(self) -> &'static str {
        match self {
            BracketSlot::Semifinal1 => "semifinal1",
            BracketSlot::Semifinal2 => "semifinal2",
            BracketSlot::ThirdPlace => "third_place",
            BracketSlot::Final => "final",
        }
    }
}

struct Seat {
    player: PlayerId,
    handle: SharedHandle,
}

#[derive(Debug, Clone, Copy)]
struct SlotResult {
    winner: PlayerId,
    loser: PlayerId,
}

struct SlotMatch {
    match_id: String,
    left: PlayerId,
    right: PlayerId,
}

struct Bracket {
    id: u32,
    seats: Vec<Seat>,
    started: bool,
    complete: bool,
    cancelled: bool,
    finals_created: bool,
    results: HashMap<BracketSlot, SlotResult>,
    live: HashMap<BracketSlot, SlotMatch>,
    penalized: HashSet<PlayerId>,
    notified: HashSet<PlayerId>,
    history_updated: bool,
}

impl Bracket {
    fn new(id: u32) -> Self {
        Self {
            id,
            seats: Vec::new(),
            started: false,
            complete: false,
            cancelled: false,
            finals_created: false,
            results: HashMap::new(),
            live: HashMap::new(),
            penalized: HashSet::new(),
            notified: HashSet::new(),
            history_updated: false,
        }
    }

    fn open(&self) -> bool {
        !self.complete && !self.cancelled
    }

    fn contains(&self, player: PlayerId) -> bool {
        self.seats.iter().any(|seat| seat.player == player)
    }

    fn seat_index(&self, player: PlayerId) -> Option<usize> {
        self.seats.iter().position(|seat| seat.player == player)
    }

    fn is_in_live_match(&self, player: PlayerId) -> bool {
        self.live
            .values()
            .any(|live| live.left == player || live.right == player)
    }

    fn slot_of_match(&self, match_id: &str) -> Option<BracketSlot> {
        self.live
            .iter()
            .find(|(_, live)| live.match_id == match_id)
            .map(|(slot, _)| *slot)
    }
}

struct ManagerInner {
    brackets: Vec<Bracket>,
    next_id: u32,
}

/// Owner of every bracket and of the registry their matches run on.
#[derive(Clone)]
pub struct TournamentManager {
    inner: Arc<Mutex<ManagerInner>>,
    registry: SessionRegistry,
    profiles: Arc<dyn ProfileStore>,
    results_tx: mpsc::UnboundedSender<BracketOutcome>,
}

impl TournamentManager {
    /// Builds the manager and spawns the task draining match outcomes.
    pub fn new(profiles: Arc<dyn ProfileStore>, tick_rate: f32) -> Self {
        let (results_tx, mut results_rx) = mpsc::unbounded_channel();
        let manager = Self {
            inner: Arc::new(Mutex::new(ManagerInner {
                brackets: Vec::new(),
                next_id: 1,
            })),
            registry: SessionRegistry::new(Arc::clone(&profiles), tick_rate),
            profiles,
            results_tx,
        };

        let listener = manager.clone();
        tokio::spawn(async move {
            while let Some(outcome) = results_rx.recv().await {
                listener.handle_match_outcome(outcome).await;
            }
        });

        manager
    }

    /// The registry holding this manager's bracket matches.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub async fn set_input(&self, player: PlayerId, input: i32) -> bool {
        self.registry.set_input(player, input).await
    }

    /// Seated in any bracket that is neither complete nor cancelled.
    pub async fn is_active_participant(&self, player: PlayerId) -> bool {
        let inner = self.inner.lock().await;
        inner
            .brackets
            .iter()
            .any(|bracket| bracket.open() && bracket.contains(player))
    }

    pub async fn active_brackets(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.brackets.iter().filter(|bracket| bracket.open()).count()
    }

    /// Seats a player in the first bracket with room, opening a new one when
    /// every bracket is full. The fourth seat starts the semifinals.
    pub async fn join(&self, player: PlayerId, handle: SharedHandle) -> bool {
        let mut inner = self.inner.lock().await;
        if inner
            .brackets
            .iter()
            .any(|bracket| bracket.open() && bracket.contains(player))
        {
            handle.send(&ServerMessage::Error {
                message: "You are already in a tournament".to_string(),
            });
            return false;
        }

        let idx = match inner
            .brackets
            .iter()
            .position(|bracket| bracket.open() && !bracket.started && bracket.seats.len() < BRACKET_SIZE)
        {
            Some(idx) => idx,
            None => {
                let id = inner.next_id;
                inner.next_id += 1;
                inner.brackets.push(Bracket::new(id));
                info!("Tournament {} opened", id);
                inner.brackets.len() - 1
            }
        };

        inner.brackets[idx].seats.push(Seat { player, handle });
        let seated = inner.brackets[idx].seats.len();
        info!(
            "Player {} took seat {}/{} in tournament {}",
            player, seated, BRACKET_SIZE, inner.brackets[idx].id
        );

        if seated == BRACKET_SIZE {
            inner.brackets[idx].started = true;
            self.broadcast_state(&inner.brackets[idx], "Tournament full, semifinals starting");
            let bracket = &mut inner.brackets[idx];
            self.start_slot_match(bracket, BracketSlot::Semifinal1, 0, 1).await;
            self.start_slot_match(bracket, BracketSlot::Semifinal2, 2, 3).await;
        } else {
            self.broadcast_state(&inner.brackets[idx], "Waiting for more players");
        }
        true
    }

    /// Voluntary exit. Before the bracket starts this just frees the seat;
    /// once it has started, leaving between matches cancels the bracket, and
    /// leaving during one's own live match is refused.
    pub async fn leave(&self, player: PlayerId, handle: SharedHandle) -> bool {
        let mut inner = self.inner.lock().await;
        let idx = match inner
            .brackets
            .iter()
            .position(|bracket| bracket.open() && bracket.contains(player))
        {
            Some(idx) => idx,
            None => {
                handle.send(&ServerMessage::Error {
                    message: "You are not in a tournament".to_string(),
                });
                return false;
            }
        };

        if !inner.brackets[idx].started {
            handle.send(&ServerMessage::TournamentLeft {
                message: "You left the tournament".to_string(),
            });
            self.drop_waiting_seat(&mut inner, idx, player);
            return true;
        }

        if inner.brackets[idx].is_in_live_match(player) {
            handle.send(&ServerMessage::Error {
                message: "Finish your current match before leaving the tournament".to_string(),
            });
            return false;
        }

        handle.send(&ServerMessage::TournamentLeft {
            message: "You abandoned the tournament".to_string(),
        });
        let bracket = &mut inner.brackets[idx];
        self.cancel_bracket(bracket, player).await;
        true
    }

    /// Connection loss. A waiting seat is freed; a started bracket is
    /// cancelled with the disconnected player as the forfeiter.
    pub async fn handle_player_disconnect(&self, player: PlayerId) {
        let mut inner = self.inner.lock().await;
        let idx = match inner
            .brackets
            .iter()
            .position(|bracket| bracket.open() && bracket.contains(player))
        {
            Some(idx) => idx,
            None => return,
        };

        if !inner.brackets[idx].started {
            self.drop_waiting_seat(&mut inner, idx, player);
            return;
        }

        let bracket = &mut inner.brackets[idx];
        self.cancel_bracket(bracket, player).await;
    }

    /// Terminal report from a bracket match loop.
    pub async fn handle_match_outcome(&self, outcome: BracketOutcome) {
        let mut inner = self.inner.lock().await;
        let idx = match inner
            .brackets
            .iter()
            .position(|bracket| bracket.slot_of_match(&outcome.match_id).is_some())
        {
            Some(idx) => idx,
            None => {
                warn!("Outcome for unknown match {}", outcome.match_id);
                return;
            }
        };

        let bracket = &mut inner.brackets[idx];
        if !bracket.open() {
            return;
        }
        let slot = match bracket.slot_of_match(&outcome.match_id) {
            Some(slot) => slot,
            None => return,
        };
        bracket.live.remove(&slot);

        if outcome.forfeit {
            info!(
                "Player {} forfeited {} of tournament {}",
                outcome.loser,
                slot.as_str(),
                bracket.id
            );
            self.cancel_bracket(bracket, outcome.loser).await;
            return;
        }

        bracket.results.insert(
            slot,
            SlotResult {
                winner: outcome.winner,
                loser: outcome.loser,
            },
        );
        info!(
            "Tournament {} {}: player {} beat player {}",
            bracket.id,
            slot.as_str(),
            outcome.winner,
            outcome.loser
        );

        let winner_name = self.profiles.display_name(outcome.winner);
        let result_msg = ServerMessage::MatchResult {
            match_id: outcome.match_id.clone(),
            winner: outcome.winner,
            winner_display: winner_name.clone(),
            message: format!("{} wins {}", winner_name, slot.as_str()),
        };
        for seat in &bracket.seats {
            if !bracket.is_in_live_match(seat.player) {
                seat.handle.send(&result_msg);
            }
        }

        match slot {
            BracketSlot::Semifinal1 | BracketSlot::Semifinal2 => {
                self.maybe_start_finals(bracket).await;
            }
            BracketSlot::ThirdPlace | BracketSlot::Final => {
                self.report_standings(bracket);
            }
        }
    }

    /// Both semifinal results in and nothing still running: announce and
    /// start the third-place match and the final.
    async fn maybe_start_finals(&self, bracket: &mut Bracket) {
        if bracket.finals_created || !bracket.live.is_empty() {
            return;
        }
        let (semi1, semi2) = match (
            bracket.results.get(&BracketSlot::Semifinal1),
            bracket.results.get(&BracketSlot::Semifinal2),
        ) {
            (Some(semi1), Some(semi2)) => (*semi1, *semi2),
            _ => return,
        };
        bracket.finals_created = true;

        let finalists = (
            self.profiles.display_name(semi1.winner),
            self.profiles.display_name(semi2.winner),
        );
        let consolation = (
            self.profiles.display_name(semi1.loser),
            self.profiles.display_name(semi2.loser),
        );
        for seat in &bracket.seats {
            seat.handle.send(&ServerMessage::ThirdPlaceStarting {
                player1: consolation.0.clone(),
                player2: consolation.1.clone(),
                message: format!("{} and {} play for third place", consolation.0, consolation.1),
            });
            seat.handle.send(&ServerMessage::FinalsStarting {
                player1: finalists.0.clone(),
                player2: finalists.1.clone(),
                message: format!("{} and {} meet in the final", finalists.0, finalists.1),
            });
        }

        let seats = (
            bracket.seat_index(semi1.loser),
            bracket.seat_index(semi2.loser),
            bracket.seat_index(semi1.winner),
            bracket.seat_index(semi2.winner),
        );
        if let (Some(third_left), Some(third_right), Some(final_left), Some(final_right)) = seats {
            self.start_slot_match(bracket, BracketSlot::ThirdPlace, third_left, third_right)
                .await;
            self.start_slot_match(bracket, BracketSlot::Final, final_left, final_right)
                .await;
        }
    }

    /// Standings after a third-place or final result. Partial until both are
    /// in; the full standings also settle ratings, counters and history.
    fn report_standings(&self, bracket: &mut Bracket) {
        let third = bracket.results.get(&BracketSlot::ThirdPlace).copied();
        let decider = bracket.results.get(&BracketSlot::Final).copied();
        let complete = third.is_some() && decider.is_some();

        if complete {
            bracket.complete = true;
            self.apply_placements(bracket);
            info!("Tournament {} complete", bracket.id);
        }

        let mut rankings = Vec::new();
        if let Some(result) = decider {
            rankings.push(self.ranking_entry(1, result.winner));
            rankings.push(self.ranking_entry(2, result.loser));
        }
        if let Some(result) = third {
            rankings.push(self.ranking_entry(3, result.winner));
            rankings.push(self.ranking_entry(4, result.loser));
        }
        rankings.sort_by_key(|entry| entry.place);

        // Standings go to every seat, playing or not
        let msg = ServerMessage::TournamentRankings {
            tournament_id: bracket.id,
            rankings,
            complete,
        };
        for seat in &bracket.seats {
            seat.handle.send(&msg);
        }
    }

    fn ranking_entry(&self, place: u32, player: PlayerId) -> RankingEntry {
        RankingEntry {
            place,
            id: player,
            name: self.profiles.display_name(player),
        }
    }

    /// Placement rating changes and history, exactly once per bracket.
    fn apply_placements(&self, bracket: &mut Bracket) {
        if bracket.history_updated {
            return;
        }
        let (decider, third) = match (
            bracket.results.get(&BracketSlot::Final).copied(),
            bracket.results.get(&BracketSlot::ThirdPlace).copied(),
        ) {
            (Some(decider), Some(third)) => (decider, third),
            _ => return,
        };
        bracket.history_updated = true;

        let champion_name = self.profiles.display_name(decider.winner);
        let runner_up_name = self.profiles.display_name(decider.loser);
        let third_name = self.profiles.display_name(third.winner);
        let fourth_name = self.profiles.display_name(third.loser);

        let placements = [
            // player, place, wins, losses, opponent, outcome, match type
            (
                decider.winner,
                1,
                2,
                0,
                runner_up_name.clone(),
                MatchOutcome::Win,
                MatchType::TournamentFinal,
            ),
            (
                decider.loser,
                2,
                1,
                1,
                champion_name.clone(),
                MatchOutcome::Loss,
                MatchType::TournamentFinal,
            ),
            (
                third.winner,
                3,
                1,
                1,
                fourth_name.clone(),
                MatchOutcome::Win,
                MatchType::TournamentThirdPlace,
            ),
            (
                third.loser,
                4,
                0,
                2,
                third_name.clone(),
                MatchOutcome::Loss,
                MatchType::TournamentThirdPlace,
            ),
        ];

        for (player, place, wins, losses, opponent, outcome, match_type) in placements {
            let rating = self.profiles.rating(player);
            self.profiles.apply_result(
                player,
                ProfileUpdate {
                    new_rating: (rating + placement_delta(place)).max(0),
                    wins_delta: wins,
                    losses_delta: losses,
                    record: Some(MatchRecord::new(opponent, outcome, match_type)),
                },
            );
        }

        info!(
            "Tournament {} standings: 1. {} 2. {} 3. {} 4. {}",
            bracket.id, champion_name, runner_up_name, third_name, fourth_name
        );
    }

    /// Kills a started bracket: live matches are aborted, the forfeiter pays
    /// the abandonment penalty, everyone else gets a cancellation record and
    /// a notification. Safe to call more than once.
    async fn cancel_bracket(&self, bracket: &mut Bracket, forfeiter: PlayerId) {
        if !bracket.open() {
            return;
        }
        bracket.cancelled = true;

        let cancelled_match_ids: Vec<String> = bracket
            .live
            .values()
            .map(|live| live.match_id.clone())
            .collect();
        bracket.live.clear();
        for match_id in &cancelled_match_ids {
            self.registry.abort_match(match_id).await;
        }

        let forfeiter_display = self.profiles.display_name(forfeiter);
        let opponent_label = format!("Tournament {}", bracket.id);

        if bracket.penalized.insert(forfeiter) {
            let rating = self.profiles.rating(forfeiter);
            self.profiles.apply_result(
                forfeiter,
                ProfileUpdate {
                    new_rating: abandon_rating(rating),
                    wins_delta: 0,
                    losses_delta: 1,
                    record: Some(MatchRecord::new(
                        opponent_label.clone(),
                        MatchOutcome::Forfeit,
                        MatchType::CancelledTournament,
                    )),
                },
            );
        }

        if !bracket.history_updated {
            bracket.history_updated = true;
            for seat in &bracket.seats {
                if seat.player == forfeiter {
                    continue;
                }
                self.profiles.apply_result(
                    seat.player,
                    ProfileUpdate {
                        new_rating: self.profiles.rating(seat.player),
                        wins_delta: 0,
                        losses_delta: 0,
                        record: Some(MatchRecord::new(
                            opponent_label.clone(),
                            MatchOutcome::Cancelled,
                            MatchType::CancelledTournament,
                        )),
                    },
                );
            }
        }

        let msg = ServerMessage::TournamentCancelled {
            forfeiter,
            forfeiter_display: forfeiter_display.clone(),
            cancelled_match_ids,
            message: format!("{} left, the tournament is cancelled", forfeiter_display),
        };
        let seats: Vec<(PlayerId, SharedHandle)> = bracket
            .seats
            .iter()
            .map(|seat| (seat.player, Arc::clone(&seat.handle)))
            .collect();
        for (player, handle) in seats {
            // Everyone but the forfeiter hears about the cancellation
            if player == forfeiter {
                continue;
            }
            if bracket.notified.insert(player) {
                handle.send(&msg);
            }
        }

        info!(
            "Tournament {} cancelled after player {} left",
            bracket.id, forfeiter
        );
    }

    fn drop_waiting_seat(&self, inner: &mut ManagerInner, idx: usize, player: PlayerId) {
        inner.brackets[idx]
            .seats
            .retain(|seat| seat.player != player);
        info!(
            "Player {} gave up their seat in tournament {}",
            player, inner.brackets[idx].id
        );
        if inner.brackets[idx].seats.is_empty() {
            inner.brackets.remove(idx);
        } else {
            self.broadcast_state(&inner.brackets[idx], "A player left, waiting for more players");
        }
    }

    /// Every seat gets the same roster plus their own seat number.
    fn broadcast_state(&self, bracket: &Bracket, message: &str) {
        let players: Vec<TournamentSeat> = bracket
            .seats
            .iter()
            .enumerate()
            .map(|(idx, seat)| TournamentSeat {
                id: seat.player,
                name: self.profiles.display_name(seat.player),
                rating: self.profiles.rating(seat.player),
                seat: idx as u32 + 1,
            })
            .collect();

        for (idx, seat) in bracket.seats.iter().enumerate() {
            seat.handle.send(&ServerMessage::TournamentState {
                tournament_id: bracket.id,
                player_count: bracket.seats.len(),
                players: players.clone(),
                waiting: !bracket.started,
                message: message.to_string(),
                your_seat: Some(idx as u32 + 1),
            });
        }
    }

    async fn start_slot_match(
        &self,
        bracket: &mut Bracket,
        slot: BracketSlot,
        left_seat: usize,
        right_seat: usize,
    ) {
        let (left_player, left_handle) = {
            let seat = &bracket.seats[left_seat];
            (seat.player, Arc::clone(&seat.handle))
        };
        let (right_player, right_handle) = {
            let seat = &bracket.seats[right_seat];
            (seat.player, Arc::clone(&seat.handle))
        };
        let match_id = format!("tournament_{}_{}", bracket.id, slot.as_str());

        let state = self
            .registry
            .create_match(
                &match_id,
                MatchKind::Bracket {
                    results: self.results_tx.clone(),
                },
                (left_player, Arc::clone(&left_handle)),
                (right_player, Arc::clone(&right_handle)),
            )
            .await;

        left_handle.send(&ServerMessage::MatchCreated {
            match_id: match_id.clone(),
            side: Side::Left,
            opponent: state.right_player.name.clone(),
            game_state: state.clone(),
        });
        right_handle.send(&ServerMessage::MatchCreated {
            match_id: match_id.clone(),
            side: Side::Right,
            opponent: state.left_player.name.clone(),
            game_state: state,
        });

        bracket.live.insert(
            slot,
            SlotMatch {
                match_id,
                left: left_player,
                right: right_player,
            },
        );
    }
}
