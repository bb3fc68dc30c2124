//! Rating-based matchmaking for ranked ladder matches
//!
//! Players wait in a single queue. A pair is playable when the rating gap,
//! discounted by how long the candidate has been waiting, falls under the
//! acceptance threshold, or when the longer-waiting player has been queued
//! past the wait ceiling. Each queued player carries a retry task that
//! re-runs the sweep every couple of seconds and keeps the player informed
//! of their queue position.

use crate::participant::SharedHandle;
use crate::profile::{PlayerId, ProfileStore};
use crate::session::{MatchKind, SessionRegistry};
use crate::utils::epoch_millis;
use log::info;
use shared::{ServerMessage, Side, MATCHMAKING_SWEEP_SECS, MATCH_THRESHOLD, MATCH_WAIT_CEILING_SECS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Rating gap discounted by wait time: every ten seconds of waiting widens
/// the acceptable gap by another factor of the raw difference.
pub fn adjusted_gap(gap: f32, wait_secs: f32) -> f32 {
    gap / (1.0 + 0.1 * wait_secs)
}

struct QueueEntry {
    player: PlayerId,
    handle: SharedHandle,
    rating: i32,
    queued_at: Instant,
    retry: Option<JoinHandle<()>>,
}

// Removal does not abort the entry's retry task here: the caller may be
// that very task, mid-sweep. Each caller settles the handle itself.
fn take_entry(queue: &mut Vec<QueueEntry>, player: PlayerId) -> Option<QueueEntry> {
    let idx = queue.iter().position(|entry| entry.player == player)?;
    Some(queue.remove(idx))
}

/// Matchmaking lobby owning the waiting queue and its own match registry.
#[derive(Clone)]
pub struct Lobby {
    queue: Arc<Mutex<Vec<QueueEntry>>>,
    registry: SessionRegistry,
    profiles: Arc<dyn ProfileStore>,
    threshold: f32,
    wait_ceiling: Duration,
}

impl Lobby {
    pub fn new(profiles: Arc<dyn ProfileStore>, tick_rate: f32) -> Self {
        Self::with_rules(
            profiles,
            tick_rate,
            MATCH_THRESHOLD,
            Duration::from_secs_f32(MATCH_WAIT_CEILING_SECS),
        )
    }

    pub fn with_rules(
        profiles: Arc<dyn ProfileStore>,
        tick_rate: f32,
        threshold: f32,
        wait_ceiling: Duration,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(Vec::new())),
            registry: SessionRegistry::new(Arc::clone(&profiles), tick_rate),
            profiles,
            threshold,
            wait_ceiling,
        }
    }

    /// The registry holding this lobby's ranked matches.
    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Puts a player into the waiting queue and tries to pair them right
    /// away. Players already in a ranked match are rejected with an error;
    /// a repeat request from a queued player just repeats the wait status.
    pub async fn enqueue(&self, player: PlayerId, handle: SharedHandle) -> bool {
        if self.registry.is_bound(player).await {
            handle.send(&ServerMessage::Error {
                message: "You are already in a match".to_string(),
            });
            return false;
        }

        let (position, fresh) = {
            let mut queue = self.queue.lock().await;
            match queue.iter().position(|entry| entry.player == player) {
                Some(idx) => (idx + 1, false),
                None => {
                    queue.push(QueueEntry {
                        player,
                        handle: Arc::clone(&handle),
                        rating: self.profiles.rating(player),
                        queued_at: Instant::now(),
                        retry: None,
                    });
                    (queue.len(), true)
                }
            }
        };

        handle.send(&ServerMessage::Waiting {
            queue_position: position,
            message: "Waiting for an opponent".to_string(),
        });
        if !fresh {
            return false;
        }
        info!("Player {} queued for matchmaking (position {})", player, position);

        if !self.try_pair(player).await {
            self.spawn_retry(player, handle).await;
        }
        true
    }

    /// Removes a player from the waiting queue. Returns false if they were
    /// not queued; a running match is left untouched.
    pub async fn cancel(&self, player: PlayerId) -> bool {
        let mut queue = self.queue.lock().await;
        match take_entry(&mut queue, player) {
            Some(mut entry) => {
                // Cancellation arrives on the player's connection task,
                // never on the retry task being aborted
                if let Some(task) = entry.retry.take() {
                    task.abort();
                }
                info!("Player {} left the matchmaking queue", player);
                true
            }
            None => false,
        }
    }

    /// Connection loss: drop the player from the queue if waiting, or sever
    /// their match binding so the loop forfeits them on its next tick.
    pub async fn handle_disconnect(&self, player: PlayerId) {
        if self.cancel(player).await {
            return;
        }
        self.registry.clear_binding(player).await;
    }

    pub async fn set_input(&self, player: PlayerId, input: i32) -> bool {
        self.registry.set_input(player, input).await
    }

    /// Queued or currently playing a ranked match.
    pub async fn is_busy(&self, player: PlayerId) -> bool {
        if self.registry.is_bound(player).await {
            return true;
        }
        self.queue.lock().await.iter().any(|entry| entry.player == player)
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// 1-based position in the waiting queue.
    pub async fn queue_position(&self, player: PlayerId) -> Option<usize> {
        self.queue
            .lock()
            .await
            .iter()
            .position(|entry| entry.player == player)
            .map(|idx| idx + 1)
    }

    /// One pass over the whole queue: disconnected entries are purged, then
    /// playable pairs are matched greedily in queue order.
    pub async fn sweep_all(&self) {
        let mut spent: Vec<JoinHandle<()>> = Vec::new();
        let pairs = {
            let mut queue = self.queue.lock().await;
            let now = Instant::now();

            queue.retain_mut(|entry| {
                if entry.handle.is_connected() {
                    return true;
                }
                if let Some(task) = entry.retry.take() {
                    spent.push(task);
                }
                info!("Purging disconnected player {} from the queue", entry.player);
                false
            });

            let mut taken: Vec<usize> = Vec::new();
            let mut pair_ids: Vec<(PlayerId, PlayerId)> = Vec::new();
            for i in 0..queue.len() {
                if taken.contains(&i) {
                    continue;
                }
                if let Some((j, gap)) = best_candidate(&queue, i, &taken, now) {
                    if self.acceptable(&queue[i], &queue[j], gap, now) {
                        taken.push(i);
                        taken.push(j);
                        let (first, second) = if i < j { (i, j) } else { (j, i) };
                        pair_ids.push((queue[first].player, queue[second].player));
                    }
                }
            }

            let mut pairs = Vec::new();
            for (a, b) in pair_ids {
                if let (Some(mut left), Some(mut right)) =
                    (take_entry(&mut queue, a), take_entry(&mut queue, b))
                {
                    if let Some(task) = left.retry.take() {
                        spent.push(task);
                    }
                    if let Some(task) = right.retry.take() {
                        spent.push(task);
                    }
                    pairs.push((left, right));
                }
            }
            pairs
        };

        for (left, right) in pairs {
            self.start_match(left, right).await;
        }

        // A sweep can be running on one of these very tasks, so the aborts
        // come last, after the matches exist and with no awaits left ahead
        for task in spent {
            task.abort();
        }
    }

    /// Tries to find an opponent for one freshly queued player.
    async fn try_pair(&self, player: PlayerId) -> bool {
        let pair = {
            let mut queue = self.queue.lock().await;
            let now = Instant::now();
            let me = match queue.iter().position(|entry| entry.player == player) {
                Some(idx) => idx,
                None => return false,
            };

            match best_candidate(&queue, me, &[me], now) {
                Some((idx, gap)) if self.acceptable(&queue[me], &queue[idx], gap, now) => {
                    let (first, second) = if idx < me { (idx, me) } else { (me, idx) };
                    let a = queue[first].player;
                    let b = queue[second].player;
                    match (take_entry(&mut queue, a), take_entry(&mut queue, b)) {
                        (Some(mut left), Some(mut right)) => {
                            // Pairing on enqueue runs on the new player's
                            // connection task, so the candidate's retry
                            // task can be aborted in place
                            if let Some(task) = left.retry.take() {
                                task.abort();
                            }
                            if let Some(task) = right.retry.take() {
                                task.abort();
                            }
                            Some((left, right))
                        }
                        _ => None,
                    }
                }
                _ => None,
            }
        };

        match pair {
            Some((left, right)) => {
                self.start_match(left, right).await;
                true
            }
            None => false,
        }
    }

    fn acceptable(&self, a: &QueueEntry, b: &QueueEntry, gap: f32, now: Instant) -> bool {
        if gap < self.threshold {
            return true;
        }
        let wait_a = now.duration_since(a.queued_at).as_secs_f32();
        let wait_b = now.duration_since(b.queued_at).as_secs_f32();
        wait_a.max(wait_b) > self.wait_ceiling.as_secs_f32()
    }

    async fn start_match(&self, left: QueueEntry, right: QueueEntry) {
        let match_id = format!(
            "match_{}_vs_{}_{}",
            left.player,
            right.player,
            epoch_millis()
        );
        let state = self
            .registry
            .create_match(
                &match_id,
                MatchKind::Ranked,
                (left.player, Arc::clone(&left.handle)),
                (right.player, Arc::clone(&right.handle)),
            )
            .await;

        left.handle.send(&ServerMessage::MatchCreated {
            match_id: match_id.clone(),
            side: Side::Left,
            opponent: state.right_player.name.clone(),
            game_state: state.clone(),
        });
        right.handle.send(&ServerMessage::MatchCreated {
            match_id: match_id.clone(),
            side: Side::Right,
            opponent: state.left_player.name.clone(),
            game_state: state,
        });
        info!(
            "Paired players {} and {} into {}",
            left.player, right.player, match_id
        );
    }

    async fn spawn_retry(&self, player: PlayerId, handle: SharedHandle) {
        let lobby = self.clone();
        let retry_handle = Arc::clone(&handle);
        let task = tokio::spawn(async move {
            lobby.run_retry(player, retry_handle).await;
        });

        let mut queue = self.queue.lock().await;
        match queue.iter_mut().find(|entry| entry.player == player) {
            Some(entry) => entry.retry = Some(task),
            // Paired in the meantime; the task has nothing left to do
            None => task.abort(),
        }
    }

    async fn run_retry(&self, player: PlayerId, handle: SharedHandle) {
        loop {
            tokio::time::sleep(Duration::from_secs(MATCHMAKING_SWEEP_SECS)).await;
            self.sweep_all().await;
            match self.queue_position(player).await {
                Some(position) => handle.send(&ServerMessage::MatchmakingUpdate {
                    queue_position: position,
                    message: format!("Still searching, position {} in queue", position),
                }),
                None => return,
            }
        }
    }
}

/// Best opponent for `queue[idx]` by wait-adjusted rating gap, skipping
/// already taken entries.
fn best_candidate(
    queue: &[QueueEntry],
    idx: usize,
    taken: &[usize],
    now: Instant,
) -> Option<(usize, f32)> {
    let rating = queue[idx].rating;
    let mut best: Option<(usize, f32)> = None;

    for (candidate, entry) in queue.iter().enumerate() {
        if candidate == idx || taken.contains(&candidate) {
            continue;
        }
        let wait = now.duration_since(entry.queued_at).as_secs_f32();
        let gap = adjusted_gap((rating - entry.rating).abs() as f32, wait);
        if best.map_or(true, |(_, best_gap)| gap < best_gap) {
            best = Some((candidate, gap));
        }
    }
    best
}
