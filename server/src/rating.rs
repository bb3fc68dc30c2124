//! Elo arithmetic for ranked duels and tournament placements

/// K-factor applied to every head-to-head settlement.
pub const K_FACTOR: f64 = 32.0;
/// Extra points taken from a player who forfeits a ranked match.
pub const FORFEIT_PENALTY: i32 = 5;
/// Flat deduction for abandoning a running tournament.
pub const ABANDON_PENALTY: i32 = 15;

/// Expected score of a player against an opponent, between 0 and 1.
pub fn expected_score(own: i32, other: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((other - own) as f64 / 400.0))
}

/// New ratings after a decided duel: `(winner, loser)` in, `(winner, loser)` out.
pub fn settle_duel(winner: i32, loser: i32) -> (i32, i32) {
    let new_winner = (winner as f64 + K_FACTOR * (1.0 - expected_score(winner, loser))).round();
    let new_loser = (loser as f64 + K_FACTOR * (0.0 - expected_score(loser, winner))).round();
    (new_winner as i32, new_loser as i32)
}

/// Forfeits settle like a normal loss plus a flat penalty on the forfeiter.
pub fn settle_forfeit(winner: i32, loser: i32) -> (i32, i32) {
    let (new_winner, new_loser) = settle_duel(winner, loser);
    (new_winner, new_loser - FORFEIT_PENALTY)
}

/// Fixed rating delta for finishing a four-player tournament in `place` (1-4).
pub fn placement_delta(place: u32) -> i32 {
    match place {
        1 => (K_FACTOR * 0.7) as i32 + 15,
        2 => (K_FACTOR * 0.3) as i32 + 5,
        3 => (K_FACTOR * 0.1) as i32,
        _ => -3,
    }
}

/// Rating after the tournament-abandon penalty, floored at zero.
pub fn abandon_rating(rating: i32) -> i32 {
    (rating - ABANDON_PENALTY).max(0)
}
