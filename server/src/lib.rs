//! # Pong Server Library
//!
//! This library provides the authoritative server for competitive online
//! Pong: rating-based matchmaking, four-player tournaments and fixed-tick
//! match simulation over persistent WebSocket connections.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! Every match runs in its own fixed-tick loop on the server. Clients only
//! send a paddle direction; ball movement, paddle collisions, scoring and
//! win detection all happen here, and the resulting state is broadcast to
//! both players every tick.
//!
//! ### Matchmaking
//! A single waiting queue pairs players by rating. The acceptable rating
//! gap widens the longer a candidate has waited, and a wait ceiling
//! guarantees that nobody queues forever. A finished ladder match feeds an
//! Elo-style rating update, win/loss counters and a history record back
//! into the profile store.
//!
//! ### Tournaments
//! Four players fill a bracket: two semifinals run in parallel, then a
//! third-place match and the final. Placement rating changes apply only
//! once the whole bracket completes. A disconnect or walkout after the
//! bracket has started cancels it for everyone and penalizes the player
//! who left.
//!
//! ## Architecture Design
//!
//! ### One Loop per Match
//! Each match is driven by a dedicated task ticking at a fixed rate. The
//! loop task is the only writer of match state; input arrives through a
//! single locked entry point and is read once per tick. Severing a
//! player's match binding is how the rest of the server tells a loop that
//! a player is gone, which the loop turns into a forfeit on its next tick.
//!
//! ### Instance-Owned Registries
//! The matchmaking lobby and the tournament manager each own a private
//! match registry, so neither can reach into the other's matches. Bracket
//! matches report their outcomes over a channel; the match loop never
//! calls back into the tournament manager, which keeps the lock graph
//! acyclic.
//!
//! ### Persistent Connections
//! Every player holds one WebSocket connection for their whole session.
//! Messages are JSON with a `type` tag in both directions. Writers are
//! decoupled from game logic by an unbounded per-connection channel, so a
//! slow socket never blocks a match loop.
//!
//! ## Module Organization
//!
//! - [`engine`]: pure match simulation, one `step` per tick plus goal and
//!   win detection
//! - [`lobby`]: the matchmaking queue and its pairing rules
//! - [`network`]: WebSocket gateway, login handling and message dispatch
//! - [`participant`]: the outbound half of a connection behind a trait,
//!   so game logic never touches sockets
//! - [`profile`]: player identities, ratings, counters and match history
//! - [`rating`]: Elo arithmetic and tournament placement deltas
//! - [`session`]: the live match registry and the fixed-tick match loops
//! - [`tournament`]: bracket lifecycle from seating to final standings
//! - [`utils`]: small shared helpers
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::Gateway;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One gateway owns the lobby, the tournaments and the profiles.
//!     // Matches simulate at 50 ticks per second.
//!     let gateway = Gateway::new(50.0);
//!
//!     // Accept connections until the listener fails or the process dies.
//!     gateway.run("127.0.0.1:8080").await?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod lobby;
pub mod network;
pub mod participant;
pub mod profile;
pub mod rating;
pub mod session;
pub mod tournament;
pub mod utils;
