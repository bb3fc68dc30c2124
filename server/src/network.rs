//! WebSocket gateway accepting player connections and routing their messages

use crate::lobby::Lobby;
use crate::participant::{SharedHandle, WsParticipant};
use crate::profile::{InMemoryProfiles, PlayerId, ProfileStore};
use crate::tournament::TournamentManager;
use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use shared::{ClientMessage, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{accept_async, WebSocketStream};

/// Paddle input is a direction sign; anything else is dropped.
fn valid_input(input: i32) -> bool {
    (-1..=1).contains(&input)
}

/// Front door of the server: owns the profile store, the matchmaking lobby
/// and the tournament manager, and drives one task per connection.
#[derive(Clone)]
pub struct Gateway {
    lobby: Lobby,
    tournaments: TournamentManager,
    profiles: InMemoryProfiles,
}

impl Gateway {
    pub fn new(tick_rate: f32) -> Self {
        let profiles = InMemoryProfiles::new();
        let store: Arc<dyn ProfileStore> = Arc::new(profiles.clone());
        Self {
            lobby: Lobby::new(Arc::clone(&store), tick_rate),
            tournaments: TournamentManager::new(store, tick_rate),
            profiles,
        }
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn tournaments(&self) -> &TournamentManager {
        &self.tournaments
    }

    pub fn profiles(&self) -> &InMemoryProfiles {
        &self.profiles
    }

    /// Accept loop. Runs until the listener fails.
    pub async fn run(&self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(addr).await?;
        info!("Server listening on {}", addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            let gateway = self.clone();
            tokio::spawn(async move {
                if let Err(e) = gateway.handle_connection(stream, peer).await {
                    debug!("Connection from {} ended with error: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), WsError> {
        let ws = accept_async(stream).await?;
        info!("New connection from {}", peer);
        let (mut outgoing, mut incoming) = ws.split();

        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if outgoing.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let participant = Arc::new(WsParticipant::new(tx.clone()));
        let handle: SharedHandle = Arc::clone(&participant) as SharedHandle;
        let mut player: Option<PlayerId> = None;

        let result = self.drive_session(&mut incoming, &tx, &handle, &mut player).await;

        // Teardown runs on every exit path, clean close or not
        participant.mark_disconnected();
        match player {
            Some(player) => {
                info!("Player {} disconnected", player);
                self.lobby.handle_disconnect(player).await;
                self.tournaments.handle_player_disconnect(player).await;
            }
            None => info!("Connection from {} closed before login", peer),
        }
        writer.abort();
        result
    }

    async fn drive_session(
        &self,
        incoming: &mut SplitStream<WebSocketStream<TcpStream>>,
        tx: &mpsc::UnboundedSender<Message>,
        handle: &SharedHandle,
        player: &mut Option<PlayerId>,
    ) -> Result<(), WsError> {
        while let Some(frame) = incoming.next().await {
            match frame? {
                Message::Text(text) => self.dispatch(&text, handle, player).await,
                Message::Ping(payload) => {
                    let _ = tx.send(Message::Pong(payload));
                }
                Message::Close(_) => return Ok(()),
                _ => {}
            }
        }
        Ok(())
    }

    /// One client message. Everything except login requires a logged-in
    /// player, and matchmaking and tournaments exclude each other.
    async fn dispatch(&self, text: &str, handle: &SharedHandle, player: &mut Option<PlayerId>) {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                debug!("Unparseable client message: {}", e);
                handle.send(&ServerMessage::Error {
                    message: "Invalid message".to_string(),
                });
                return;
            }
        };

        match (message, *player) {
            (ClientMessage::Login { name }, None) => {
                let id = self.profiles.get_or_create(&name);
                *player = Some(id);
                info!("Player {} logged in as {}", id, name);
            }
            (ClientMessage::Login { .. }, Some(_)) => {
                handle.send(&ServerMessage::Error {
                    message: "Already logged in".to_string(),
                });
            }
            (_, None) => {
                handle.send(&ServerMessage::Error {
                    message: "Log in first".to_string(),
                });
            }
            (ClientMessage::FindMatch, Some(id)) => {
                if self.tournaments.is_active_participant(id).await {
                    handle.send(&ServerMessage::Error {
                        message: "Leave the tournament before queueing for a match".to_string(),
                    });
                } else {
                    self.lobby.enqueue(id, Arc::clone(handle)).await;
                }
            }
            (ClientMessage::CancelMatchmaking, Some(id)) => {
                self.lobby.cancel(id).await;
                handle.send(&ServerMessage::MatchmakingCancelled {
                    message: "Matchmaking cancelled".to_string(),
                });
            }
            (ClientMessage::PlayerInput { input }, Some(id)) => {
                if !valid_input(input) {
                    debug!("Dropping out of range input {} from player {}", input, id);
                    return;
                }
                if !self.lobby.set_input(id, input).await {
                    self.tournaments.set_input(id, input).await;
                }
            }
            (ClientMessage::JoinTournament, Some(id)) => {
                if self.lobby.is_busy(id).await {
                    handle.send(&ServerMessage::Error {
                        message: "Finish matchmaking before joining a tournament".to_string(),
                    });
                } else {
                    self.tournaments.join(id, Arc::clone(handle)).await;
                }
            }
            (ClientMessage::LeaveTournament, Some(id)) => {
                self.tournaments.leave(id, Arc::clone(handle)).await;
            }
        }
    }
}
