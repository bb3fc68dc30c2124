//! Integration tests for the matchmaking, match loop and tournament stack
//!
//! These tests validate cross-component interactions and real network behavior.

use futures_util::{SinkExt, StreamExt};
use server::lobby::{adjusted_gap, Lobby};
use server::network::Gateway;
use server::participant::{ParticipantHandle, SharedHandle};
use server::profile::{
    InMemoryProfiles, MatchOutcome, MatchType, PlayerId, ProfileStore, ProfileUpdate,
};
use server::tournament::TournamentManager;
use shared::{ClientMessage, ServerMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests JSON round-trips for every client message variant
    #[test]
    fn client_message_round_trip() {
        let test_messages = vec![
            ClientMessage::Login {
                name: "alice".to_string(),
            },
            ClientMessage::FindMatch,
            ClientMessage::CancelMatchmaking,
            ClientMessage::PlayerInput { input: -1 },
            ClientMessage::JoinTournament,
            ClientMessage::LeaveTournament,
        ];

        for message in test_messages {
            let encoded = serde_json::to_string(&message).unwrap();
            let decoded: ClientMessage = serde_json::from_str(&encoded).unwrap();

            match (&message, &decoded) {
                (ClientMessage::Login { .. }, ClientMessage::Login { .. }) => {}
                (ClientMessage::FindMatch, ClientMessage::FindMatch) => {}
                (ClientMessage::CancelMatchmaking, ClientMessage::CancelMatchmaking) => {}
                (ClientMessage::PlayerInput { .. }, ClientMessage::PlayerInput { .. }) => {}
                (ClientMessage::JoinTournament, ClientMessage::JoinTournament) => {}
                (ClientMessage::LeaveTournament, ClientMessage::LeaveTournament) => {}
                _ => panic!("Message type mismatch after round trip"),
            }
        }
    }

    /// Tests that server messages carry their snake_case type tag
    #[test]
    fn server_message_type_tags() {
        let encoded = serde_json::to_string(&ServerMessage::GameOver {
            match_id: "match_1_vs_2_0".to_string(),
            winner: "alice".to_string(),
            message: "alice wins the match".to_string(),
            left_score: 3,
            right_score: 1,
        })
        .unwrap();
        assert!(encoded.contains(r#""type":"game_over""#));

        let encoded = serde_json::to_string(&ServerMessage::TournamentRankings {
            tournament_id: 1,
            rankings: vec![],
            complete: false,
        })
        .unwrap();
        assert!(encoded.contains(r#""type":"tournament_rankings""#));
        assert!(encoded.contains(r#""complete":false"#));
    }

    /// Tests malformed payload rejection
    #[test]
    fn malformed_messages_are_rejected() {
        let bad_payloads = vec![
            "",
            "not json",
            r#"{"type":"unknown_message"}"#,
            r#"{"type":"login"}"#,
            r#"{"type":"player_input"}"#,
        ];

        for payload in bad_payloads {
            let result: Result<ClientMessage, _> = serde_json::from_str(payload);
            assert!(result.is_err(), "Should reject payload: {}", payload);
        }
    }
}

/// LIVE CONNECTION TESTS
mod connection_tests {
    use super::*;

    /// Full session over real WebSockets: login, queue, pair and forfeit
    /// by dropping the connection.
    #[tokio::test]
    async fn websocket_login_matchmaking_and_forfeit() {
        let gateway = Gateway::new(240.0);
        let addr = spawn_gateway(&gateway).await;

        let mut alice_ws = connect(&addr).await;
        send(&mut alice_ws, &ClientMessage::Login { name: "alice".to_string() }).await;
        send(&mut alice_ws, &ClientMessage::FindMatch).await;

        let waiting = next_server_message(&mut alice_ws).await;
        match waiting {
            ServerMessage::Waiting { queue_position, .. } => assert_eq!(queue_position, 1),
            other => panic!("Expected a waiting message, got {:?}", other),
        }

        let mut bob_ws = connect(&addr).await;
        send(&mut bob_ws, &ClientMessage::Login { name: "bob".to_string() }).await;
        send(&mut bob_ws, &ClientMessage::FindMatch).await;

        let created =
            wait_for_message(&mut alice_ws, |m| matches!(m, ServerMessage::MatchCreated { .. }))
                .await;
        match created {
            ServerMessage::MatchCreated { side, opponent, .. } => {
                assert_eq!(side, shared::Side::Left);
                assert_eq!(opponent, "bob");
            }
            other => panic!("Expected a match created message, got {:?}", other),
        }
        wait_for_message(&mut bob_ws, |m| matches!(m, ServerMessage::MatchCreated { .. })).await;

        // Bob walks away mid-match
        bob_ws.close(None).await.unwrap();

        let game_over =
            wait_for_message(&mut alice_ws, |m| matches!(m, ServerMessage::GameOver { .. })).await;
        match game_over {
            ServerMessage::GameOver { winner, .. } => assert_eq!(winner, "alice"),
            other => panic!("Expected a game over message, got {:?}", other),
        }

        let alice = gateway.profiles().get_or_create("alice");
        let bob = gateway.profiles().get_or_create("bob");
        assert_eq!(gateway.profiles().profile(alice).unwrap().rating, 1016);
        assert_eq!(gateway.profiles().profile(bob).unwrap().rating, 979);
    }

    /// Messages before login are answered with an error over the socket
    #[tokio::test]
    async fn login_is_required_over_the_wire() {
        let gateway = Gateway::new(240.0);
        let addr = spawn_gateway(&gateway).await;

        let mut ws = connect(&addr).await;
        send(&mut ws, &ClientMessage::FindMatch).await;

        let reply = next_server_message(&mut ws).await;
        assert!(matches!(reply, ServerMessage::Error { .. }));
        ws.close(None).await.unwrap();
    }
}

/// MATCHMAKING INTEGRATION TESTS
mod matchmaking_tests {
    use super::*;

    /// Tests the wait-time discount applied to rating gaps
    #[test]
    fn adjusted_gap_shrinks_with_wait() {
        let raw = 200.0;
        let mut previous = adjusted_gap(raw, 0.0);
        for wait in [5.0_f32, 10.0, 20.0, 40.0, 80.0] {
            let gap = adjusted_gap(raw, wait);
            assert!(gap < previous, "Gap should shrink as wait grows");
            previous = gap;
        }
        // Ten seconds of waiting halves the effective gap
        assert!((adjusted_gap(raw, 10.0) - raw / 2.0).abs() < f32::EPSILON);
    }

    /// Distant ratings stay queued until the wait ceiling passes
    #[tokio::test]
    async fn distant_ratings_pair_only_after_the_ceiling() {
        let profiles = InMemoryProfiles::new();
        let lobby = Lobby::with_rules(
            Arc::new(profiles.clone()),
            200.0,
            18.0,
            Duration::from_millis(200),
        );
        let alice = profiles.get_or_create("alice");
        let bob = profiles.get_or_create("bob");
        set_rating(&profiles, bob, 2000);

        lobby.enqueue(alice, RecordingHandle::new()).await;
        lobby.enqueue(bob, RecordingHandle::new()).await;
        assert_eq!(lobby.queue_len().await, 2);

        lobby.sweep_all().await;
        assert_eq!(lobby.queue_len().await, 2, "Pair accepted before the ceiling");

        sleep(Duration::from_millis(250)).await;
        lobby.sweep_all().await;
        assert_eq!(lobby.queue_len().await, 0);
        assert_eq!(lobby.registry().active_matches().await, 1);
    }

    /// A gap just over the threshold becomes playable through waiting alone
    #[tokio::test]
    async fn moderate_gap_pairs_through_wait_decay() {
        let profiles = InMemoryProfiles::new();
        let lobby = Lobby::with_rules(
            Arc::new(profiles.clone()),
            200.0,
            18.0,
            Duration::from_secs(3600),
        );
        let alice = profiles.get_or_create("alice");
        let bob = profiles.get_or_create("bob");
        set_rating(&profiles, bob, 1020);

        lobby.enqueue(alice, RecordingHandle::new()).await;
        lobby.enqueue(bob, RecordingHandle::new()).await;
        assert_eq!(lobby.queue_len().await, 2, "Gap of twenty paired instantly");

        // After 1.2s the adjusted gap is 20 / 1.12, under the threshold
        sleep(Duration::from_millis(1200)).await;
        lobby.sweep_all().await;
        assert_eq!(lobby.queue_len().await, 0);
        assert_eq!(lobby.registry().active_matches().await, 1);
    }

    /// The per-player retry task keeps a lone waiter informed
    #[tokio::test]
    async fn waiting_player_receives_periodic_updates() {
        let profiles = InMemoryProfiles::new();
        let lobby = Lobby::new(Arc::new(profiles.clone()), 200.0);
        let alice = profiles.get_or_create("alice");
        let handle = RecordingHandle::new();

        lobby.enqueue(alice, Arc::clone(&handle) as SharedHandle).await;
        sleep(Duration::from_millis(2500)).await;

        let update = handle
            .sent()
            .into_iter()
            .find(|m| matches!(m, ServerMessage::MatchmakingUpdate { .. }));
        match update {
            Some(ServerMessage::MatchmakingUpdate { queue_position, .. }) => {
                assert_eq!(queue_position, 1)
            }
            other => panic!("Expected a matchmaking update, got {:?}", other),
        }
        assert!(lobby.cancel(alice).await);
    }
}

/// MATCH LOOP INTEGRATION TESTS
mod match_tests {
    use super::*;

    /// A full ranked match played to the win score. One player holds their
    /// paddle at the top of the court and concedes every serve.
    #[tokio::test]
    async fn ranked_match_plays_to_three_goals() {
        let profiles = InMemoryProfiles::new();
        let lobby = Lobby::new(Arc::new(profiles.clone()), 500.0);
        let alice = profiles.get_or_create("alice");
        let bob = profiles.get_or_create("bob");
        let alice_handle = RecordingHandle::new();
        let bob_handle = RecordingHandle::new();

        lobby.enqueue(alice, Arc::clone(&alice_handle) as SharedHandle).await;
        lobby.enqueue(bob, Arc::clone(&bob_handle) as SharedHandle).await;
        assert_eq!(lobby.registry().active_matches().await, 1);

        lobby.set_input(bob, -1).await;

        for _ in 0..600 {
            if lobby.registry().active_matches().await == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(lobby.registry().active_matches().await, 0, "Match never finished");

        let game_over = alice_handle
            .sent()
            .into_iter()
            .find(|m| matches!(m, ServerMessage::GameOver { .. }));
        match game_over {
            Some(ServerMessage::GameOver {
                winner,
                left_score,
                right_score,
                ..
            }) => {
                assert_eq!(winner, "alice");
                assert_eq!(left_score, shared::WIN_SCORE);
                assert_eq!(right_score, 0);
            }
            other => panic!("Expected a game over message, got {:?}", other),
        }

        let alice_profile = profiles.profile(alice).unwrap();
        let bob_profile = profiles.profile(bob).unwrap();
        assert_eq!(alice_profile.rating, 1016);
        assert_eq!(alice_profile.wins, 1);
        assert_eq!(bob_profile.rating, 984);
        assert_eq!(bob_profile.losses, 1);
        assert_eq!(bob_profile.history[0].match_type, MatchType::Regular);
        assert_eq!(bob_profile.history[0].outcome, MatchOutcome::Loss);
    }

    /// Broadcast states stay inside the court no matter the inputs
    #[tokio::test]
    async fn broadcast_states_stay_in_bounds() {
        let profiles = InMemoryProfiles::new();
        let lobby = Lobby::new(Arc::new(profiles.clone()), 500.0);
        let alice = profiles.get_or_create("alice");
        let bob = profiles.get_or_create("bob");
        let alice_handle = RecordingHandle::new();

        lobby.enqueue(alice, Arc::clone(&alice_handle) as SharedHandle).await;
        lobby.enqueue(bob, RecordingHandle::new()).await;

        // Jiggle both paddles while the match runs
        for round in 0..20 {
            let input = if round % 2 == 0 { 1 } else { -1 };
            lobby.set_input(alice, input).await;
            lobby.set_input(bob, -input).await;
            sleep(Duration::from_millis(10)).await;
        }

        let states: Vec<shared::GameState> = alice_handle
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::GameState { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert!(!states.is_empty());

        for state in states {
            assert!(state.ball.x > -25.0 && state.ball.x < shared::COURT_WIDTH + 25.0);
            assert!(state.ball.y > -25.0 && state.ball.y < shared::COURT_HEIGHT + 25.0);
            for paddle in [&state.left_paddle, &state.right_paddle] {
                assert!(paddle.y >= 0.0);
                assert!(paddle.y <= shared::COURT_HEIGHT - shared::PADDLE_HEIGHT);
            }
        }

        if let Some(match_id) = lobby.registry().binding(alice).await {
            lobby.registry().abort_match(&match_id).await;
        }
    }
}

/// TOURNAMENT INTEGRATION TESTS
mod tournament_tests {
    use super::*;

    /// A severed binding makes the match loop report a forfeit, which the
    /// manager turns into a bracket cancellation.
    #[tokio::test]
    async fn mid_match_disconnect_cancels_the_bracket() {
        let profiles = InMemoryProfiles::new();
        let manager = TournamentManager::new(Arc::new(profiles.clone()), 300.0);

        let mut players = Vec::new();
        let mut handles = Vec::new();
        for name in ["ann", "ben", "cal", "dan"] {
            let player = profiles.get_or_create(name);
            let handle = RecordingHandle::new();
            assert!(manager.join(player, Arc::clone(&handle) as SharedHandle).await);
            players.push(player);
            handles.push(handle);
        }
        assert_eq!(manager.registry().active_matches().await, 2);

        // Dan's connection dies; his semifinal loop notices the missing
        // binding and reports the forfeit over the results channel
        manager.registry().clear_binding(players[3]).await;

        for _ in 0..300 {
            if manager.active_brackets().await == 0 {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.active_brackets().await, 0, "Bracket never cancelled");
        assert_eq!(manager.registry().active_matches().await, 0);

        let cancelled = handles[0]
            .sent()
            .into_iter()
            .find(|m| matches!(m, ServerMessage::TournamentCancelled { .. }));
        match cancelled {
            Some(ServerMessage::TournamentCancelled {
                forfeiter,
                cancelled_match_ids,
                ..
            }) => {
                assert_eq!(forfeiter, players[3]);
                // Dan's own match already settled; only the other semifinal
                // was still running
                assert_eq!(cancelled_match_ids, vec!["tournament_1_semifinal1".to_string()]);
            }
            other => panic!("Expected a cancellation message, got {:?}", other),
        }

        let dan = profiles.profile(players[3]).unwrap();
        assert_eq!(dan.rating, 985);
        assert_eq!(dan.losses, 1);
        assert_eq!(dan.history[0].outcome, MatchOutcome::Forfeit);

        let ann = profiles.profile(players[0]).unwrap();
        assert_eq!(ann.rating, 1000);
        assert_eq!(ann.history[0].outcome, MatchOutcome::Cancelled);
        assert_eq!(ann.history[0].match_type, MatchType::CancelledTournament);
    }

    /// Seats free up again once a bracket is cancelled
    #[tokio::test]
    async fn cancelled_players_can_queue_for_ranked_play() {
        let profiles = InMemoryProfiles::new();
        let store: Arc<dyn ProfileStore> = Arc::new(profiles.clone());
        let manager = TournamentManager::new(Arc::clone(&store), 300.0);
        let lobby = Lobby::new(store, 300.0);

        let mut players = Vec::new();
        for name in ["ann", "ben", "cal", "dan"] {
            let player = profiles.get_or_create(name);
            assert!(manager.join(player, RecordingHandle::new()).await);
            players.push(player);
        }

        manager.handle_player_disconnect(players[0]).await;
        assert!(!manager.is_active_participant(players[1]).await);

        // Ben is free to play ranked matches again
        assert!(lobby.enqueue(players[1], RecordingHandle::new()).await);
        assert_eq!(lobby.queue_len().await, 1);
    }
}

// HELPER FUNCTIONS

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection stub recording everything sent to it.
struct RecordingHandle {
    messages: std::sync::Mutex<Vec<ServerMessage>>,
    connected: AtomicBool,
}

impl RecordingHandle {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: std::sync::Mutex::new(Vec::new()),
            connected: AtomicBool::new(true),
        })
    }

    fn sent(&self) -> Vec<ServerMessage> {
        self.messages.lock().unwrap().clone()
    }
}

impl ParticipantHandle for RecordingHandle {
    fn send(&self, message: &ServerMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }

    fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

fn set_rating(profiles: &InMemoryProfiles, player: PlayerId, rating: i32) {
    profiles.apply_result(
        player,
        ProfileUpdate {
            new_rating: rating,
            wins_delta: 0,
            losses_delta: 0,
            record: None,
        },
    );
}

/// Binds an ephemeral port, runs the gateway on it and returns its address.
async fn spawn_gateway(gateway: &Gateway) -> String {
    let reserved = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to reserve a port");
    let addr = reserved.local_addr().unwrap().to_string();
    drop(reserved);

    let server = gateway.clone();
    let server_addr = addr.clone();
    tokio::spawn(async move {
        let _ = server.run(&server_addr).await;
    });
    sleep(Duration::from_millis(100)).await;
    addr
}

async fn connect(addr: &str) -> WsClient {
    let (ws, _) = connect_async(format!("ws://{}", addr))
        .await
        .expect("Failed to connect to the gateway");
    ws
}

async fn send(ws: &mut WsClient, message: &ClientMessage) {
    let text = serde_json::to_string(message).unwrap();
    ws.send(Message::Text(text)).await.expect("Failed to send");
}

async fn next_server_message(ws: &mut WsClient) -> ServerMessage {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("Timed out waiting for a server message")
            .expect("Connection closed while waiting for a server message")
            .expect("Connection error while waiting for a server message");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("Unparseable server message");
        }
    }
}

async fn wait_for_message<F>(ws: &mut WsClient, predicate: F) -> ServerMessage
where
    F: Fn(&ServerMessage) -> bool,
{
    for _ in 0..5000 {
        let message = next_server_message(ws).await;
        if predicate(&message) {
            return message;
        }
    }
    panic!("Expected server message never arrived");
}
