//! Connection handles decoupling game logic from the transport

use log::{debug, warn};
use shared::ServerMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Best-effort outbound channel to one connected player.
///
/// The lobby, match loops and tournament manager hold these instead of
/// sockets: sends never block and never fail the caller, and liveness can
/// be checked without touching the network stack.
pub trait ParticipantHandle: Send + Sync {
    /// Queues a message for delivery. Failures are logged, never returned.
    fn send(&self, message: &ServerMessage);
    /// Asks the transport to close the connection.
    fn close(&self);
    fn is_connected(&self) -> bool;
}

pub type SharedHandle = Arc<dyn ParticipantHandle>;

/// WebSocket-backed handle feeding the connection's writer task.
pub struct WsParticipant {
    outbound: mpsc::UnboundedSender<Message>,
    connected: AtomicBool,
}

impl WsParticipant {
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            outbound,
            connected: AtomicBool::new(true),
        }
    }

    /// Flags the connection as gone so later sends become no-ops.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl ParticipantHandle for WsParticipant {
    fn send(&self, message: &ServerMessage) {
        if !self.is_connected() {
            return;
        }

        match serde_json::to_string(message) {
            Ok(text) => {
                if self.outbound.send(Message::Text(text)).is_err() {
                    debug!("Writer task gone, marking participant disconnected");
                    self.mark_disconnected();
                }
            }
            Err(e) => warn!("Failed to encode server message: {}", e),
        }
    }

    fn close(&self) {
        let _ = self.outbound.send(Message::Close(None));
        self.mark_disconnected();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
