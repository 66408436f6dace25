use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lineup_core::{GameError, PlayerName};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::ServerMessage;

/// Per-sink buffer depth. A client that falls this far behind is dropped
/// rather than allowed to stall anyone else.
pub const SINK_BUFFER: usize = 32;

/// Identifies one registered sink; returned by `register`, consumed by
/// `unregister`.
#[derive(Debug)]
pub struct SinkHandle {
    player: PlayerName,
    id: u64,
}

/// Per-session fan-out of server messages to every live connection of every
/// player. A player may hold any number of sinks (multiple devices/tabs).
#[derive(Debug, Default)]
pub struct BroadcastHub {
    sinks: Mutex<HashMap<PlayerName, HashMap<u64, mpsc::Sender<ServerMessage>>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    /// Gives a joined player an (initially empty) connection set.
    pub fn add_player(&self, name: &str) {
        self.sinks
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
    }

    /// Creates a new sink for an existing player. Names that never joined
    /// the session are rejected.
    pub fn register(
        &self,
        player: &str,
    ) -> Result<(SinkHandle, mpsc::Receiver<ServerMessage>), GameError> {
        let mut sinks = self.sinks.lock().unwrap();
        let per_player = sinks.get_mut(player).ok_or(GameError::UnknownMember)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(SINK_BUFFER);
        per_player.insert(id, tx);
        Ok((
            SinkHandle {
                player: player.to_string(),
                id,
            },
            rx,
        ))
    }

    /// Idempotent; unregistering a sink that is already gone is a no-op.
    pub fn unregister(&self, handle: &SinkHandle) {
        if let Some(per_player) = self.sinks.lock().unwrap().get_mut(&handle.player) {
            per_player.remove(&handle.id);
        }
    }

    /// Non-blocking delivery to every sink, FIFO per sink. Sinks whose
    /// buffer is full or whose receiver is gone are disconnected on the spot.
    pub fn broadcast(&self, message: &ServerMessage) {
        let mut sinks = self.sinks.lock().unwrap();
        for per_player in sinks.values_mut() {
            per_player.retain(|_, tx| match tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => false,
            });
        }
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.lock().unwrap().values().map(HashMap::len).sum()
    }
}
