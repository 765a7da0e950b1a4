use std::fmt::Display;
use std::sync::Arc;

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::mpsc;
use warp::ws::{Message, WebSocket};

use crate::messages::{ChatLine, Envelope, EnvelopeError, InboundEvent, ServerMessage};
use crate::room::{Connection, RoomRegistry};
use crate::store::{Store, StoreError};

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Transport error: {message}")]
    Transport { message: String },
    #[error("Binary frames are not supported")]
    BinaryFrame,
    #[error("Malformed event: {0}")]
    Malformed(#[from] EnvelopeError),
    #[error("Failed to load room state: {0}")]
    Handshake(#[from] StoreError),
    #[error("Failed to encode server message: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RelayError {
    fn transport(e: impl Display) -> Self {
        Self::Transport {
            message: e.to_string(),
        }
    }
}

/// Shared state of the relay, handed to every connection task.
#[derive(Clone)]
pub struct Server {
    registry: RoomRegistry,
    store: Arc<dyn Store>,
}

impl Server {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Server {
            registry: RoomRegistry::new(),
            store,
        }
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Runs one client session in `room_id` until it disconnects or fails.
    ///
    /// The connection is registered before its room state is loaded, but its
    /// writer task only starts once the replay has been written to the socket.
    /// Live events broadcast in between wait in the outbound queue, so the
    /// client always sees history first.
    pub async fn handle_connection(&self, room_id: String, ws: WebSocket) {
        let (mut ws_tx, ws_rx) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let connection = Connection::new(tx);
        let connection_id = connection.id();

        self.registry.join(&room_id, connection).await;
        info!("Connection {connection_id} joined room {room_id}");

        if let Err(e) = self.replay(&room_id, &mut ws_tx).await {
            error!("Handshake failed for {connection_id} in room {room_id}: {e}");
            self.registry.leave(&room_id, connection_id).await;
            let _ = ws_tx.close().await;
            return;
        }

        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = ws_tx.send(message).await {
                    error!("Failed to send WebSocket message: {e}");
                    break;
                }
            }
            let _ = ws_tx.close().await;
        });

        match self.route_events(&room_id, ws_rx).await {
            Ok(()) => info!("Connection {connection_id} left room {room_id}"),
            Err(e) => error!("Connection {connection_id} in room {room_id} dropped: {e}"),
        }

        // Leaving drops the queue's only sender, which ends the writer.
        self.registry.leave(&room_id, connection_id).await;
        if let Err(e) = writer.await {
            error!("Writer task for {connection_id} failed: {e}");
        }
    }

    /// The one-off messages a newly joined connection receives: the saved
    /// snapshot, then the chat history, each only if there is one.
    pub async fn handshake_messages(&self, room_id: &str) -> Result<Vec<ServerMessage>, StoreError> {
        let (snapshot, history) = tokio::try_join!(
            self.store.get_snapshot(room_id),
            self.store.chat_history(room_id)
        )?;

        let mut messages = Vec::with_capacity(2);
        if let Some(snapshot) = snapshot {
            messages.push(ServerMessage::Snapshot(snapshot.image_data));
        }
        if !history.is_empty() {
            messages.push(ServerMessage::ChatHistory(
                history.into_iter().map(ChatLine::from).collect(),
            ));
        }
        Ok(messages)
    }

    async fn replay<S>(&self, room_id: &str, sink: &mut S) -> Result<(), RelayError>
    where
        S: Sink<Message> + Unpin,
        S::Error: Display,
    {
        for message in self.handshake_messages(room_id).await? {
            sink.send(message.to_ws()?)
                .await
                .map_err(RelayError::transport)?;
        }
        Ok(())
    }

    /// Processes inbound frames until the client closes the stream.
    ///
    /// Returns an error for transport failures and malformed frames; the
    /// caller is responsible for leaving the room either way.
    pub async fn route_events<S, E>(&self, room_id: &str, mut incoming: S) -> Result<(), RelayError>
    where
        S: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        while let Some(result) = incoming.next().await {
            let message = result.map_err(RelayError::transport)?;
            if message.is_close() {
                return Ok(());
            }
            if message.is_binary() {
                return Err(RelayError::BinaryFrame);
            }
            // ping / pong
            let Ok(text) = message.to_str() else {
                continue;
            };

            let envelope = Envelope::parse(text)?;
            self.dispatch(room_id, envelope).await;
        }
        Ok(())
    }

    /// Persists the event if it is a chat line, then echoes it verbatim to
    /// the whole room. Returns the number of connections it was queued for.
    ///
    /// A failed chat write is logged and the event is still broadcast.
    pub async fn dispatch(&self, room_id: &str, envelope: Envelope) -> usize {
        match envelope.event() {
            InboundEvent::Chat(line) => {
                if let Err(e) = self
                    .store
                    .append_chat_message(room_id, &line.user, &line.text)
                    .await
                {
                    warn!("Chat message in room {room_id} was not saved: {e}");
                }
            }
            InboundEvent::Opaque { kind } => {
                debug!(
                    "Relaying {} event in room {room_id}",
                    kind.as_deref().unwrap_or("untyped")
                );
            }
        }

        self.registry
            .broadcast(room_id, &Message::text(envelope.into_raw()))
            .await
    }
}
