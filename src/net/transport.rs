//! WebSocket server
//!
//! One task pair per socket: the reader decodes frames and drives the
//! session, the writer drains the connection's outbox. A client that
//! sends binary frames gets binary (bincode) replies, everyone else JSON.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ServerConfig;
use crate::game::clock::unix_time_ms;
use crate::game::engine::Cast;
use crate::game::player::PlayerId;
use crate::metrics::Metrics;
use crate::net::dos_protection::{ConnectionId, DoSConfig, DoSProtection};
use crate::net::game_session::{outbox, Outbox, SharedSession};
use crate::net::protocol::{decode, decode_json, encode, encode_json, ClientMessage, ServerMessage};

/// WebSocket game server
pub struct FishingServer {
    config: ServerConfig,
    dos_protection: Arc<RwLock<DoSProtection>>,
    game_session: SharedSession,
    metrics: Arc<Metrics>,
}

impl FishingServer {
    pub fn new(config: ServerConfig, game_session: SharedSession, metrics: Arc<Metrics>) -> Self {
        let dos_protection = Arc::new(RwLock::new(DoSProtection::new(DoSConfig::for_players(
            config.max_players,
        ))));

        Self {
            config,
            dos_protection,
            game_session,
            metrics,
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.config.socket_addr()
    }

    /// Bind and run the server
    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr()).await?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self, listener: TcpListener) -> anyhow::Result<()> {
        tracing::info!("WebSocket server listening on ws://{}/", listener.local_addr()?);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                    continue;
                }
            };

            let dos = self.dos_protection.clone();
            let game_session = self.game_session.clone();
            let metrics = self.metrics.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer, dos, game_session, metrics).await {
                    tracing::debug!("Connection error from {}: {}", peer, e);
                }
            });
        }
    }
}

/// Handle a single socket from accept to disconnect
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    dos_protection: Arc<RwLock<DoSProtection>>,
    game_session: SharedSession,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()> {
    let client_ip = peer.ip();

    let connection_id = {
        let mut dos = dos_protection.write().await;
        match dos.register_connection(client_ip) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Connection from {} rejected: {}", peer, e);
                return Ok(());
            }
        }
    };

    metrics.connections_active.fetch_add(1, Ordering::Relaxed);
    let result = run_socket(stream, connection_id, &dos_protection, &game_session, &metrics).await;
    metrics.connections_active.fetch_sub(1, Ordering::Relaxed);

    dos_protection
        .write()
        .await
        .unregister_connection(connection_id, client_ip);

    tracing::debug!("Connection closed (conn_id: {})", connection_id);
    result
}

async fn run_socket(
    stream: TcpStream,
    connection_id: ConnectionId,
    dos_protection: &Arc<RwLock<DoSProtection>>,
    game_session: &SharedSession,
    metrics: &Arc<Metrics>,
) -> anyhow::Result<()> {
    #[cfg(feature = "dos_ratelimit")]
    use crate::net::dos_protection::DoSError;
    #[cfg(not(feature = "dos_ratelimit"))]
    let _ = dos_protection;

    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    tracing::debug!("WebSocket accepted (conn_id: {})", connection_id);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbox_tx, mut outbox_rx) = outbox();
    let binary = Arc::new(AtomicBool::new(false));

    let writer_binary = binary.clone();
    let writer_metrics = metrics.clone();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            let frame = match frame_for(&message, writer_binary.load(Ordering::Relaxed)) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!("Failed to encode {}: {}", message.event_name(), e);
                    continue;
                }
            };
            let len = frame.len();
            if ws_sender.send(frame).await.is_err() {
                break;
            }
            writer_metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
            writer_metrics.bytes_sent.fetch_add(len as u64, Ordering::Relaxed);
        }
        let _ = ws_sender.close().await;
    });

    let mut player_id: Option<PlayerId> = None;

    while let Some(frame) = ws_receiver.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!("WebSocket read error (conn_id: {}): {}", connection_id, e);
                break;
            }
        };

        // Control frames are answered by tungstenite itself
        if frame.is_close() {
            break;
        }
        if !(frame.is_text() || frame.is_binary()) {
            continue;
        }

        let size = frame.len();
        metrics.messages_received.fetch_add(1, Ordering::Relaxed);
        metrics.bytes_received.fetch_add(size as u64, Ordering::Relaxed);

        #[cfg(feature = "dos_ratelimit")]
        {
            let mut dos = dos_protection.write().await;
            match dos.check_message(connection_id, size) {
                Ok(()) => {}
                Err(DoSError::ViolationLimitExceeded) => {
                    tracing::warn!("Too many violations, disconnecting conn_id: {}", connection_id);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Dropped frame from conn_id {}: {}", connection_id, e);
                    continue;
                }
            }
        }

        let decoded = match frame {
            Message::Text(text) => decode_json::<ClientMessage>(&text),
            Message::Binary(data) => {
                binary.store(true, Ordering::Relaxed);
                decode::<ClientMessage>(&data)
            }
            _ => continue,
        };

        let message = match decoded {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!("Failed to decode client message: {}", e);
                continue;
            }
        };

        handle_message(message, &mut player_id, &outbox_tx, game_session).await;
    }

    // Disconnect is an implicit stop
    if let Some(pid) = player_id {
        tracing::debug!("Player {} disconnected, removing from island", pid);
        let angler = game_session.write().await.remove_player(pid);
        if let Some(angler) = angler {
            angler.shutdown().await;
        }
    }

    drop(outbox_tx);
    let _ = writer.await;
    Ok(())
}

fn frame_for(message: &ServerMessage, binary: bool) -> Result<Message, crate::net::protocol::EncodeError> {
    if binary {
        encode(message).map(Message::Binary)
    } else {
        encode_json(message).map(Message::Text)
    }
}

fn reply(outbox: &Outbox, message: ServerMessage) {
    if let Err(e) = outbox.try_send(message) {
        tracing::debug!("Failed to queue reply: {}", e);
    }
}

/// Apply one client message to the session
pub async fn handle_message(
    message: ClientMessage,
    player_id: &mut Option<PlayerId>,
    outbox: &Outbox,
    game_session: &SharedSession,
) {
    // Only join and ping make sense before joining
    let pid = match (&message, *player_id) {
        (ClientMessage::PlayerJoin { name }, None) => {
            let joined = game_session.write().await.add_player(name, outbox.clone());
            match joined {
                Ok(id) => *player_id = Some(id),
                Err(e) => {
                    tracing::warn!("Rejecting player '{}': {}", name, e);
                    reply(outbox, ServerMessage::JoinRejected { reason: e.to_string() });
                }
            }
            return;
        }
        (ClientMessage::PlayerJoin { .. }, Some(id)) => {
            tracing::debug!("Player {} sent a second join", id);
            reply(
                outbox,
                ServerMessage::Warning {
                    message: "Already joined".to_string(),
                },
            );
            return;
        }
        (ClientMessage::Ping { timestamp }, _) => {
            reply(
                outbox,
                ServerMessage::Pong {
                    client_timestamp: *timestamp,
                    server_timestamp: unix_time_ms(),
                },
            );
            return;
        }
        (_, None) => {
            tracing::debug!("Ignoring message before join");
            return;
        }
        (_, Some(id)) => id,
    };

    match message {
        ClientMessage::PlayerUpdate {
            position,
            action,
            rotation,
        } => {
            game_session
                .write()
                .await
                .update_pose(pid, position, action, rotation);
        }
        ClientMessage::StartFishing {
            position,
            direction,
        } => {
            game_session
                .read()
                .await
                .start_fishing(pid, Cast { position, direction });
        }
        ClientMessage::StopFishing {} => {
            game_session.read().await.stop_fishing(pid);
        }
        ClientMessage::FishCaught { fish } => {
            game_session.read().await.report_catch(pid, fish);
        }
        ClientMessage::PlayerJoin { .. } | ClientMessage::Ping { .. } => {}
    }
}
