//! Relay server: one task per TCP connection
//!
//! Each connection gets a [`SessionId`] and a bounded outbox registered with
//! the [`RoomRegistry`]. The task multiplexes inbound frames, outbox events
//! and the shutdown signal, and always deregisters the session on exit.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::codec::Framed;

use crate::config::ServerConfig;
use crate::error::{NetworkError, ProtocolError};
use crate::network::tune_stream;
use crate::network::wire::{decode_event, FrameCodec};
use crate::protocol::{validate_voice, ClientEvent, ServerEvent, SessionId};
use crate::rooms::RoomRegistry;

/// How long `serve` waits for connection tasks after shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Connection-level counters
#[derive(Debug, Default)]
pub struct ServerCounters {
    accepted: AtomicU64,
    active: AtomicU64,
    malformed: AtomicU64,
}

impl ServerCounters {
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    /// Frames dropped because they did not parse or failed validation
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    outbox_capacity: usize,
    max_frame_size: usize,
}

/// TCP relay for room-scoped voice and chat
pub struct RelayServer {
    config: ServerConfig,
    registry: Arc<RoomRegistry>,
    counters: Arc<ServerCounters>,
}

impl RelayServer {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.echo_chat));
        Self {
            config,
            registry,
            counters: Arc::new(ServerCounters::default()),
        }
    }

    pub fn registry(&self) -> Arc<RoomRegistry> {
        self.registry.clone()
    }

    pub fn counters(&self) -> Arc<ServerCounters> {
        self.counters.clone()
    }

    pub async fn bind(&self) -> Result<TcpListener, NetworkError> {
        let addr = self.config.relay_address();
        TcpListener::bind(&addr)
            .await
            .map_err(|e| NetworkError::BindFailed(format!("{}: {}", addr, e)))
    }

    /// Accept connections until `shutdown` turns true, then wait briefly for
    /// connection tasks to deregister their sessions.
    pub async fn serve(
        &self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), NetworkError> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "Relay server listening");
        }

        let settings = ConnectionSettings {
            outbox_capacity: self.config.outbox_capacity.max(1),
            max_frame_size: self.config.max_frame_size,
        };
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                        tasks.spawn(handle_connection(
                            stream,
                            peer,
                            self.registry.clone(),
                            self.counters.clone(),
                            settings,
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Accept failed");
                    }
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(connections = tasks.len(), "Relay server shutting down");
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("Connection tasks did not finish in time, aborting");
            tasks.abort_all();
        }
        Ok(())
    }

    /// Bind and serve
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), NetworkError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown).await
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<RoomRegistry>,
    counters: Arc<ServerCounters>,
    settings: ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let id = SessionId::new();
    tune_stream(&stream);
    counters.active.fetch_add(1, Ordering::Relaxed);
    tracing::info!(session = %id, %peer, "Connection opened");

    let (outbox, mut outbox_rx) = mpsc::channel::<ServerEvent>(settings.outbox_capacity);
    registry.connect(id, outbox);
    let mut framed = Framed::new(stream, FrameCodec::with_max_size(settings.max_frame_size));

    loop {
        tokio::select! {
            frame = framed.next() => match frame {
                Some(Ok(payload)) => {
                    let handled = decode_event::<ClientEvent>(&payload)
                        .and_then(|event| dispatch(&registry, id, event));
                    if let Err(e) = handled {
                        counters.malformed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(session = %id, error = %e, "Dropped inbound frame");
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!(session = %id, error = %e, "Frame read error");
                    break;
                }
                None => {
                    tracing::info!(session = %id, "Connection closed by peer");
                    break;
                }
            },
            Some(event) = outbox_rx.recv() => {
                if let Err(e) = framed.send(event).await {
                    tracing::warn!(session = %id, error = %e, "Send failed");
                    break;
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    registry.disconnect(id);
    counters.active.fetch_sub(1, Ordering::Relaxed);
    tracing::info!(session = %id, "Connection task finished");
}

/// Apply one client event to the registry
fn dispatch(registry: &RoomRegistry, id: SessionId, event: ClientEvent) -> Result<(), ProtocolError> {
    match event {
        ClientEvent::Join { name, room_code } => {
            if let Err(e) = registry.join(id, &room_code, &name) {
                tracing::warn!(session = %id, error = %e, "Join rejected");
            }
        }
        ClientEvent::Voice(samples) => {
            validate_voice(&samples)?;
            registry.route_voice(id, samples);
        }
        // Sender is stamped from the session, never trusted from the client.
        ClientEvent::ChatMessage(message) => {
            registry.route_chat(id, message.text);
        }
        ClientEvent::Leave => {
            registry.leave(id);
        }
    }
    Ok(())
}
