//! Relay client
//!
//! The socket lives on a dedicated thread running a single-threaded tokio
//! runtime. Everything else talks to it through the boundary queues:
//!
//! ```text
//!  capture ─► audio_out ─► [audio sender] ─┐
//!  UI ──────► chat_out ──► [chat sender] ──┼─► session ═══ TCP ═══ relay
//!                                          │
//!  playback ◄─ [voice rx] ◄─ audio_in ◄────┤
//!  UI ◄─────── [chat rx] ◄── chat_in ◄─────┤
//!  UI ◄─────── [presence rx] ◄─ presence_in┘
//! ```
//!
//! A lost connection is retried forever with a fixed delay. Events emitted
//! while offline are dropped.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::net::TcpStream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::codec::Framed;

use crate::audio::buffer::AudioFrame;
use crate::audio::pipeline::FrameSink;
use crate::config::{ClientConfig, QueueConfig};
use crate::error::NetworkError;
use crate::network::tune_stream;
use crate::network::wire::{decode_event, FrameCodec};
use crate::protocol::{validate_voice, ChatMessage, ClientEvent, PresenceEvent, ServerEvent};
use crate::rooms::RosterView;
use crate::transport::{client_boundary, join_with_timeout, QueueConsumer, QueueProducer, StopSignal};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Receives inbound traffic on the client's receiver threads
pub trait RelayHandler: Send + Sync + 'static {
    fn on_voice(&self, samples: Vec<f32>);
    fn on_chat(&self, message: ChatMessage);
    fn on_presence(&self, event: PresenceEvent);
}

/// Client-side traffic counters
#[derive(Debug, Default)]
pub struct ClientStats {
    voice_sent: AtomicU64,
    chat_sent: AtomicU64,
    offline_dropped: AtomicU64,
    backpressure_dropped: AtomicU64,
    malformed_dropped: AtomicU64,
    voice_received: AtomicU64,
    connects: AtomicU64,
}

impl ClientStats {
    pub fn voice_sent(&self) -> u64 {
        self.voice_sent.load(Ordering::Relaxed)
    }

    pub fn chat_sent(&self) -> u64 {
        self.chat_sent.load(Ordering::Relaxed)
    }

    /// Outbound events discarded because no session was open
    pub fn offline_dropped(&self) -> u64 {
        self.offline_dropped.load(Ordering::Relaxed)
    }

    /// Outbound events discarded because the session writer was behind
    pub fn backpressure_dropped(&self) -> u64 {
        self.backpressure_dropped.load(Ordering::Relaxed)
    }

    pub fn malformed_dropped(&self) -> u64 {
        self.malformed_dropped.load(Ordering::Relaxed)
    }

    pub fn voice_received(&self) -> u64 {
        self.voice_received.load(Ordering::Relaxed)
    }

    /// Successful connections, including reconnects
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::Relaxed)
    }
}

/// State shared between the caller, the worker loops and the network thread
struct Shared {
    state: Mutex<ConnectionState>,
    /// Writer queue of the open session, `None` while offline
    session: Mutex<Option<mpsc::Sender<ClientEvent>>>,
    stats: ClientStats,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.lock();
        if *current != state {
            tracing::debug!(from = ?*current, to = ?state, "Connection state changed");
            *current = state;
        }
    }

    /// Hand an event to the session writer without blocking
    fn emit(&self, event: ClientEvent) -> bool {
        let session = self.session.lock();
        let result = match session.as_ref() {
            Some(tx) => tx.try_send(event),
            None => Err(TrySendError::Closed(event)),
        };
        match result {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.stats.backpressure_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.stats.offline_dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }
}

struct Inbound {
    audio_in: QueueProducer<Vec<f32>>,
    chat_in: QueueProducer<ChatMessage>,
    presence_in: QueueProducer<PresenceEvent>,
}

/// Queues handed to the worker threads on `start`
struct Pending {
    audio_out: QueueConsumer<AudioFrame>,
    chat_out: QueueConsumer<String>,
    audio_in: QueueConsumer<Vec<f32>>,
    chat_in: QueueConsumer<ChatMessage>,
    presence_in: QueueConsumer<PresenceEvent>,
    inbound: Inbound,
}

/// Long-lived connection to the relay server
pub struct RelayClient {
    config: ClientConfig,
    audio_out: QueueProducer<AudioFrame>,
    chat_out: QueueProducer<String>,
    shared: Arc<Shared>,
    pending: Option<Pending>,
    loops_stop: StopSignal,
    network_stop: StopSignal,
    workers: Vec<JoinHandle<()>>,
    network: Option<JoinHandle<()>>,
}

impl RelayClient {
    pub fn new(config: ClientConfig, queues: &QueueConfig) -> Self {
        let (app, net) = client_boundary(queues);
        Self {
            config,
            audio_out: app.audio_out,
            chat_out: app.chat_out,
            shared: Arc::new(Shared {
                state: Mutex::new(ConnectionState::Disconnected),
                session: Mutex::new(None),
                stats: ClientStats::default(),
            }),
            pending: Some(Pending {
                audio_out: net.audio_out,
                chat_out: net.chat_out,
                audio_in: app.audio_in,
                chat_in: app.chat_in,
                presence_in: app.presence_in,
                inbound: Inbound {
                    audio_in: net.audio_in,
                    chat_in: net.chat_in,
                    presence_in: net.presence_in,
                },
            }),
            loops_stop: StopSignal::new(),
            network_stop: StopSignal::new(),
            workers: Vec::new(),
            network: None,
        }
    }

    /// Spawn the network thread and the boundary loops
    pub fn start(&mut self, handler: Arc<dyn RelayHandler>) -> Result<(), NetworkError> {
        let Some(pending) = self.pending.take() else {
            return Err(NetworkError::Runtime("relay client already started".into()));
        };

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| NetworkError::Runtime(e.to_string()))?;

        let session = SessionContext {
            config: self.config.clone(),
            shared: self.shared.clone(),
            inbound: pending.inbound,
            stop: self.network_stop.clone(),
        };
        self.network = Some(
            thread::Builder::new()
                .name("relay-net".into())
                .spawn(move || runtime.block_on(session.run()))
                .map_err(|e| NetworkError::Runtime(e.to_string()))?,
        );

        let display_name = self.config.display_name.clone();
        let shared = self.shared.clone();
        let stop = self.loops_stop.clone();
        let audio_out = pending.audio_out;
        self.spawn_worker("relay-audio-tx", move || {
            while !stop.is_stopped() {
                if let Some(frame) = audio_out.poll() {
                    if shared.emit(ClientEvent::Voice(frame.into_samples())) {
                        shared.stats.voice_sent.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            audio_out.drain();
        })?;

        let shared = self.shared.clone();
        let stop = self.loops_stop.clone();
        let chat_out = pending.chat_out;
        let send_chat = move |shared: &Arc<Shared>, text: String| {
            let message = ChatMessage::new(display_name.clone(), text);
            if shared.emit(ClientEvent::ChatMessage(message)) {
                shared.stats.chat_sent.fetch_add(1, Ordering::Relaxed);
            }
        };
        self.spawn_worker("relay-chat-tx", move || {
            while !stop.is_stopped() {
                if let Some(text) = chat_out.poll() {
                    send_chat(&shared, text);
                }
            }
            while let Some(text) = chat_out.try_receive() {
                send_chat(&shared, text);
            }
        })?;

        let on_voice = handler.clone();
        let shared = self.shared.clone();
        let audio_in = pending.audio_in;
        self.spawn_receiver("relay-voice-rx", audio_in, move |samples| {
            shared.stats.voice_received.fetch_add(1, Ordering::Relaxed);
            on_voice.on_voice(samples);
        })?;

        let on_chat = handler.clone();
        self.spawn_receiver("relay-chat-rx", pending.chat_in, move |message| on_chat.on_chat(message))?;

        self.spawn_receiver("relay-presence-rx", pending.presence_in, move |event| {
            handler.on_presence(event)
        })?;

        tracing::info!(
            server = %self.config.server_address,
            room = %self.config.room_code,
            name = %self.config.display_name,
            "Relay client started"
        );
        Ok(())
    }

    fn spawn_worker(
        &mut self,
        name: &str,
        body: impl FnOnce() + Send + 'static,
    ) -> Result<(), NetworkError> {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(body)
            .map_err(|e| NetworkError::Runtime(e.to_string()))?;
        self.workers.push(handle);
        Ok(())
    }

    fn spawn_receiver<T: Send + 'static>(
        &mut self,
        name: &str,
        queue: QueueConsumer<T>,
        mut deliver: impl FnMut(T) + Send + 'static,
    ) -> Result<(), NetworkError> {
        let stop = self.loops_stop.clone();
        self.spawn_worker(name, move || {
            while !stop.is_stopped() {
                if let Some(item) = queue.poll() {
                    deliver(item);
                }
            }
        })
    }

    /// Stop the boundary loops, then close the session.
    ///
    /// Loops are joined first so nothing is emitted after the session is
    /// gone. Each join is bounded by `shutdown_timeout`.
    pub fn stop(&mut self) {
        if self.workers.is_empty() && self.network.is_none() {
            return;
        }
        let timeout = self.config.shutdown_timeout();

        self.loops_stop.stop();
        for handle in self.workers.drain(..) {
            join_with_timeout(handle, timeout);
        }

        self.network_stop.stop();
        if let Some(handle) = self.network.take() {
            // The session itself flushes within `timeout`; allow for the
            // backoff sleep to notice the signal as well.
            if !join_with_timeout(handle, timeout * 2) {
                self.shared.session.lock().take();
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
        tracing::info!("Relay client stopped");
    }

    /// Sink that feeds captured frames into the outbound audio queue
    pub fn voice_sink(&self) -> Arc<dyn FrameSink> {
        Arc::new(self.audio_out.clone())
    }

    /// Queue one block of samples for sending
    pub fn send_voice(&self, samples: Vec<f32>) {
        self.audio_out.submit(AudioFrame::from_samples(samples));
    }

    /// Queue a chat line; blank lines are ignored
    pub fn send_chat(&self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.chat_out.submit(text.to_string());
        true
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.lock()
    }

    pub fn stats(&self) -> &ClientStats {
        &self.shared.stats
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.stop();
    }
}

enum SessionEnd {
    Lost,
    Shutdown,
}

/// Everything the network thread owns
struct SessionContext {
    config: ClientConfig,
    shared: Arc<Shared>,
    inbound: Inbound,
    stop: StopSignal,
}

impl SessionContext {
    async fn run(self) {
        let mut roster = RosterView::new();

        while !self.stop.is_stopped() {
            self.shared.set_state(ConnectionState::Connecting);
            match self.connect().await {
                Ok(framed) => {
                    self.shared.stats.connects.fetch_add(1, Ordering::Relaxed);
                    self.shared.set_state(ConnectionState::Connected);
                    let end = self.serve(framed, &mut roster).await;
                    self.shared.session.lock().take();
                    self.shared.set_state(ConnectionState::Disconnected);
                    if let SessionEnd::Shutdown = end {
                        break;
                    }
                    tracing::warn!("Connection to relay lost");
                }
                Err(e) => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    tracing::warn!(error = %e, "Connection to relay failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                _ = self.stop.stopped() => {}
            }
        }

        self.shared.set_state(ConnectionState::Disconnected);
        tracing::debug!("Relay session loop finished");
    }

    async fn connect(&self) -> Result<Framed<TcpStream, FrameCodec>, NetworkError> {
        let addr = &self.config.server_address;
        tracing::debug!(%addr, "Connecting to relay");
        let stream = tokio::time::timeout(self.config.connect_timeout(), TcpStream::connect(addr))
            .await
            .map_err(|_| NetworkError::Timeout)?
            .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", addr, e)))?;
        tune_stream(&stream);
        Ok(Framed::new(stream, FrameCodec::new()))
    }

    async fn serve(&self, mut framed: Framed<TcpStream, FrameCodec>, roster: &mut RosterView) -> SessionEnd {
        let join = ClientEvent::Join {
            name: self.config.display_name.clone(),
            room_code: self.config.room_code.clone(),
        };
        if let Err(e) = framed.send(join).await {
            tracing::warn!(error = %e, "Failed to send join");
            return SessionEnd::Lost;
        }

        let (tx, mut rx) = mpsc::channel::<ClientEvent>(self.config.outbound_capacity.max(1));
        *self.shared.session.lock() = Some(tx);
        tracing::info!(
            server = %self.config.server_address,
            room = %self.config.room_code,
            "Connected to relay"
        );

        loop {
            tokio::select! {
                _ = self.stop.stopped() => {
                    self.close(&mut framed, &mut rx).await;
                    return SessionEnd::Shutdown;
                }
                Some(event) = rx.recv() => {
                    if let Err(e) = framed.send(event).await {
                        tracing::warn!(error = %e, "Send to relay failed");
                        return SessionEnd::Lost;
                    }
                }
                frame = framed.next() => match frame {
                    Some(Ok(payload)) => self.dispatch(&payload, roster),
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Frame read error");
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                },
            }
        }
    }

    /// Flush queued events, announce the leave and close the socket
    async fn close(&self, framed: &mut Framed<TcpStream, FrameCodec>, rx: &mut mpsc::Receiver<ClientEvent>) {
        self.shared.session.lock().take();
        let flush = async {
            while let Ok(event) = rx.try_recv() {
                framed.feed(event).await?;
            }
            framed.feed(ClientEvent::Leave).await?;
            SinkExt::<ClientEvent>::close(framed).await
        };
        match tokio::time::timeout(self.config.shutdown_timeout(), flush).await {
            Ok(Ok(())) => tracing::debug!("Session closed cleanly"),
            Ok(Err(e)) => tracing::debug!(error = %e, "Error while closing session"),
            Err(_) => tracing::warn!("Session close timed out"),
        }
    }

    /// Route one inbound frame to its boundary queue
    fn dispatch(&self, payload: &[u8], roster: &mut RosterView) {
        let event = match decode_event::<ServerEvent>(payload) {
            Ok(event) => event,
            Err(e) => {
                self.shared.stats.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(error = %e, "Dropped malformed frame");
                return;
            }
        };

        match event {
            ServerEvent::Voice(samples) => {
                if let Err(e) = validate_voice(&samples) {
                    self.shared.stats.malformed_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(error = %e, "Dropped invalid voice frame");
                    return;
                }
                self.inbound.audio_in.submit(samples);
            }
            ServerEvent::ChatMessage(message) => {
                self.inbound.chat_in.submit(message);
            }
            presence => {
                for change in roster.apply(&presence) {
                    self.inbound.presence_in.submit(change);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::server::RelayServer;
    use crate::config::ServerConfig;
    use std::io::Write;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorder {
        voice: Mutex<Vec<Vec<f32>>>,
        chat: Mutex<Vec<ChatMessage>>,
        presence: Mutex<Vec<PresenceEvent>>,
    }

    impl RelayHandler for Recorder {
        fn on_voice(&self, samples: Vec<f32>) {
            self.voice.lock().push(samples);
        }

        fn on_chat(&self, message: ChatMessage) {
            self.chat.lock().push(message);
        }

        fn on_presence(&self, event: PresenceEvent) {
            self.presence.lock().push(event);
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        cond()
    }

    fn client_config(addr: &str, name: &str) -> ClientConfig {
        ClientConfig {
            server_address: addr.to_string(),
            display_name: name.to_string(),
            room_code: "ABC".into(),
            reconnect_delay_ms: 50,
            ..ClientConfig::default()
        }
    }

    /// Run a relay on its own runtime thread and return its address
    fn spawn_relay() -> (String, tokio::sync::watch::Sender<bool>) {
        let (addr_tx, addr_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let server = RelayServer::new(ServerConfig::default());
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
                addr_tx.send(listener.local_addr().unwrap().to_string()).unwrap();
                server.serve(listener, stop_rx).await.unwrap();
            });
        });
        (addr_rx.recv().unwrap(), stop_tx)
    }

    #[test]
    fn test_emit_while_offline_is_dropped() {
        let mut client = RelayClient::new(client_config("127.0.0.1:1", "Ana"), &QueueConfig::default());
        client.start(Arc::new(Recorder::default())).unwrap();
        assert!(client.send_chat("hello"));
        assert!(!client.send_chat("   "));

        assert!(wait_until(|| client.stats().offline_dropped() >= 1));
        assert_ne!(client.state(), ConnectionState::Connected);
        client.stop();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_full_writer_counts_backpressure_not_offline() {
        let shared = Shared {
            state: Mutex::new(ConnectionState::Connected),
            session: Mutex::new(None),
            stats: ClientStats::default(),
        };
        assert!(!shared.emit(ClientEvent::Leave));
        assert_eq!(shared.stats.offline_dropped(), 1);

        let (tx, _rx) = mpsc::channel(1);
        *shared.session.lock() = Some(tx);
        assert!(shared.emit(ClientEvent::Leave));
        assert!(!shared.emit(ClientEvent::Leave));
        assert_eq!(shared.stats.backpressure_dropped(), 1);
        assert_eq!(shared.stats.offline_dropped(), 1);
    }

    fn write_frame(stream: &mut std::net::TcpStream, json: &str) {
        stream.write_all(&(json.len() as u32).to_be_bytes()).unwrap();
        stream.write_all(json.as_bytes()).unwrap();
    }

    #[test]
    fn test_malformed_voice_does_not_stop_receiving() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (done_tx, done_rx) = std::sync::mpsc::channel::<()>();
        let relay = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            write_frame(&mut stream, r#"{"event":"voice","data":["a"]}"#);
            write_frame(&mut stream, r#"{"event":"voice","data":[]}"#);
            write_frame(&mut stream, r#"{"event":"voice","data":[0.5,0.25]}"#);
            let _ = done_rx.recv_timeout(Duration::from_secs(5));
        });

        let inbox = Arc::new(Recorder::default());
        let mut client = RelayClient::new(client_config(&addr, "Ana"), &QueueConfig::default());
        client.start(inbox.clone()).unwrap();

        assert!(wait_until(|| !inbox.voice.lock().is_empty()));
        assert_eq!(inbox.voice.lock()[0], vec![0.5, 0.25]);
        assert_eq!(client.stats().malformed_dropped(), 2);
        assert_eq!(client.state(), ConnectionState::Connected);

        client.stop();
        let _ = done_tx.send(());
        relay.join().unwrap();
    }

    #[test]
    fn test_start_twice_fails() {
        let mut client = RelayClient::new(client_config("127.0.0.1:1", "Ana"), &QueueConfig::default());
        client.start(Arc::new(Recorder::default())).unwrap();
        assert!(client.start(Arc::new(Recorder::default())).is_err());
        client.stop();
    }

    #[test]
    fn test_two_clients_exchange_voice_chat_and_presence() {
        let (addr, _relay) = spawn_relay();
        let ana = Arc::new(Recorder::default());
        let bo = Arc::new(Recorder::default());

        let mut ana_client = RelayClient::new(client_config(&addr, "Ana"), &QueueConfig::default());
        let mut bo_client = RelayClient::new(client_config(&addr, "Bo"), &QueueConfig::default());
        ana_client.start(ana.clone()).unwrap();
        bo_client.start(bo.clone()).unwrap();

        assert!(wait_until(|| {
            ana.presence.lock().contains(&PresenceEvent::Joined { name: "Bo".into() })
                && bo.presence.lock().contains(&PresenceEvent::Joined { name: "Ana".into() })
        }));

        ana_client.send_voice(vec![0.25, -0.25]);
        ana_client.send_chat("hi Bo");
        assert!(wait_until(|| !bo.voice.lock().is_empty()));
        assert!(wait_until(|| !bo.chat.lock().is_empty()));
        assert_eq!(bo.voice.lock()[0], vec![0.25, -0.25]);
        assert_eq!(bo.chat.lock()[0], ChatMessage::new("Ana", "hi Bo"));
        assert!(ana.voice.lock().is_empty());

        ana_client.stop();
        assert!(wait_until(|| bo
            .presence
            .lock()
            .contains(&PresenceEvent::Left { name: "Ana".into() })));
        bo_client.stop();
    }

    #[test]
    fn test_reconnects_after_relay_appears() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut client = RelayClient::new(client_config(&addr, "Ana"), &QueueConfig::default());
        client.start(Arc::new(Recorder::default())).unwrap();
        thread::sleep(Duration::from_millis(100));
        assert_ne!(client.state(), ConnectionState::Connected);

        let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
        let relay_addr = addr.clone();
        thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            runtime.block_on(async move {
                let server = RelayServer::new(ServerConfig::default());
                let listener = tokio::net::TcpListener::bind(&relay_addr).await.unwrap();
                server.serve(listener, stop_rx).await.unwrap();
            });
        });

        assert!(wait_until(|| client.state() == ConnectionState::Connected));
        assert!(client.stats().connects() >= 1);
        client.stop();
        let _ = stop_tx.send(true);
    }
}
