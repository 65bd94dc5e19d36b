mod acceptor;
mod poller;

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use serde_json::json;

use crate::config;
use crate::logging::{LogLevel, Logger};
use crate::reactor::{Reactor, TimerId, Waketime};
use crate::server::{ListeningSocket, PeerHandle, ServerError};
use crate::store::{LatestValueStore, Reading};

pub const READ_BUFFER_SIZE: usize = 1024;
pub const MIN_INTERVAL_MS: u64 = 10;
pub const MAX_INTERVAL_MS: u64 = 10_000;

const LOG_CONTEXT: &str = "listener";

pub type ListenerReactor = Reactor<SensorListener>;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
    pub read_poll_interval: Duration,
    pub accept_retry_interval: Duration,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        let defaults = config::ListenerConfig::default();
        Self {
            host: defaults.host,
            port: defaults.port,
            read_poll_interval: Duration::from_millis(defaults.read_poll_interval_ms),
            accept_retry_interval: Duration::from_millis(defaults.accept_retry_interval_ms),
        }
    }
}

impl ListenerConfig {
    pub fn from_app_config(app_config: &config::AppConfig) -> Result<Self, ListenerError> {
        let listener = &app_config.listener;
        Ok(Self {
            host: listener.host.clone(),
            port: listener.port,
            read_poll_interval: validate_interval(
                "listener.read_poll_interval_ms",
                listener.read_poll_interval_ms,
            )?,
            accept_retry_interval: validate_interval(
                "listener.accept_retry_interval_ms",
                listener.accept_retry_interval_ms,
            )?,
        })
    }
}

fn validate_interval(setting: &'static str, provided_ms: u64) -> Result<Duration, ListenerError> {
    if (MIN_INTERVAL_MS..=MAX_INTERVAL_MS).contains(&provided_ms) {
        Ok(Duration::from_millis(provided_ms))
    } else {
        Err(ListenerError::InvalidInterval {
            setting,
            provided_ms,
        })
    }
}

#[derive(Debug)]
pub enum ListenerError {
    InvalidInterval {
        setting: &'static str,
        provided_ms: u64,
    },
    Server(ServerError),
}

impl fmt::Display for ListenerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval {
                setting,
                provided_ms,
            } => write!(
                f,
                "{setting} must be between {MIN_INTERVAL_MS}ms and {MAX_INTERVAL_MS}ms, got {provided_ms}ms"
            ),
            Self::Server(source) => write!(f, "{source}"),
        }
    }
}

impl std::error::Error for ListenerError {}

impl From<ServerError> for ListenerError {
    fn from(value: ServerError) -> Self {
        Self::Server(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Accepting,
    Connected,
    Closing,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Accepting => "accepting",
            Self::Connected => "connected",
            Self::Closing => "closing",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    PeerClosed,
    ReadFailed { error: String },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "connection closed by peer"),
            Self::ReadFailed { error } => write!(f, "socket read failed: {error}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArmOutcome {
    Armed,
    AlreadyArmed,
    AlreadyConnected { peer_addr: SocketAddr },
    ShutDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected { peer_addr: SocketAddr },
    NoActiveConnection,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub accepted_connections: u64,
    pub disconnects: u64,
    pub acceptor_arms: u64,
    pub accept_errors: u64,
    pub payloads_received: u64,
}

impl ListenerStats {
    pub fn to_json(self) -> serde_json::Value {
        json!({
            "accepted_connections": self.accepted_connections,
            "disconnects": self.disconnects,
            "acceptor_arms": self.acceptor_arms,
            "accept_errors": self.accept_errors,
            "payloads_received": self.payloads_received,
        })
    }
}

// Owns every piece of mutable listener state. The acceptor and poller timers only ever
// touch it through `&mut self` inside a single reactor callback, so a state change is
// always complete before the next callback runs.
#[derive(Debug)]
pub struct SensorListener {
    config: ListenerConfig,
    socket: Option<ListeningSocket>,
    peer: Option<PeerHandle>,
    state: ConnectionState,
    accept_timer: Option<TimerId>,
    poll_timer: Option<TimerId>,
    store: LatestValueStore,
    stats: ListenerStats,
    logger: Logger,
}

impl SensorListener {
    pub fn bind(config: ListenerConfig, logger: Logger) -> Result<Self, ListenerError> {
        let socket = ListeningSocket::bind(&config.host, config.port)?;
        logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "Listening socket bound",
            Some(json!({
                "bind_address": socket.local_addr().to_string(),
                "read_poll_interval_ms": config.read_poll_interval.as_millis() as u64,
                "accept_retry_interval_ms": config.accept_retry_interval.as_millis() as u64,
            })),
        );

        Ok(Self {
            config,
            socket: Some(socket),
            peer: None,
            state: ConnectionState::Idle,
            accept_timer: None,
            poll_timer: None,
            store: LatestValueStore::new(),
            stats: ListenerStats::default(),
            logger,
        })
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().map(ListeningSocket::local_addr)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.as_ref().map(PeerHandle::peer_addr)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn stats(&self) -> ListenerStats {
        self.stats
    }

    pub fn is_shut_down(&self) -> bool {
        self.socket.is_none()
    }

    pub fn store(&self) -> &LatestValueStore {
        &self.store
    }

    pub fn query_latest(&self) -> Option<Reading> {
        self.store.query_latest()
    }

    pub fn start(&mut self, reactor: &mut ListenerReactor) -> ArmOutcome {
        self.arm_acceptor(reactor, Waketime::Now)
    }

    // Arms the acceptor for an immediate attempt, or pulls an already armed acceptor
    // forward to run on the next pass.
    pub fn request_accept(&mut self, reactor: &mut ListenerReactor) -> ArmOutcome {
        match self.arm_acceptor(reactor, Waketime::Now) {
            ArmOutcome::AlreadyArmed => {
                if let Some(id) = self.accept_timer {
                    reactor.update_timer(id, Waketime::Now);
                }
                ArmOutcome::AlreadyArmed
            }
            outcome => outcome,
        }
    }

    // Drops the active peer (if any) and always clears the stored payload. The acceptor
    // is not re-armed here; a later `request_accept` does that.
    pub fn disconnect(&mut self, reactor: &mut ListenerReactor) -> DisconnectOutcome {
        let cleared = self.store.clear_latest();

        let Some(peer_addr) = self.release_peer(reactor) else {
            self.logger.debug(
                Some(LOG_CONTEXT),
                &format!("disconnect requested without an active peer (payload cleared: {cleared})"),
            );
            return DisconnectOutcome::NoActiveConnection;
        };

        self.stats.disconnects += 1;
        self.state = ConnectionState::Idle;
        self.logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "Client disconnected on request",
            Some(json!({ "peer_addr": peer_addr.to_string() })),
        );
        DisconnectOutcome::Disconnected { peer_addr }
    }

    pub fn shutdown(&mut self, reactor: &mut ListenerReactor) -> bool {
        let Some(socket) = self.socket.take() else {
            return false;
        };

        if let Some(id) = self.accept_timer.take() {
            reactor.unregister_timer(id);
        }
        let peer_addr = self.release_peer(reactor);
        self.state = ConnectionState::Idle;
        self.logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "Listener shut down",
            Some(json!({
                "bind_address": socket.local_addr().to_string(),
                "closed_peer": peer_addr.map(|addr| addr.to_string()),
            })),
        );
        true
    }

    // The single disconnect transition used by the poller. Only a connected listener
    // can take it, so one disconnect event arms exactly one acceptor.
    fn reconnect(&mut self, reactor: &mut ListenerReactor, reason: DisconnectReason) -> bool {
        if self.state != ConnectionState::Connected {
            self.logger.debug(
                Some(LOG_CONTEXT),
                &format!("reconnect ignored in state {} ({reason})", self.state),
            );
            return false;
        }

        self.state = ConnectionState::Closing;
        let peer_addr = self.release_peer(reactor);
        self.stats.disconnects += 1;
        self.state = ConnectionState::Idle;

        let level = match reason {
            DisconnectReason::PeerClosed => LogLevel::Info,
            DisconnectReason::ReadFailed { .. } => LogLevel::Error,
        };
        self.logger.log(
            level,
            Some(LOG_CONTEXT),
            &format!("Client connection ended: {reason}; waiting for a new peer"),
            Some(json!({ "peer_addr": peer_addr.map(|addr| addr.to_string()) })),
        );

        self.arm_acceptor(reactor, Waketime::Now);
        true
    }

    fn release_peer(&mut self, reactor: &mut ListenerReactor) -> Option<SocketAddr> {
        if let Some(id) = self.poll_timer.take() {
            reactor.unregister_timer(id);
        }

        let mut peer = self.peer.take()?;
        peer.close();
        Some(peer.peer_addr())
    }
}

#[cfg(test)]
pub mod testing {
    use std::io::Write;
    use std::net::TcpStream;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use crate::logging::testing::{memory_logger, MemorySink};
    use crate::logging::LogLevel;

    use super::{ConnectionState, ListenerConfig, ListenerReactor, SensorListener};

    pub struct Harness {
        pub listener: SensorListener,
        pub reactor: ListenerReactor,
        pub sink: Arc<MemorySink>,
        pub now: Instant,
    }

    impl Harness {
        pub fn new() -> Self {
            let (logger, sink) = memory_logger(LogLevel::Verbose);
            let config = ListenerConfig {
                host: "127.0.0.1".to_owned(),
                port: 0,
                read_poll_interval: Duration::from_millis(100),
                accept_retry_interval: Duration::from_millis(250),
            };
            let listener = SensorListener::bind(config, logger).expect("listener should bind");
            Self {
                listener,
                reactor: ListenerReactor::new(),
                sink,
                now: Instant::now(),
            }
        }

        pub fn started() -> Self {
            let mut harness = Self::new();
            harness.listener.start(&mut harness.reactor);
            harness
        }

        // Advances the synthetic clock past every retry/poll interval and runs one pass.
        pub fn step(&mut self) -> usize {
            self.now += Duration::from_secs(1);
            let ran = self.reactor.run_due(&mut self.listener, self.now);
            self.assert_invariants();
            ran
        }

        pub fn step_until(&mut self, mut condition: impl FnMut(&SensorListener) -> bool) -> bool {
            for _ in 0..200 {
                self.step();
                if condition(&self.listener) {
                    return true;
                }
                thread::sleep(Duration::from_millis(5));
            }
            false
        }

        pub fn connect_client(&mut self) -> TcpStream {
            let addr = self.listener.local_addr().expect("listener should be bound");
            let client = TcpStream::connect(addr).expect("client should connect");
            assert!(
                self.step_until(|listener| listener.state() == ConnectionState::Connected),
                "listener should accept the client"
            );
            client
        }

        pub fn send(&mut self, client: &mut TcpStream, payload: &[u8]) {
            let writes_before = self.listener.store().writes();
            client.write_all(payload).expect("client write should succeed");
            assert!(
                self.step_until(|listener| listener.store().writes() > writes_before),
                "listener should receive the payload"
            );
        }

        pub fn acceptor_timers(&self) -> usize {
            usize::from(self.listener.accept_timer.is_some())
        }

        pub fn assert_invariants(&self) {
            let listener = &self.listener;
            assert_ne!(listener.state, ConnectionState::Closing);
            assert_eq!(
                listener.state == ConnectionState::Connected,
                listener.peer.is_some() && listener.poll_timer.is_some(),
                "connected state must match peer ownership"
            );
            assert!(
                !(listener.peer.is_some() && listener.accept_timer.is_some()),
                "acceptor must not run while a peer is held"
            );
            assert_eq!(
                listener.state == ConnectionState::Accepting,
                listener.accept_timer.is_some()
            );
            for id in listener.accept_timer.iter().chain(listener.poll_timer.iter()) {
                assert!(self.reactor.is_registered(*id), "tracked timer must be registered");
            }
            assert_eq!(
                self.reactor.timer_count(),
                usize::from(listener.accept_timer.is_some())
                    + usize::from(listener.poll_timer.is_some()),
                "no stray timers may stay registered"
            );
        }
    }
}
