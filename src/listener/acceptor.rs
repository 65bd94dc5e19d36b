use std::time::Instant;

use serde_json::json;

use crate::logging::LogLevel;
use crate::reactor::Waketime;
use crate::server::PeerHandle;

use super::{ArmOutcome, ConnectionState, ListenerReactor, SensorListener};

const LOG_CONTEXT: &str = "listener::acceptor";

impl SensorListener {
    // At most one accept timer exists; arming while one is registered changes nothing.
    pub(super) fn arm_acceptor(
        &mut self,
        reactor: &mut ListenerReactor,
        waketime: Waketime,
    ) -> ArmOutcome {
        if self.is_shut_down() {
            self.logger.warn(
                Some(LOG_CONTEXT),
                "accept requested after shutdown; listening socket is closed",
            );
            return ArmOutcome::ShutDown;
        }
        if let Some(peer_addr) = self.peer_addr() {
            return ArmOutcome::AlreadyConnected { peer_addr };
        }
        if self.accept_timer.is_some() {
            return ArmOutcome::AlreadyArmed;
        }

        let id = reactor.register_timer(waketime, |listener, reactor, now| {
            listener.try_accept(reactor, now)
        });
        self.accept_timer = Some(id);
        self.state = ConnectionState::Accepting;
        self.stats.acceptor_arms += 1;
        self.logger.debug(
            Some(LOG_CONTEXT),
            &format!("acceptor armed (timer {id}, arm #{})", self.stats.acceptor_arms),
        );
        ArmOutcome::Armed
    }

    pub(super) fn try_accept(&mut self, reactor: &mut ListenerReactor, now: Instant) -> Waketime {
        let accepted = match (&self.socket, &self.peer) {
            (Some(socket), None) => socket.try_accept(),
            _ => {
                self.accept_timer = None;
                return Waketime::Never;
            }
        };

        match accepted {
            Ok(Some(peer)) => {
                self.accept_timer = None;
                self.adopt_peer(reactor, peer);
                Waketime::Never
            }
            Ok(None) => {
                self.logger.verbose(
                    Some(LOG_CONTEXT),
                    "no pending connection; retrying accept later",
                );
                Waketime::after(now, self.config.accept_retry_interval)
            }
            Err(error) => {
                self.stats.accept_errors += 1;
                self.logger.error(
                    Some(LOG_CONTEXT),
                    &format!(
                        "{error}; retrying in {}ms",
                        self.config.accept_retry_interval.as_millis()
                    ),
                );
                Waketime::after(now, self.config.accept_retry_interval)
            }
        }
    }

    fn adopt_peer(&mut self, reactor: &mut ListenerReactor, peer: PeerHandle) {
        let peer_addr = peer.peer_addr();
        self.peer = Some(peer);
        self.state = ConnectionState::Connected;
        self.stats.accepted_connections += 1;
        self.arm_poller(reactor);

        self.logger.log(
            LogLevel::Info,
            Some(LOG_CONTEXT),
            "Client connected",
            Some(json!({
                "peer_addr": peer_addr.to_string(),
                "accepted_connections": self.stats.accepted_connections,
            })),
        );
    }
}
