use std::io;
use std::time::Instant;

use chrono::Utc;
use serde_json::json;

use crate::logging::LogLevel;
use crate::reactor::Waketime;

use super::{ConnectionState, DisconnectReason, ListenerReactor, SensorListener, READ_BUFFER_SIZE};

const LOG_CONTEXT: &str = "listener::poller";

impl SensorListener {
    pub(super) fn arm_poller(&mut self, reactor: &mut ListenerReactor) {
        if let Some(stale) = self.poll_timer.take() {
            reactor.unregister_timer(stale);
        }

        let id = reactor.register_timer(Waketime::Now, |listener, reactor, now| {
            listener.poll_once(reactor, now)
        });
        self.poll_timer = Some(id);
    }

    // One non-blocking read per pass. Anything that arrives between passes is coalesced
    // by the socket and only the last chunk read is kept.
    pub(super) fn poll_once(&mut self, reactor: &mut ListenerReactor, now: Instant) -> Waketime {
        let Some(peer) = self.peer.as_mut() else {
            self.poll_timer = None;
            if self.state == ConnectionState::Connected {
                self.state = ConnectionState::Idle;
            }
            return Waketime::Never;
        };

        let mut buffer = [0_u8; READ_BUFFER_SIZE];
        match peer.try_read(&mut buffer) {
            Ok(0) => {
                self.reconnect(reactor, DisconnectReason::PeerClosed);
                Waketime::Never
            }
            Ok(size) => {
                self.record_payload(&buffer[..size]);
                Waketime::after(now, self.config.read_poll_interval)
            }
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Waketime::after(now, self.config.read_poll_interval)
            }
            Err(error) => {
                self.reconnect(
                    reactor,
                    DisconnectReason::ReadFailed {
                        error: error.to_string(),
                    },
                );
                Waketime::Never
            }
        }
    }

    fn record_payload(&mut self, bytes: &[u8]) {
        let payload = self.store.record_payload(bytes, Utc::now());
        self.stats.payloads_received += 1;

        if self.logger.enabled(LogLevel::Debug) {
            let payload_json = json!({
                "bytes": payload.raw.len(),
                "text": payload.text,
                "numeric": payload.numeric,
            });
            self.logger.log(
                LogLevel::Debug,
                Some(LOG_CONTEXT),
                "Received data",
                Some(payload_json),
            );
        }
    }
}
