use std::fmt;
use std::time::{Duration, Instant};

use serde_json::{json, Value};

use crate::config::AppConfig;
use crate::listener::{ListenerReactor, SensorListener};
use crate::logging::{LogLevel, Logger};
use crate::reactor::{TimerId, Waketime};

pub const MIN_REPORT_INTERVAL_MS: u64 = 100;
pub const MAX_REPORT_INTERVAL_MS: u64 = 60_000;

const LOG_CONTEXT: &str = "status";

// `{"received_data": <number | string | null>}`; never fails.
pub fn status_payload(listener: &SensorListener) -> Value {
    let received_data = listener
        .query_latest()
        .map(|reading| reading.value.to_json())
        .unwrap_or(Value::Null);
    json!({ "received_data": received_data })
}

pub fn report_payload(listener: &SensorListener) -> Value {
    let store = listener.store();
    let latest = store.query_latest();
    let config = listener.config();
    json!({
        "received_data": latest.as_ref().map(|reading| reading.value.to_json()),
        "received_at": latest.as_ref().map(|reading| reading.received_at_rfc3339()),
        "state": listener.state().as_str(),
        "bind_address": listener.local_addr().map(|addr| addr.to_string()),
        "peer_addr": listener.peer_addr().map(|addr| addr.to_string()),
        "read_poll_interval_ms": config.read_poll_interval.as_millis() as u64,
        "payload_writes": store.writes(),
        "stats": listener.stats().to_json(),
    })
}

#[derive(Debug)]
pub enum StatusReportError {
    InvalidInterval { provided_ms: u64 },
    AlreadyRunning,
}

impl fmt::Display for StatusReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInterval { provided_ms } => write!(
                f,
                "status.report_interval_ms must be 0 (disabled) or between {MIN_REPORT_INTERVAL_MS}ms and {MAX_REPORT_INTERVAL_MS}ms, got {provided_ms}ms"
            ),
            Self::AlreadyRunning => write!(f, "status reporter is already running"),
        }
    }
}

impl std::error::Error for StatusReportError {}

pub struct StatusReporter {
    interval: Option<Duration>,
    logger: Logger,
    timer: Option<TimerId>,
}

impl StatusReporter {
    pub fn new(logger: Logger, interval_ms: u64) -> Result<Self, StatusReportError> {
        let interval = match interval_ms {
            0 => None,
            ms if (MIN_REPORT_INTERVAL_MS..=MAX_REPORT_INTERVAL_MS).contains(&ms) => {
                Some(Duration::from_millis(ms))
            }
            provided_ms => return Err(StatusReportError::InvalidInterval { provided_ms }),
        };

        Ok(Self {
            interval,
            logger,
            timer: None,
        })
    }

    pub fn from_app_config(logger: Logger, app_config: &AppConfig) -> Result<Self, StatusReportError> {
        Self::new(logger, app_config.status.report_interval_ms)
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    pub fn start(&mut self, reactor: &mut ListenerReactor) -> Result<bool, StatusReportError> {
        if self.timer.is_some() {
            return Err(StatusReportError::AlreadyRunning);
        }
        let Some(interval) = self.interval else {
            return Ok(false);
        };

        let logger = self.logger.clone();
        let id = reactor.register_timer(
            Waketime::after(Instant::now(), interval),
            move |listener, _reactor, now| {
                logger.log(
                    LogLevel::Info,
                    Some(LOG_CONTEXT),
                    "Listener status",
                    Some(report_payload(listener)),
                );
                Waketime::after(now, interval)
            },
        );
        self.timer = Some(id);
        Ok(true)
    }

    pub fn stop(&mut self, reactor: &mut ListenerReactor) -> bool {
        match self.timer.take() {
            Some(id) => reactor.unregister_timer(id),
            None => false,
        }
    }
}

impl fmt::Debug for StatusReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusReporter")
            .field("interval", &self.interval)
            .field("timer", &self.timer)
            .finish()
    }
}
