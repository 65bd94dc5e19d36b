use std::fmt::{self, Write as _};
use std::io::{self, Write};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum LogLevel {
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
    Verbose = 5,
}

// (level, label, ANSI color, accepted config spellings)
static LEVELS: [(LogLevel, &str, &str, &[&str]); 5] = [
    (LogLevel::Error, "ERROR", "31", &["error"]),
    (LogLevel::Warn, "WARN", "33", &["warn", "warning"]),
    (LogLevel::Info, "INFO", "32", &["info"]),
    (LogLevel::Debug, "DEBUG", "36", &["debug"]),
    (LogLevel::Verbose, "VERBOSE", "35", &["verbose", "trace"]),
];

impl LogLevel {
    pub const CONFIG_VALUES: &'static str = "error, warn, info, debug, verbose";

    pub fn from_config_value(value: &str) -> Option<Self> {
        let wanted = value.trim().to_ascii_lowercase();
        LEVELS
            .iter()
            .find(|(_, _, _, spellings)| spellings.contains(&wanted.as_str()))
            .map(|(level, ..)| *level)
    }

    fn entry(self) -> &'static (LogLevel, &'static str, &'static str, &'static [&'static str]) {
        &LEVELS[self as usize - 1]
    }

    fn label(self) -> &'static str {
        self.entry().1
    }

    fn write_label(self, out: &mut String, colored: bool) {
        let (_, label, color, _) = self.entry();
        let _ = if colored {
            write!(out, "\x1b[{color}m{label}\x1b[0m")
        } else {
            out.write_str(label)
        };
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    pub human_friendly: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            human_friendly: false,
        }
    }
}

// One rendered log line: `<rfc3339> [LEVEL] [context] message payload={json}`.
pub struct LogRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub context: Option<&'a str>,
    pub message: &'a str,
    pub payload: Option<&'a Value>,
}

impl LogRecord<'_> {
    pub fn render(&self, colored: bool) -> String {
        let mut line = self
            .timestamp
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        line.push_str(" [");
        self.level.write_label(&mut line, colored);
        line.push(']');

        if let Some(context) = self.context.filter(|context| !context.is_empty()) {
            let _ = write!(line, " [{context}]");
        }
        line.push(' ');
        line.push_str(self.message);
        if let Some(payload) = self.payload {
            let _ = write!(line, " payload={payload}");
        }
        line
    }
}

pub trait LogSink: Send + Sync {
    fn write_line(&self, line: &str);
}

// Log lines go to stderr so stdout carries nothing but command responses.
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write_line(&self, line: &str) {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
    }
}

// Cloning shares the sink; every clone writes to the same destination.
#[derive(Clone)]
pub struct Logger {
    config: LoggerConfig,
    sink: Arc<dyn LogSink>,
}

impl Logger {
    pub fn new(config: LoggerConfig) -> Self {
        Self::with_sink(config, Arc::new(StderrSink))
    }

    pub fn with_sink(config: LoggerConfig, sink: Arc<dyn LogSink>) -> Self {
        Self { config, sink }
    }

    pub fn error(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Error, context, message, None);
    }

    pub fn warn(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Warn, context, message, None);
    }

    pub fn info(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Info, context, message, None);
    }

    pub fn debug(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Debug, context, message, None);
    }

    pub fn verbose(&self, context: Option<&str>, message: &str) {
        self.log(LogLevel::Verbose, context, message, None);
    }

    pub fn log(&self, level: LogLevel, context: Option<&str>, message: &str, payload: Option<Value>) {
        if !self.enabled(level) {
            return;
        }

        let record = LogRecord {
            timestamp: Utc::now(),
            level,
            context,
            message,
            payload: payload.as_ref(),
        };
        self.sink
            .write_line(&record.render(self.config.human_friendly));
    }

    // Lets callers skip building payloads that would be filtered out anyway.
    pub fn enabled(&self, level: LogLevel) -> bool {
        level <= self.config.min_level
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.config.min_level)
            .field("human_friendly", &self.config.human_friendly)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::{Arc, Mutex};

    use super::{LogLevel, LogSink, Logger, LoggerConfig};

    #[derive(Default)]
    pub struct MemorySink {
        lines: Mutex<Vec<String>>,
    }

    impl MemorySink {
        pub fn lines(&self) -> Vec<String> {
            self.lines
                .lock()
                .expect("memory sink mutex poisoned")
                .clone()
        }

        pub fn contains(&self, needle: &str) -> bool {
            self.lines().iter().any(|line| line.contains(needle))
        }
    }

    impl LogSink for MemorySink {
        fn write_line(&self, line: &str) {
            self.lines
                .lock()
                .expect("memory sink mutex poisoned")
                .push(line.to_owned());
        }
    }

    pub fn memory_logger(min_level: LogLevel) -> (Logger, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::default());
        let logger = Logger::with_sink(
            LoggerConfig {
                min_level,
                human_friendly: false,
            },
            sink.clone(),
        );
        (logger, sink)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::testing::memory_logger;
    use super::{LogLevel, LogRecord, LoggerConfig};

    #[test]
    fn default_config_is_plain_info_level() {
        let config = LoggerConfig::default();
        assert_eq!(config.min_level, LogLevel::Info);
        assert!(!config.human_friendly);
    }

    #[test]
    fn parses_config_values_case_insensitively() {
        assert_eq!(LogLevel::from_config_value("ERROR"), Some(LogLevel::Error));
        assert_eq!(LogLevel::from_config_value(" warn "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_config_value("Warning"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_config_value("verbose"), Some(LogLevel::Verbose));
        assert_eq!(LogLevel::from_config_value("trace"), Some(LogLevel::Verbose));
        assert_eq!(LogLevel::from_config_value("loud"), None);
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
    }

    #[test]
    fn record_renders_plain_and_colored_lines() {
        let payload = json!({ "peer_addr": "127.0.0.1:4000" });
        let record = LogRecord {
            timestamp: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            level: LogLevel::Warn,
            context: Some("listener"),
            message: "Client connection ended",
            payload: Some(&payload),
        };

        assert_eq!(
            record.render(false),
            "2026-03-04T05:06:07.000Z [WARN] [listener] Client connection ended payload={\"peer_addr\":\"127.0.0.1:4000\"}"
        );
        assert!(record.render(true).contains("[\x1b[33mWARN\x1b[0m] [listener]"));

        let bare = LogRecord {
            context: Some(""),
            payload: None,
            ..record
        };
        assert_eq!(
            bare.render(false),
            "2026-03-04T05:06:07.000Z [WARN] Client connection ended"
        );
    }

    #[test]
    fn debug_threshold_excludes_verbose_logs() {
        let (logger, sink) = memory_logger(LogLevel::Debug);

        logger.debug(Some("listener::acceptor"), "acceptor armed");
        logger.verbose(Some("listener::acceptor"), "no pending connection");

        let lines = sink.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("[DEBUG] [listener::acceptor] acceptor armed"));
        assert!(!logger.enabled(LogLevel::Verbose));
    }

    #[test]
    fn clones_share_the_same_sink() {
        let (logger, sink) = memory_logger(LogLevel::Info);
        let clone = logger.clone();

        logger.warn(Some("main::console"), "failed to read console input");
        clone.error(Some("listener"), "socket read failed");

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[WARN]"));
        assert!(lines[1].contains("[ERROR]"));
    }
}
