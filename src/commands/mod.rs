pub mod console;

use std::fmt;
use std::str::FromStr;

use crate::listener::{ArmOutcome, DisconnectOutcome, ListenerReactor, SensorListener};
use crate::status::status_payload;

pub const COMMAND_PREFIX: &str = "LIDAR_";

pub const NO_DATA_RESPONSE: &str = "No data received yet.";
pub const DISCONNECTED_RESPONSE: &str = "Client disconnected.";
pub const NO_ACTIVE_CONNECTION_RESPONSE: &str = "No active client connection to disconnect.";
pub const ACCEPT_SCHEDULED_RESPONSE: &str = "Accept attempt scheduled.";
pub const SHUT_DOWN_RESPONSE: &str = "Listener is shut down; cannot accept connections.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    ReadData,
    Connect,
    Disconnect,
    Status,
}

impl Command {
    pub const ALL: [Self; 4] = [Self::ReadData, Self::Connect, Self::Disconnect, Self::Status];

    pub fn available() -> String {
        Self::ALL
            .iter()
            .map(|command| command.name())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ReadData => "READ_DATA",
            Self::Connect => "CONNECT",
            Self::Disconnect => "DISCONNECT",
            Self::Status => "STATUS",
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CommandError {
    Empty,
    Unknown { name: String },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty command"),
            Self::Unknown { name } => write!(
                f,
                "Unknown command '{name}'. Available: {}",
                Command::available()
            ),
        }
    }
}

impl std::error::Error for CommandError {}

impl FromStr for Command {
    type Err = CommandError;

    // Only the first word counts; trailing parameters are ignored.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let Some(word) = line.split_whitespace().next() else {
            return Err(CommandError::Empty);
        };

        let upper = word.to_ascii_uppercase();
        let name = upper.strip_prefix(COMMAND_PREFIX).unwrap_or(&upper);
        match name {
            "READ_DATA" => Ok(Self::ReadData),
            "CONNECT" => Ok(Self::Connect),
            "DISCONNECT" => Ok(Self::Disconnect),
            "STATUS" => Ok(Self::Status),
            _ => Err(CommandError::Unknown {
                name: word.to_owned(),
            }),
        }
    }
}

pub fn dispatch(
    command: Command,
    listener: &mut SensorListener,
    reactor: &mut ListenerReactor,
) -> String {
    match command {
        Command::ReadData => match listener.query_latest() {
            Some(reading) => format!("Data from lidar: {}", reading.display_text()),
            None => NO_DATA_RESPONSE.to_owned(),
        },
        Command::Connect => match listener.request_accept(reactor) {
            ArmOutcome::Armed | ArmOutcome::AlreadyArmed => ACCEPT_SCHEDULED_RESPONSE.to_owned(),
            ArmOutcome::AlreadyConnected { peer_addr } => {
                format!("Client already connected from {peer_addr}.")
            }
            ArmOutcome::ShutDown => SHUT_DOWN_RESPONSE.to_owned(),
        },
        Command::Disconnect => match listener.disconnect(reactor) {
            DisconnectOutcome::Disconnected { .. } => DISCONNECTED_RESPONSE.to_owned(),
            DisconnectOutcome::NoActiveConnection => NO_ACTIVE_CONNECTION_RESPONSE.to_owned(),
        },
        Command::Status => status_payload(listener).to_string(),
    }
}

// Blank lines produce no response; anything else always gets one.
pub fn handle_line(
    line: &str,
    listener: &mut SensorListener,
    reactor: &mut ListenerReactor,
) -> Option<String> {
    match line.parse::<Command>() {
        Ok(command) => Some(dispatch(command, listener, reactor)),
        Err(CommandError::Empty) => None,
        Err(error) => Some(error.to_string()),
    }
}
