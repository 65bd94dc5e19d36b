use std::io::{self, BufRead, BufReader};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread;

pub enum ConsolePoll {
    Line(String),
    Empty,
    Closed,
}

// Reads command lines on a dedicated thread so the reactor loop never blocks on input.
pub struct CommandConsole {
    lines: Receiver<io::Result<String>>,
    closed: bool,
}

impl CommandConsole {
    pub fn spawn_stdin() -> Self {
        Self::spawn(BufReader::new(io::stdin()))
    }

    pub fn spawn<R>(reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            for line in reader.lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        });

        Self {
            lines: rx,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn poll(&mut self) -> io::Result<ConsolePoll> {
        if self.closed {
            return Ok(ConsolePoll::Closed);
        }

        match self.lines.try_recv() {
            Ok(Ok(line)) => Ok(ConsolePoll::Line(line)),
            Ok(Err(error)) => {
                self.closed = true;
                Err(error)
            }
            Err(TryRecvError::Empty) => Ok(ConsolePoll::Empty),
            Err(TryRecvError::Disconnected) => {
                self.closed = true;
                Ok(ConsolePoll::Closed)
            }
        }
    }
}
