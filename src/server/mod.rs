use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5000;

#[derive(Debug)]
pub enum ServerError {
    Bind {
        address: String,
        source: io::Error,
    },
    SetNonBlocking {
        source: io::Error,
    },
    Accept {
        source: io::Error,
    },
    ConfigureAcceptedStream {
        peer_addr: SocketAddr,
        source: io::Error,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP listener on {address}: {source}")
            }
            Self::SetNonBlocking { source } => {
                write!(f, "failed to set TCP listener to non-blocking mode: {source}")
            }
            Self::Accept { source } => write!(f, "failed to accept TCP connection: {source}"),
            Self::ConfigureAcceptedStream { peer_addr, source } => write!(
                f,
                "failed to configure accepted TCP stream from {peer_addr}: {source}"
            ),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Bind { source, .. }
            | Self::SetNonBlocking { source }
            | Self::Accept { source }
            | Self::ConfigureAcceptedStream { source, .. } => Some(source),
        }
    }
}

#[derive(Debug)]
pub struct PeerHandle {
    peer_addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl PeerHandle {
    fn configure(stream: TcpStream, peer_addr: SocketAddr) -> Result<Self, ServerError> {
        let configured = stream
            .set_nonblocking(true)
            .and_then(|()| stream.set_nodelay(true));
        if let Err(source) = configured {
            let _ = stream.shutdown(Shutdown::Both);
            return Err(ServerError::ConfigureAcceptedStream { peer_addr, source });
        }

        Ok(Self {
            peer_addr,
            stream: Some(stream),
        })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn try_read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buffer),
            None => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "peer handle already closed",
            )),
        }
    }

    // Safe to call any number of times; only the first call touches the socket.
    pub fn close(&mut self) -> bool {
        match self.stream.take() {
            Some(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
                true
            }
            None => false,
        }
    }
}

impl Drop for PeerHandle {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug)]
pub struct ListeningSocket {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl ListeningSocket {
    // std enables SO_REUSEADDR on Unix listeners before binding, so a restart does not
    // trip over sockets lingering in TIME_WAIT.
    pub fn bind(host: &str, port: u16) -> Result<Self, ServerError> {
        let address = format!("{host}:{port}");
        let listener = TcpListener::bind(&address).map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(|source| ServerError::SetNonBlocking { source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        Ok(Self {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn try_accept(&self) -> Result<Option<PeerHandle>, ServerError> {
        match self.listener.accept() {
            Ok((stream, peer_addr)) => PeerHandle::configure(stream, peer_addr).map(Some),
            Err(source)
                if matches!(
                    source.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(source) => Err(ServerError::Accept { source }),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use std::net::TcpStream;
    use std::os::fd::AsRawFd;
    use std::thread;
    use std::time::Duration;

    use super::{ListeningSocket, PeerHandle};

    pub fn bind_loopback() -> ListeningSocket {
        ListeningSocket::bind("127.0.0.1", 0).expect("loopback listener should bind")
    }

    pub fn accept_within(socket: &ListeningSocket, attempts: usize) -> Option<PeerHandle> {
        for _ in 0..attempts {
            if let Some(peer) = socket.try_accept().expect("accept poll should not fail") {
                return Some(peer);
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    // Linux takes a listening socket out of LISTEN on SHUT_RD; every later accept fails
    // with EINVAL instead of would-block.
    #[cfg(target_os = "linux")]
    pub fn break_listening_socket(socket: &ListeningSocket) {
        let result = unsafe { libc::shutdown(socket.listener.as_raw_fd(), libc::SHUT_RD) };
        assert_eq!(result, 0, "shutdown on the listening socket should succeed");
    }

    // Zero linger turns the next close into a RST, so the other side sees ECONNRESET.
    pub fn reset_on_close(stream: &TcpStream) {
        let linger = libc::linger {
            l_onoff: 1,
            l_linger: 0,
        };
        let result = unsafe {
            libc::setsockopt(
                stream.as_raw_fd(),
                libc::SOL_SOCKET,
                libc::SO_LINGER,
                (&linger as *const libc::linger).cast(),
                std::mem::size_of::<libc::linger>() as libc::socklen_t,
            )
        };
        assert_eq!(result, 0, "SO_LINGER should be accepted");
    }
}
