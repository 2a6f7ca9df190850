//! Player Connections
//!
//! A text-line duplex channel to one player, backed either by a spawned
//! process's standard streams or by an outgoing socket.
//!
//! The read half is handed to the session thread; the write half and the
//! endpoint stay with the session's locked state so the coordinator can
//! deliver messages and tear the connection down. Tearing down kills the
//! child or shuts the socket, which unblocks a read in progress.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};

#[cfg(unix)]
use std::os::unix::net::UnixStream;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

// =============================================================================
// DESCRIPTORS
// =============================================================================

/// How to reach one player, as listed in a match description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerDescriptor {
    /// Spawn a local executable and talk over its stdin/stdout.
    Process {
        /// Command line, split on whitespace.
        #[serde(rename = "exeName")]
        exe_name: String,
        /// Optional file receiving the player's stderr.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<PathBuf>,
    },
    /// Connect to a listening player.
    Socket {
        /// Address family.
        family: SocketFamily,
        /// Family-specific address.
        addr: SocketTarget,
    },
}

/// Socket address families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocketFamily {
    /// TCP over IPv4/IPv6.
    Inet,
    /// Unix-domain stream socket.
    Unix,
}

/// Socket target address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SocketTarget {
    /// `[host, port]` pair.
    HostPort(String, u16),
    /// `"host:port"` for inet, a filesystem path for unix.
    Text(String),
}

/// Connection errors. Fatal to the host when raised at startup.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Empty command line.
    #[error("Empty command line")]
    EmptyCommand,

    /// Child process could not be started.
    #[error("Failed to spawn {command:?}: {source}")]
    Spawn {
        /// Program name.
        command: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Socket connect failed.
    #[error("Failed to connect to {target}: {source}")]
    Connect {
        /// Address as given.
        target: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// Address does not fit the family.
    #[error("Address {0:?} does not match the socket family")]
    BadAddress(SocketTarget),

    /// Unix sockets requested on a platform without them.
    #[error("Unix-domain sockets are not supported on this platform")]
    UnixUnsupported,

    /// Any other I/O failure while setting up the channel.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

// =============================================================================
// CONNECTION
// =============================================================================

/// What the connection owns and must release on close.
enum Endpoint {
    Process(Child),
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Read half of a connection, owned by the session thread.
pub struct LineReader {
    inner: Box<dyn BufRead + Send>,
}

impl LineReader {
    /// Read one line of at most `max_len` bytes, newline included.
    ///
    /// Returns an empty string on stream end. A line longer than
    /// `max_len` comes back truncated, without its newline; a character
    /// split by the cut is replaced, never reported as an error. Invalid
    /// UTF-8 inside a complete line is `InvalidData`.
    pub fn read_line(&mut self, max_len: usize) -> io::Result<String> {
        let mut bytes = Vec::new();
        (&mut self.inner)
            .take(max_len as u64)
            .read_until(b'\n', &mut bytes)?;

        if bytes.last() == Some(&b'\n') {
            String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
        } else {
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
    }
}

/// A duplex line channel to one player.
pub struct Connection {
    reader: Option<LineReader>,
    writer: Box<dyn Write + Send>,
    endpoint: Endpoint,
    closed: bool,
}

impl Connection {
    /// Open a connection from a descriptor.
    pub fn open(descriptor: &PlayerDescriptor) -> Result<Self, ConnectionError> {
        match descriptor {
            PlayerDescriptor::Process { exe_name, stderr } => {
                Self::spawn(exe_name, stderr.as_ref())
            }
            PlayerDescriptor::Socket { family, addr } => Self::connect(*family, addr),
        }
    }

    fn spawn(command_line: &str, stderr: Option<&PathBuf>) -> Result<Self, ConnectionError> {
        let mut parts = command_line.split_whitespace();
        let program = parts.next().ok_or(ConnectionError::EmptyCommand)?;

        let stderr = match stderr {
            Some(path) => match File::create(path) {
                Ok(file) => Stdio::from(file),
                Err(e) => {
                    warn!("Cannot open stderr file {}: {}", path.display(), e);
                    Stdio::inherit()
                }
            },
            None => Stdio::inherit(),
        };

        let mut child = Command::new(program)
            .args(parts)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(stderr)
            .spawn()
            .map_err(|source| ConnectionError::Spawn {
                command: program.to_string(),
                source,
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "child pipes unavailable").into());
            }
        };

        debug!("Spawned player process {} ({})", child.id(), command_line);
        Ok(Self::assemble(stdout, stdin, Endpoint::Process(child)))
    }

    fn connect(family: SocketFamily, target: &SocketTarget) -> Result<Self, ConnectionError> {
        match (family, target) {
            (SocketFamily::Inet, SocketTarget::HostPort(host, port)) => {
                let stream = TcpStream::connect((host.as_str(), *port)).map_err(|source| {
                    ConnectionError::Connect { target: format!("{host}:{port}"), source }
                })?;
                Self::from_tcp(stream)
            }
            (SocketFamily::Inet, SocketTarget::Text(addr)) => {
                let stream = TcpStream::connect(addr.as_str()).map_err(|source| {
                    ConnectionError::Connect { target: addr.clone(), source }
                })?;
                Self::from_tcp(stream)
            }
            #[cfg(unix)]
            (SocketFamily::Unix, SocketTarget::Text(path)) => {
                let stream = UnixStream::connect(path).map_err(|source| {
                    ConnectionError::Connect { target: path.clone(), source }
                })?;
                Self::from_unix(stream)
            }
            #[cfg(not(unix))]
            (SocketFamily::Unix, SocketTarget::Text(_)) => Err(ConnectionError::UnixUnsupported),
            (SocketFamily::Unix, other) => Err(ConnectionError::BadAddress(other.clone())),
        }
    }

    /// Wrap an already-connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Result<Self, ConnectionError> {
        stream.set_nodelay(true).ok();
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Self::assemble(reader, writer, Endpoint::Tcp(stream)))
    }

    /// Wrap an already-connected Unix-domain stream.
    #[cfg(unix)]
    pub fn from_unix(stream: UnixStream) -> Result<Self, ConnectionError> {
        let reader = stream.try_clone()?;
        let writer = stream.try_clone()?;
        Ok(Self::assemble(reader, writer, Endpoint::Unix(stream)))
    }

    fn assemble<R, W>(reader: R, writer: W, endpoint: Endpoint) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self {
            reader: Some(LineReader { inner: Box::new(BufReader::new(reader)) }),
            writer: Box::new(writer),
            endpoint,
            closed: false,
        }
    }

    /// Hand out the read half. Only the first call returns it.
    pub fn take_reader(&mut self) -> Option<LineReader> {
        self.reader.take()
    }

    /// Check if `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Write raw text and flush. Failures are logged, never returned:
    /// a vanished peer must not take the host down.
    pub fn send(&mut self, text: &str) {
        if self.closed {
            return;
        }
        let result = self
            .writer
            .write_all(text.as_bytes())
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            debug!("Write to player failed: {}", e);
        }
    }

    /// Write `text` followed by a newline.
    pub fn send_line(&mut self, text: &str) {
        self.send(&format!("{text}\n"));
    }

    /// Release the endpoint. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match &mut self.endpoint {
            Endpoint::Process(child) => {
                if let Err(e) = child.kill() {
                    debug!("Kill of player process {} failed: {}", child.id(), e);
                }
                let _ = child.wait();
            }
            Endpoint::Tcp(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
            #[cfg(unix)]
            Endpoint::Unix(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.endpoint {
            Endpoint::Process(_) => "process",
            Endpoint::Tcp(_) => "tcp",
            #[cfg(unix)]
            Endpoint::Unix(_) => "unix",
        };
        f.debug_struct("Connection")
            .field("kind", &kind)
            .field("closed", &self.closed)
            .finish()
    }
}
