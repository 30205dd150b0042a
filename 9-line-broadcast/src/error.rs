use std::{fmt, io};

/// Failures local to a single client connection.
///
/// Neither variant is fatal to the server: a protocol error drops the
/// connection attempt, an I/O error removes an established connection.
#[derive(Debug)]
pub enum ConnectionError {
    /// The peer broke the line protocol, e.g. left before sending a username.
    Protocol(&'static str),
    /// The socket failed or was already closed.
    Io(io::Error),
}

impl ConnectionError {
    pub(crate) fn closed() -> Self {
        Self::Io(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "connection already closed",
        ))
    }

    pub(crate) fn timed_out() -> Self {
        Self::Io(io::Error::new(io::ErrorKind::TimedOut, "write timed out"))
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(reason) => write!(f, "protocol error: {reason}"),
            Self::Io(err) => write!(f, "i/o error: {err}"),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(_) => None,
            Self::Io(err) => Some(err),
        }
    }
}

impl From<io::Error> for ConnectionError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
