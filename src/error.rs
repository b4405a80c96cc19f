use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: russh::Error,
    },
    #[error("connecting to {host}:{port} timed out")]
    ConnectTimeout { host: String, port: u16 },
    #[error("authentication failed for user {0}")]
    AuthenticationFailed(String),
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),
    #[error("sftp error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),
    #[error("path does not exist: {0}")]
    PathNotFound(String),
    #[error("session is closed")]
    Closed,
    #[error(transparent)]
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Carried inside an [`io::Error`] by filesystem primitives called on a closed
/// session, so the conversion back into [`Error`] yields [`Error::Closed`].
#[derive(Debug, Error)]
#[error("session is closed")]
pub(crate) struct SessionClosed;

impl SessionClosed {
    pub(crate) fn into_io() -> io::Error {
        io::Error::new(io::ErrorKind::NotConnected, SessionClosed)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<SessionClosed>()) {
            return Error::Closed;
        }
        Error::Io(err)
    }
}
