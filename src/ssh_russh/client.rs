use std::{io, ops::Deref, sync::Arc};

use russh_sftp::client::SftpSession;

use crate::error::{Result, SessionClosed};

use super::{connection::ConnectOptions, filesystem::sftp_to_io, Session};

/// A [`Session`] with its SFTP sub-client opened up front.
///
/// The path helpers come from [`RemoteFilesystemExt`](crate::RemoteFilesystemExt);
/// everything a session does is reachable through `Deref`. Once the session is
/// closed every file operation fails with [`io::ErrorKind::NotConnected`],
/// which converts into [`Error::Closed`](crate::Error::Closed).
pub struct Client {
    session: Session,
    pub(super) sftp: Arc<SftpSession>,
}

impl Client {
    pub async fn connect(options: ConnectOptions) -> Result<Client> {
        let session = Session::connect(options).await?;
        Client::from_session(session).await
    }

    pub async fn from_session(session: Session) -> Result<Client> {
        let sftp = session.sftp().await?;
        Ok(Client { session, sftp })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sftp(&self) -> &SftpSession {
        &self.sftp
    }

    pub async fn exists(&self, path: &str) -> io::Result<bool> {
        self.check_open()?;
        self.sftp.try_exists(path).await.map_err(sftp_to_io)
    }

    pub async fn rename(&self, old_path: &str, new_path: &str) -> io::Result<()> {
        self.check_open()?;
        self.sftp.rename(old_path, new_path).await.map_err(sftp_to_io)
    }

    pub async fn remove_file(&self, path: &str) -> io::Result<()> {
        self.check_open()?;
        self.sftp.remove_file(path).await.map_err(sftp_to_io)
    }

    pub async fn read_link(&self, path: &str) -> io::Result<String> {
        self.check_open()?;
        self.sftp.read_link(path).await.map_err(sftp_to_io)
    }

    pub async fn canonicalize(&self, path: &str) -> io::Result<String> {
        self.check_open()?;
        self.sftp.canonicalize(path).await.map_err(sftp_to_io)
    }

    pub(super) fn check_open(&self) -> io::Result<()> {
        if self.session.is_closed() {
            return Err(SessionClosed::into_io());
        }
        Ok(())
    }
}

impl Deref for Client {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.session
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Client [{}]", self.session.host())
    }
}
