pub mod client;
pub mod connection;
mod executor;
mod filesystem;
pub mod terminal;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use russh::{client::Handle, Disconnect};
use russh_sftp::client::SftpSession;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use connection::{ConnectOptions, HostKeyHandler};
use terminal::Shell;

/// One authenticated SSH connection to a single host.
///
/// A session is meant to be driven from one task at a time. Call
/// [`Session::close`] on every exit path; dropping the session ends the
/// underlying connection as well.
pub struct Session {
    host: String,
    port: u16,
    handle: Handle<HostKeyHandler>,
    shell: OnceCell<Arc<Shell>>,
    sftp: OnceCell<Arc<SftpSession>>,
    closed: AtomicBool,
}

impl Session {
    pub async fn connect(options: ConnectOptions) -> Result<Session> {
        let host = options.host.clone();
        let port = options.port;
        let handle = connection::open_handle(options).await?;

        Ok(Session {
            host,
            port,
            handle,
            shell: OnceCell::new(),
            sftp: OnceCell::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The raw russh handle, for transport-level operations this type does not wrap.
    pub fn handle(&self) -> &Handle<HostKeyHandler> {
        &self.handle
    }

    /// The SFTP sub-client, opened on first use and shared afterwards.
    pub async fn sftp(&self) -> Result<Arc<SftpSession>> {
        self.ensure_open()?;
        self.sftp
            .get_or_try_init(|| async {
                debug!("opening sftp subsystem on {}", self.host);
                let channel = self.handle.channel_open_session().await?;
                channel.request_subsystem(true, "sftp").await?;
                let sftp = SftpSession::new(channel.into_stream()).await?;
                Ok::<_, Error>(Arc::new(sftp))
            })
            .await
            .cloned()
    }

    /// Closes the shell channel, then the SFTP sub-client. Only if the latter
    /// fails is the connection disconnected here. Errors are not reported; the
    /// session counts as closed afterwards either way.
    ///
    /// When the SFTP close succeeds, or no SFTP sub-client was opened, the SSH
    /// transport stays connected until the `Session` is dropped. Call
    /// [`Handle::disconnect`](russh::client::Handle::disconnect) through
    /// [`Session::handle`] to end it sooner.
    pub async fn close(&self) {
        if let Some(shell) = self.shell.get() {
            if let Err(err) = shell.close().await {
                debug!("closing shell on {} failed: {}", self.host, err);
            }
        }

        if let Some(sftp) = self.sftp.get() {
            if let Err(err) = sftp.close().await {
                debug!("closing sftp on {} failed, disconnecting: {}", self.host, err);
                if let Err(err) = self
                    .handle
                    .disconnect(Disconnect::ByApplication, "", "English")
                    .await
                {
                    debug!("disconnecting from {} failed: {}", self.host, err);
                }
            }
        }

        self.closed.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Session [{}]", self.host)
    }
}
