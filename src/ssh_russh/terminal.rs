use std::{io, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use russh::{client::Msg, Channel, ChannelId, ChannelMsg};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, trace};

use crate::error::{Error, Result};

use super::Session;

/// Pseudo-terminal parameters for [`Session::invoke_shell`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOptions {
    pub terminal: String,
    pub col_width: u32,
    pub row_height: u32,
    pub pix_width: u32,
    pub pix_height: u32,
    /// Sent with `env` requests before the shell starts; servers may ignore them.
    pub environment: Vec<(String, String)>,
}

impl Default for ShellOptions {
    fn default() -> Self {
        ShellOptions {
            terminal: String::from("vt100"),
            col_width: 80,
            row_height: 24,
            pix_width: 0,
            pix_height: 0,
            environment: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellEvent {
    Data(Bytes),
    ExtendedData { ext: u32, data: Bytes },
    ExitStatus(u32),
    Eof,
}

/// The channel operations a shell pump needs.
#[async_trait]
trait ShellChannel: Send + 'static {
    async fn next_event(&mut self) -> Option<ShellEvent>;

    async fn send_data(&mut self, data: &[u8]) -> Result<()>;

    async fn change_window(&mut self, col_width: u32, row_height: u32, pix_width: u32, pix_height: u32) -> Result<()>;

    async fn close_channel(&mut self) -> Result<()>;
}

#[async_trait]
impl ShellChannel for Channel<Msg> {
    async fn next_event(&mut self) -> Option<ShellEvent> {
        loop {
            let event = match self.wait().await? {
                ChannelMsg::Data { data } => ShellEvent::Data(Bytes::copy_from_slice(&data)),
                ChannelMsg::ExtendedData { data, ext } => ShellEvent::ExtendedData {
                    ext,
                    data: Bytes::copy_from_slice(&data),
                },
                ChannelMsg::ExitStatus { exit_status } => ShellEvent::ExitStatus(exit_status),
                ChannelMsg::Eof => ShellEvent::Eof,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<()> {
        self.data(data).await?;
        Ok(())
    }

    async fn change_window(&mut self, col_width: u32, row_height: u32, pix_width: u32, pix_height: u32) -> Result<()> {
        self.window_change(col_width, row_height, pix_width, pix_height)
            .await?;
        Ok(())
    }

    async fn close_channel(&mut self) -> Result<()> {
        self.close().await?;
        Ok(())
    }
}

enum ShellCommand {
    Data(Vec<u8>, oneshot::Sender<Result<()>>),
    Resize {
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        reply: oneshot::Sender<Result<()>>,
    },
    Close(oneshot::Sender<Result<()>>),
}

/// An interactive shell channel with a pseudo-terminal attached.
///
/// A background task owns the channel. Reading waits only for output, so
/// `write`, `resize` and `close` go through while another task is blocked in
/// `read`.
pub struct Shell {
    channel_id: ChannelId,
    io: ShellIo,
}

impl Shell {
    pub fn id(&self) -> ChannelId {
        self.channel_id
    }

    pub async fn write(&self, data: &[u8]) -> Result<()> {
        self.io.write(data).await
    }

    /// Next event from the shell, or `None` once the channel is gone.
    pub async fn read(&self) -> Result<Option<ShellEvent>> {
        Ok(self.io.read().await)
    }

    pub async fn resize(&self, col_width: u32, row_height: u32, pix_width: u32, pix_height: u32) -> Result<()> {
        self.io
            .request(|reply| ShellCommand::Resize {
                col_width,
                row_height,
                pix_width,
                pix_height,
                reply,
            })
            .await
    }

    pub async fn close(&self) -> Result<()> {
        self.io.request(ShellCommand::Close).await
    }
}

/// Both ends of the queues between a [`Shell`] and its pump task.
struct ShellIo {
    commands: mpsc::UnboundedSender<ShellCommand>,
    events: Mutex<mpsc::UnboundedReceiver<ShellEvent>>,
}

impl ShellIo {
    fn spawn(channel: impl ShellChannel) -> ShellIo {
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (event_sender, events) = mpsc::unbounded_channel();
        tokio::spawn(pump_shell(channel, command_receiver, event_sender));
        ShellIo {
            commands,
            events: Mutex::new(events),
        }
    }

    async fn write(&self, data: &[u8]) -> Result<()> {
        self.request(|reply| ShellCommand::Data(data.to_vec(), reply))
            .await
    }

    async fn read(&self) -> Option<ShellEvent> {
        self.events.lock().await.recv().await
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<Result<()>>) -> ShellCommand) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.commands.send(command(reply)).map_err(|_| shell_gone())?;
        outcome.await.map_err(|_| shell_gone())?
    }
}

fn shell_gone() -> Error {
    Error::Io(io::Error::new(io::ErrorKind::BrokenPipe, "shell channel is gone"))
}

async fn pump_shell(
    mut channel: impl ShellChannel,
    mut commands: mpsc::UnboundedReceiver<ShellCommand>,
    events: mpsc::UnboundedSender<ShellEvent>,
) {
    loop {
        tokio::select! {
            event = channel.next_event() => match event {
                Some(event) => {
                    let _ = events.send(event);
                }
                None => break,
            },
            command = commands.recv() => match command {
                Some(ShellCommand::Data(data, reply)) => {
                    let _ = reply.send(channel.send_data(&data).await);
                }
                Some(ShellCommand::Resize {
                    col_width,
                    row_height,
                    pix_width,
                    pix_height,
                    reply,
                }) => {
                    let _ = reply.send(
                        channel
                            .change_window(col_width, row_height, pix_width, pix_height)
                            .await,
                    );
                }
                Some(ShellCommand::Close(reply)) => {
                    let _ = reply.send(channel.close_channel().await);
                }
                None => {
                    let _ = channel.close_channel().await;
                    break;
                }
            },
        }
    }
    trace!("shell pump finished");
}

impl Session {
    /// Starts an interactive shell. Only the first call opens a channel; later
    /// calls return that same shell and ignore `options`.
    pub async fn invoke_shell(&self, options: ShellOptions) -> Result<Arc<Shell>> {
        self.ensure_open()?;
        self.shell
            .get_or_try_init(|| async {
                debug!("opening {} shell on {}", options.terminal, self.host);
                let channel = self.handle.channel_open_session().await?;
                channel
                    .request_pty(
                        true,
                        &options.terminal,
                        options.col_width,
                        options.row_height,
                        options.pix_width,
                        options.pix_height,
                        &[],
                    )
                    .await?;
                for (name, value) in &options.environment {
                    channel.set_env(true, name.as_str(), value.as_str()).await?;
                }
                channel.request_shell(true).await?;

                let channel_id = channel.id();
                Ok::<_, Error>(Arc::new(Shell {
                    channel_id,
                    io: ShellIo::spawn(channel),
                }))
            })
            .await
            .cloned()
    }
}
