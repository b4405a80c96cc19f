use std::{io, time::Duration};

use bytes::Bytes;
use russh::{client::Msg, Channel, ChannelMsg};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, trace, warn};

use crate::{
    command::shell_command,
    error::Result,
    response::{ChannelReader, Response},
};

use super::Session;

type StreamSender = UnboundedSender<io::Result<Bytes>>;

impl Session {
    /// Runs `command` on a fresh exec channel.
    ///
    /// The command is sent as is: nothing is quoted. A failing command is not an
    /// error here; inspect the returned [`Response`]. `timeout` applies to each
    /// wait for channel activity, after which both streams fail with
    /// [`io::ErrorKind::TimedOut`].
    pub async fn execute(&self, command: &str, timeout: Option<Duration>) -> Result<Response> {
        self.ensure_open()?;
        debug!("executing `{}` on {}", command, self.host);

        let channel = self.handle.channel_open_session().await?;
        channel.exec(true, command).await?;

        let (stdout_sender, stdout) = ChannelReader::channel();
        let (stderr_sender, stderr) = ChannelReader::channel();
        let exit_task = tokio::spawn(pump_channel(channel, stdout_sender, stderr_sender, timeout));

        Ok(Response::from_streams(command, stdout, stderr).with_exit_task(exit_task))
    }

    /// Like [`Session::execute`], with every argument shell-escaped.
    pub async fn execute_args<I, S>(&self, program: &str, args: I, timeout: Option<Duration>) -> Result<Response>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let command = shell_command(program, args);
        self.execute(&command, timeout).await
    }
}

async fn pump_channel(
    mut channel: Channel<Msg>,
    stdout: StreamSender,
    stderr: StreamSender,
    timeout: Option<Duration>,
) -> Option<u32> {
    let mut exit_status = None;

    loop {
        let message = match timeout {
            Some(limit) => match tokio::time::timeout(limit, channel.wait()).await {
                Ok(message) => message,
                Err(_) => {
                    warn!("no channel activity for {:?}, giving up on command", limit);
                    let _ = stdout.send(Err(timed_out(limit)));
                    let _ = stderr.send(Err(timed_out(limit)));
                    let _ = channel.close().await;
                    return exit_status;
                }
            },
            None => channel.wait().await,
        };

        match message {
            None => break,
            Some(ChannelMsg::Data { data }) => {
                let _ = stdout.send(Ok(Bytes::copy_from_slice(&data)));
            }
            Some(ChannelMsg::ExtendedData { data, ext: 1 }) => {
                let _ = stderr.send(Ok(Bytes::copy_from_slice(&data)));
            }
            Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                exit_status = Some(status);
            }
            Some(_) => {}
        }
    }

    trace!("exec channel closed with status {:?}", exit_status);
    exit_status
}

fn timed_out(limit: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("no channel activity for {:?}", limit),
    )
}
