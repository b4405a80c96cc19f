use std::{
    fmt, io,
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, ReadBuf},
    sync::{mpsc, Mutex, OnceCell},
    task::JoinHandle,
};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

type ReadOutcome = std::result::Result<String, (io::ErrorKind, String)>;

/// The captured output of one remote command.
///
/// Both streams are read to their end at most once; the decoded, trimmed text
/// is cached from then on. A read that fails is cached too, so later calls
/// return the same error instead of reading the drained stream again. [`Response::ok`] only looks at standard error, so a
/// command that succeeds while printing diagnostics there is reported as not
/// ok. Use [`Response::exit_status`] when the exit code matters.
pub struct Response {
    command: String,
    stdout: Mutex<BoxedReader>,
    stderr: Mutex<BoxedReader>,
    stdout_text: OnceCell<ReadOutcome>,
    stderr_text: OnceCell<ReadOutcome>,
    ok: OnceCell<bool>,
    exit_task: Mutex<Option<JoinHandle<Option<u32>>>>,
    exit_status: OnceCell<Option<u32>>,
}

impl Response {
    pub fn from_streams(
        command: impl Into<String>,
        stdout: impl AsyncRead + Send + Unpin + 'static,
        stderr: impl AsyncRead + Send + Unpin + 'static,
    ) -> Response {
        Response {
            command: command.into(),
            stdout: Mutex::new(Box::new(stdout)),
            stderr: Mutex::new(Box::new(stderr)),
            stdout_text: OnceCell::new(),
            stderr_text: OnceCell::new(),
            ok: OnceCell::new(),
            exit_task: Mutex::new(None),
            exit_status: OnceCell::new(),
        }
    }

    pub(crate) fn with_exit_task(mut self, exit_task: JoinHandle<Option<u32>>) -> Response {
        self.exit_task = Mutex::new(Some(exit_task));
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub async fn stdout_text(&self) -> io::Result<&str> {
        replay(self.stdout_text.get_or_init(|| read_text(&self.stdout)).await)
    }

    pub async fn stderr_text(&self) -> io::Result<&str> {
        replay(self.stderr_text.get_or_init(|| read_text(&self.stderr)).await)
    }

    /// True iff the trimmed standard error is empty.
    pub async fn ok(&self) -> io::Result<bool> {
        self.ok
            .get_or_try_init(|| async { Ok::<_, io::Error>(self.stderr_text().await?.is_empty()) })
            .await
            .copied()
    }

    /// Waits for the remote side to close the channel. `None` when no status was
    /// sent or the response was not produced by a channel.
    pub async fn exit_status(&self) -> io::Result<Option<u32>> {
        self.exit_status
            .get_or_try_init(|| async {
                let Some(task) = self.exit_task.lock().await.take() else {
                    return Ok(None);
                };
                task.await.map_err(io::Error::other)
            })
            .await
            .copied()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.command.is_empty() {
            write!(f, "Response")
        } else {
            write!(f, "Response [{}]", self.command)
        }
    }
}

async fn read_text(stream: &Mutex<BoxedReader>) -> ReadOutcome {
    let mut reader = stream.lock().await;
    let mut buffer = Vec::new();
    match reader.read_to_end(&mut buffer).await {
        Ok(_) => Ok(String::from_utf8_lossy(&buffer).trim().to_string()),
        Err(err) => Err((err.kind(), err.to_string())),
    }
}

fn replay(outcome: &ReadOutcome) -> io::Result<&str> {
    match outcome {
        Ok(text) => Ok(text.as_str()),
        Err((kind, message)) => Err(io::Error::new(*kind, message.clone())),
    }
}

/// Reader side of one exec channel stream, fed chunk by chunk by the channel pump.
pub struct ChannelReader {
    receiver: mpsc::UnboundedReceiver<io::Result<Bytes>>,
    pending: Bytes,
}

impl ChannelReader {
    pub fn channel() -> (mpsc::UnboundedSender<io::Result<Bytes>>, ChannelReader) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            sender,
            ChannelReader {
                receiver,
                pending: Bytes::new(),
            },
        )
    }
}

impl AsyncRead for ChannelReader {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let len = this.pending.len().min(buf.remaining());
                buf.put_slice(&this.pending.split_to(len));
                return Poll::Ready(Ok(()));
            }
            match ready!(this.receiver.poll_recv(cx)) {
                Some(Ok(chunk)) => this.pending = chunk,
                Some(Err(err)) => return Poll::Ready(Err(err)),
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}
