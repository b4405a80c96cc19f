use std::io;

use futures_util::Stream;
use tracing::trace;

use crate::{
    filesystem::{join_remote, RemoteFilesystem},
    filesystem_ext::RemoteFilesystemExt,
};

pub type ErrorCallback<'a> = Box<dyn FnMut(io::Error) + Send + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    topdown: bool,
    followlinks: bool,
}

impl Default for WalkOptions {
    fn default() -> Self {
        WalkOptions {
            topdown: true,
            followlinks: false,
        }
    }
}

impl WalkOptions {
    pub fn new() -> WalkOptions {
        WalkOptions::default()
    }

    /// Yield a directory before (`true`) or after (`false`) its subdirectories.
    pub fn topdown(mut self, topdown: bool) -> Self {
        self.topdown = topdown;
        self
    }

    pub fn followlinks(mut self, followlinks: bool) -> Self {
        self.followlinks = followlinks;
        self
    }

    pub fn is_topdown(&self) -> bool {
        self.topdown
    }

    pub fn is_followlinks(&self) -> bool {
        self.followlinks
    }
}

/// One visited directory: its path, the names of its subdirectories and the
/// names of everything else in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: String,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

struct Frame {
    entry: WalkEntry,
    next_child: usize,
}

/// Depth-first traversal of a remote tree.
///
/// Each step performs one listing round trip for the directory being expanded
/// and one `isdir` round trip per entry in it, plus one `islink` round trip per
/// subdirectory when links are not followed. A directory that cannot be listed
/// or classified is reported to the error callback and contributes nothing;
/// traversal continues with its siblings. There is no cycle detection beyond
/// the symlink guard.
pub struct Walk<'a, F>
where
    F: RemoteFilesystem + ?Sized,
{
    filesystem: &'a F,
    options: WalkOptions,
    on_error: Option<ErrorCallback<'a>>,
    pending: Option<String>,
    stack: Vec<Frame>,
}

impl<'a, F> Walk<'a, F>
where
    F: RemoteFilesystem + ?Sized,
{
    pub fn new(filesystem: &'a F, top: &str, options: WalkOptions) -> Walk<'a, F> {
        Walk {
            filesystem,
            options,
            on_error: None,
            pending: Some(top.to_string()),
            stack: Vec::new(),
        }
    }

    /// Without a callback, errors are dropped and the failing subtree is silently omitted.
    pub fn on_error(mut self, callback: impl FnMut(io::Error) + Send + 'a) -> Self {
        self.on_error = Some(Box::new(callback));
        self
    }

    pub async fn next(&mut self) -> Option<WalkEntry> {
        loop {
            if let Some(path) = self.pending.take() {
                match expand(self.filesystem, path).await {
                    Ok(entry) => {
                        let yielded = self.options.topdown.then(|| entry.clone());
                        self.stack.push(Frame { entry, next_child: 0 });
                        if yielded.is_some() {
                            return yielded;
                        }
                    }
                    Err(err) => self.report(err),
                }
                continue;
            }

            let frame = self.stack.last_mut()?;
            if frame.next_child < frame.entry.dirs.len() {
                let child = join_remote(&frame.entry.path, &frame.entry.dirs[frame.next_child]);
                frame.next_child += 1;

                if self.options.followlinks {
                    self.pending = Some(child);
                    continue;
                }
                match self.filesystem.islink(&child).await {
                    Ok(false) => self.pending = Some(child),
                    Ok(true) => trace!("not descending into symlink {}", child),
                    Err(err) => self.report(err),
                }
                continue;
            }

            let frame = self.stack.pop()?;
            if !self.options.topdown {
                return Some(frame.entry);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = WalkEntry> + 'a {
        futures_util::stream::unfold(self, |mut walk| async move {
            walk.next().await.map(|entry| (entry, walk))
        })
    }

    fn report(&mut self, err: io::Error) {
        trace!("walk error: {}", err);
        if let Some(callback) = self.on_error.as_mut() {
            callback(err);
        }
    }
}

async fn expand<F>(filesystem: &F, path: String) -> io::Result<WalkEntry>
where
    F: RemoteFilesystem + ?Sized,
{
    let names = filesystem.listdir(&path).await?;
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for name in names {
        if filesystem.isdir(&join_remote(&path, &name)).await? {
            dirs.push(name);
        } else {
            files.push(name);
        }
    }

    Ok(WalkEntry { path, dirs, files })
}
