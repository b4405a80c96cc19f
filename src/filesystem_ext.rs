use std::{
    io,
    path::{Component, Path, PathBuf},
};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    filesystem::{join_remote, remote_file_name, RemoteDirEntry, RemoteFilesystem},
    walk::{Walk, WalkOptions},
};

/// Mode used by [`RemoteFilesystemExt::mkdir`] callers that have no opinion.
pub const DEFAULT_DIR_MODE: u32 = 0o777;

/// Path-level helpers layered on top of the raw [`RemoteFilesystem`] primitives.
#[async_trait]
pub trait RemoteFilesystemExt: RemoteFilesystem {
    /// True if `path` is a directory, following symlinks. Missing or
    /// inaccessible paths are not directories.
    async fn isdir(&self, path: &str) -> io::Result<bool>;

    /// True if `path` is a regular file, following symlinks.
    async fn isfile(&self, path: &str) -> io::Result<bool>;

    /// True if `path` itself is a symlink.
    async fn islink(&self, path: &str) -> io::Result<bool>;

    /// Returns `path` unchanged if it names a directory, [`Error::PathNotFound`] otherwise.
    async fn verify_path(&self, path: &str) -> Result<String>;

    async fn listdir(&self, path: &str) -> io::Result<Vec<String>>;

    async fn listdir_attr(&self, path: &str) -> io::Result<Vec<RemoteDirEntry>>;

    /// The listing is fetched in full before the iterator is handed out; call
    /// again to observe later changes.
    async fn listdir_iter(&self, path: &str) -> io::Result<std::vec::IntoIter<RemoteDirEntry>>;

    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()>;

    /// Creates `path` unless it already is a directory, in which case nothing is sent.
    ///
    /// The existence check and the creation are separate round trips; a
    /// directory created by someone else in between makes this fail. Any
    /// `mode` other than [`DEFAULT_DIR_MODE`] is applied with a separate chmod,
    /// so it is not reduced by the server's umask. If that chmod fails the new
    /// directory is removed again.
    async fn mkdir(&self, path: &str, mode: u32) -> Result<()>;

    fn walk<'a>(&'a self, top: &str, options: WalkOptions) -> Walk<'a, Self>;

    /// Fetches `remote_file` into the directory `local_path`, creating that
    /// directory and its parents first. Returns the local file written.
    async fn download(&self, remote_file: &str, local_path: &Path) -> Result<PathBuf>;

    /// Puts `local_file` into the existing remote directory `remote_path`
    /// under its own file name. Returns the remote path written.
    async fn upload(&self, local_file: &Path, remote_path: &str) -> Result<String>;

    /// Uploads the contents of `local_path` into `remote_path`, recursing into
    /// subdirectories and creating their remote counterparts. Symlinks to
    /// files are uploaded as files; symlinked directories are skipped. Returns
    /// the number of files uploaded.
    async fn upload_dir(&self, local_path: &Path, remote_path: &str) -> Result<usize>;

    /// Downloads the contents of `remote_path` into `local_path`, recreating
    /// the directory structure. Symlinked directories are not entered. A name
    /// from the server that is not a single plain path component fails the
    /// download with [`io::ErrorKind::InvalidData`]. Returns the number of
    /// files downloaded.
    async fn download_dir(&self, remote_path: &str, local_path: &Path) -> Result<usize>;
}

#[async_trait]
impl<F> RemoteFilesystemExt for F
where
    F: RemoteFilesystem + ?Sized,
{
    async fn isdir(&self, path: &str) -> io::Result<bool> {
        absent_as_false(self.metadata(path).await.map(|metadata| metadata.is_dir()))
    }

    async fn isfile(&self, path: &str) -> io::Result<bool> {
        absent_as_false(self.metadata(path).await.map(|metadata| metadata.is_file()))
    }

    async fn islink(&self, path: &str) -> io::Result<bool> {
        absent_as_false(self.symlink_metadata(path).await.map(|metadata| metadata.is_symlink()))
    }

    async fn verify_path(&self, path: &str) -> Result<String> {
        if self.isdir(path).await? {
            Ok(path.to_string())
        } else {
            Err(Error::PathNotFound(path.to_string()))
        }
    }

    async fn listdir(&self, path: &str) -> io::Result<Vec<String>> {
        let entries = self.list_dir(path).await?;
        Ok(entries.into_iter().map(|entry| entry.name().to_string()).collect())
    }

    async fn listdir_attr(&self, path: &str) -> io::Result<Vec<RemoteDirEntry>> {
        self.list_dir(path).await
    }

    async fn listdir_iter(&self, path: &str) -> io::Result<std::vec::IntoIter<RemoteDirEntry>> {
        Ok(self.list_dir(path).await?.into_iter())
    }

    async fn chmod(&self, path: &str, mode: u32) -> io::Result<()> {
        self.set_permissions(path, mode).await
    }

    async fn mkdir(&self, path: &str, mode: u32) -> Result<()> {
        match self.verify_path(path).await {
            Ok(_) => {
                debug!("{} already exists, not creating it", path);
                Ok(())
            }
            Err(Error::PathNotFound(_)) => {
                debug!("creating remote directory {} with mode {:o}", path, mode);
                self.create_dir(path).await?;
                if mode == DEFAULT_DIR_MODE {
                    return Ok(());
                }
                if let Err(err) = self.set_permissions(path, mode).await {
                    warn!("chmod {:o} on new directory {} failed, removing it", mode, path);
                    if let Err(cleanup) = self.remove_dir(path).await {
                        debug!("removing {} failed: {}", path, cleanup);
                    }
                    return Err(err.into());
                }
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn walk<'a>(&'a self, top: &str, options: WalkOptions) -> Walk<'a, Self> {
        Walk::new(self, top, options)
    }

    async fn download(&self, remote_file: &str, local_path: &Path) -> Result<PathBuf> {
        let file_name = remote_file_name(remote_file);
        if file_name.is_empty() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("remote path has no file name: {}", remote_file),
            )));
        }

        tokio::fs::create_dir_all(local_path).await?;
        let target = local_path.join(file_name);
        let bytes = self.get(remote_file, &target).await?;
        debug!("downloaded {} to {:?} ({} bytes)", remote_file, target, bytes);
        Ok(target)
    }

    async fn upload(&self, local_file: &Path, remote_path: &str) -> Result<String> {
        let Some(file_name) = local_file.file_name() else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("local path has no file name: {:?}", local_file),
            )));
        };

        let target = join_remote(remote_path, &file_name.to_string_lossy());
        let bytes = self.put(local_file, &target).await?;
        debug!("uploaded {:?} to {} ({} bytes)", local_file, target, bytes);
        Ok(target)
    }

    async fn upload_dir(&self, local_path: &Path, remote_path: &str) -> Result<usize> {
        let mut uploaded = 0;
        let mut work = vec![(local_path.to_path_buf(), remote_path.to_string())];

        while let Some((local_dir, remote_dir)) = work.pop() {
            let mut read_dir = tokio::fs::read_dir(&local_dir).await?;
            let mut children = Vec::new();
            while let Some(entry) = read_dir.next_entry().await? {
                children.push(entry.path());
            }
            children.sort();

            for child in children {
                let mut metadata = tokio::fs::symlink_metadata(&child).await?;
                if metadata.is_symlink() {
                    metadata = tokio::fs::metadata(&child).await?;
                    if metadata.is_dir() {
                        warn!("skipping {:?}: symlinked directory", child);
                        continue;
                    }
                }
                if metadata.is_file() {
                    self.upload(&child, &remote_dir).await?;
                    uploaded += 1;
                } else if metadata.is_dir() {
                    let Some(name) = child.file_name() else {
                        continue;
                    };
                    let remote_child = join_remote(&remote_dir, &name.to_string_lossy());
                    self.mkdir(&remote_child, DEFAULT_DIR_MODE).await?;
                    work.push((child, remote_child));
                } else {
                    warn!("skipping {:?}: neither a file nor a directory", child);
                }
            }
        }

        Ok(uploaded)
    }

    async fn download_dir(&self, remote_path: &str, local_path: &Path) -> Result<usize> {
        let mut downloaded = 0;
        let mut first_error: Option<io::Error> = None;

        {
            let mut walk = self.walk(remote_path, WalkOptions::new()).on_error(|err| {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            });

            while let Some(entry) = walk.next().await {
                let relative = entry
                    .path
                    .strip_prefix(remote_path)
                    .unwrap_or_default()
                    .trim_start_matches('/');
                let mut local_dir = local_path.to_path_buf();
                for segment in relative.split('/').filter(|segment| !segment.is_empty()) {
                    local_dir.push(plain_component(segment)?);
                }
                tokio::fs::create_dir_all(&local_dir).await?;

                for file in &entry.files {
                    let target = local_dir.join(plain_component(file)?);
                    self.get(&join_remote(&entry.path, file), &target).await?;
                    downloaded += 1;
                }
            }
        }

        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(downloaded),
        }
    }
}

fn plain_component(name: &str) -> io::Result<&str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains('/') => Ok(name),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("refusing remote name {:?}", name),
        )),
    }
}

fn absent_as_false(result: io::Result<bool>) -> io::Result<bool> {
    match result {
        Ok(value) => Ok(value),
        Err(err) if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied) => Ok(false),
        Err(err) => Err(err),
    }
}
