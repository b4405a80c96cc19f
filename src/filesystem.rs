use std::{io, path::Path};

use async_trait::async_trait;

const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_DIR: u32 = 0o040000;
const MODE_FILE: u32 = 0o100000;
const MODE_SYMLINK: u32 = 0o120000;

/// The file-transfer primitives every helper in this crate is written against.
///
/// Remote paths are plain POSIX strings, local paths are [`Path`]s. A missing
/// remote item is reported as [`io::ErrorKind::NotFound`].
#[async_trait]
pub trait RemoteFilesystem: Send + Sync {
    /// Lists a directory, excluding `.` and `..`.
    async fn list_dir(&self, path: &str) -> io::Result<Vec<RemoteDirEntry>>;

    /// `stat`: follows symlinks.
    async fn metadata(&self, path: &str) -> io::Result<RemoteMetadata>;

    /// `lstat`: describes the link itself.
    async fn symlink_metadata(&self, path: &str) -> io::Result<RemoteMetadata>;

    /// Creates a directory with the server's default mode.
    async fn create_dir(&self, path: &str) -> io::Result<()>;

    async fn remove_dir(&self, path: &str) -> io::Result<()>;

    async fn set_permissions(&self, path: &str, mode: u32) -> io::Result<()>;

    /// Copies a remote file to a local file, returning the number of bytes copied.
    async fn get(&self, remote_path: &str, local_path: &Path) -> io::Result<u64>;

    /// Copies a local file to a remote file, returning the number of bytes copied.
    async fn put(&self, local_path: &Path, remote_path: &str) -> io::Result<u64>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteFileType {
    File,
    Dir,
    Symlink,
    Other,
}

impl From<u32> for RemoteFileType {
    fn from(mode: u32) -> Self {
        match mode & MODE_TYPE_MASK {
            MODE_DIR => RemoteFileType::Dir,
            MODE_FILE => RemoteFileType::File,
            MODE_SYMLINK => RemoteFileType::Symlink,
            _ => RemoteFileType::Other,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub size: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Full `st_mode`, type bits included.
    pub permissions: Option<u32>,
    pub atime: Option<u32>,
    pub mtime: Option<u32>,
}

impl RemoteMetadata {
    pub fn with_mode(mode: u32) -> RemoteMetadata {
        RemoteMetadata {
            permissions: Some(mode),
            ..Default::default()
        }
    }

    pub fn file_type(&self) -> RemoteFileType {
        match self.permissions {
            Some(mode) => RemoteFileType::from(mode),
            None => RemoteFileType::Other,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == RemoteFileType::Dir
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == RemoteFileType::File
    }

    pub fn is_symlink(&self) -> bool {
        self.file_type() == RemoteFileType::Symlink
    }

    /// Permission bits only.
    pub fn mode(&self) -> Option<u32> {
        self.permissions.map(|mode| mode & 0o7777)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDirEntry {
    name: String,
    metadata: RemoteMetadata,
}

impl RemoteDirEntry {
    pub fn new(name: impl Into<String>, metadata: RemoteMetadata) -> RemoteDirEntry {
        RemoteDirEntry {
            name: name.into(),
            metadata,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata(&self) -> &RemoteMetadata {
        &self.metadata
    }

    pub fn file_type(&self) -> RemoteFileType {
        self.metadata.file_type()
    }
}

/// Joins two remote path components the way `posixpath.join` does: an absolute
/// `name` replaces `dir`.
pub fn join_remote(dir: &str, name: &str) -> String {
    if name.starts_with('/') || dir.is_empty() {
        return name.to_string();
    }
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Final component of a remote path; empty when the path ends with `/`.
pub fn remote_file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[index + 1..],
        None => path,
    }
}
