use std::{io, path::Path};

use async_trait::async_trait;
use russh_sftp::{
    client::{error::Error as SftpError, fs::Metadata},
    protocol::StatusCode,
};
use tokio::io::AsyncWriteExt;
use tracing::trace;

use crate::filesystem::{RemoteDirEntry, RemoteFilesystem, RemoteMetadata};

use super::client::Client;

#[async_trait]
impl RemoteFilesystem for Client {
    async fn list_dir(&self, path: &str) -> io::Result<Vec<RemoteDirEntry>> {
        self.check_open()?;
        let read_dir = self.sftp.read_dir(path).await.map_err(sftp_to_io)?;
        Ok(read_dir
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| RemoteDirEntry::new(entry.file_name(), RemoteMetadata::from(entry.metadata())))
            .collect())
    }

    async fn metadata(&self, path: &str) -> io::Result<RemoteMetadata> {
        self.check_open()?;
        let metadata = self.sftp.metadata(path).await.map_err(sftp_to_io)?;
        Ok(metadata.into())
    }

    async fn symlink_metadata(&self, path: &str) -> io::Result<RemoteMetadata> {
        self.check_open()?;
        let metadata = self.sftp.symlink_metadata(path).await.map_err(sftp_to_io)?;
        Ok(metadata.into())
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        self.check_open()?;
        self.sftp.create_dir(path).await.map_err(sftp_to_io)
    }

    async fn remove_dir(&self, path: &str) -> io::Result<()> {
        self.check_open()?;
        self.sftp.remove_dir(path).await.map_err(sftp_to_io)
    }

    async fn set_permissions(&self, path: &str, mode: u32) -> io::Result<()> {
        self.check_open()?;
        self.sftp
            .set_metadata(
                path,
                Metadata {
                    size: None,
                    uid: None,
                    user: None,
                    gid: None,
                    group: None,
                    permissions: Some(mode),
                    atime: None,
                    mtime: None,
                },
            )
            .await
            .map_err(sftp_to_io)
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> io::Result<u64> {
        self.check_open()?;
        let mut remote = self.sftp.open(remote_path).await.map_err(sftp_to_io)?;
        let mut local = tokio::fs::File::create(local_path).await?;
        let bytes = tokio::io::copy(&mut remote, &mut local).await?;
        local.flush().await?;
        trace!("copied {} bytes from {} to {:?}", bytes, remote_path, local_path);
        Ok(bytes)
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> io::Result<u64> {
        self.check_open()?;
        let mut local = tokio::fs::File::open(local_path).await?;
        let mut remote = self.sftp.create(remote_path).await.map_err(sftp_to_io)?;
        let bytes = tokio::io::copy(&mut local, &mut remote).await?;
        remote.shutdown().await?;
        trace!("copied {} bytes from {:?} to {}", bytes, local_path, remote_path);
        Ok(bytes)
    }
}

impl From<Metadata> for RemoteMetadata {
    fn from(metadata: Metadata) -> Self {
        RemoteMetadata {
            size: metadata.size,
            uid: metadata.uid,
            gid: metadata.gid,
            permissions: metadata.permissions,
            atime: metadata.atime,
            mtime: metadata.mtime,
        }
    }
}

pub(super) fn sftp_to_io(err: SftpError) -> io::Error {
    let kind = match &err {
        SftpError::Status(status) => match status.status_code {
            StatusCode::NoSuchFile => io::ErrorKind::NotFound,
            StatusCode::PermissionDenied => io::ErrorKind::PermissionDenied,
            _ => io::ErrorKind::Other,
        },
        SftpError::Timeout => io::ErrorKind::TimedOut,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}
