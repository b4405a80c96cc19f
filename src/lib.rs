pub mod command;
pub mod error;
pub mod filesystem;
pub mod filesystem_ext;
pub mod response;
pub mod ssh_russh;
pub mod walk;

#[cfg(test)]
mod test_support;

pub use error::{Error, Result};
pub use filesystem::{join_remote, RemoteDirEntry, RemoteFileType, RemoteFilesystem, RemoteMetadata};
pub use filesystem_ext::{RemoteFilesystemExt, DEFAULT_DIR_MODE};
pub use response::Response;
pub use ssh_russh::{
    client::Client,
    connection::{ConnectOptions, KnownHosts},
    terminal::{Shell, ShellEvent, ShellOptions},
    Session,
};
pub use walk::{Walk, WalkEntry, WalkOptions};
