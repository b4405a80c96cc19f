use std::{
    collections::{BTreeMap, HashSet},
    io,
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use crate::{
    error::SessionClosed,
    filesystem::{join_remote, RemoteDirEntry, RemoteFilesystem, RemoteMetadata},
};

#[derive(Debug, Clone)]
enum Node {
    Dir { mode: u32 },
    File { mode: u32, content: Vec<u8> },
    Symlink { target: String },
}

impl Node {
    fn metadata(&self) -> RemoteMetadata {
        match self {
            Node::Dir { mode } => RemoteMetadata::with_mode(0o040000 | mode),
            Node::File { mode, content } => RemoteMetadata {
                size: Some(content.len() as u64),
                ..RemoteMetadata::with_mode(0o100000 | mode)
            },
            Node::Symlink { .. } => RemoteMetadata::with_mode(0o120777),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Calls {
    pub list_dir: usize,
    pub metadata: usize,
    pub symlink_metadata: usize,
    pub create_dir: usize,
    pub remove_dir: usize,
    pub set_permissions: usize,
    pub get: usize,
    pub put: usize,
}

/// In-memory remote tree with per-primitive call counters.
#[derive(Default)]
pub struct MockFilesystem {
    nodes: Mutex<BTreeMap<String, Node>>,
    failing_listings: Mutex<HashSet<String>>,
    failing_chmods: Mutex<HashSet<String>>,
    closed: AtomicBool,
    calls: Mutex<Calls>,
}

impl MockFilesystem {
    pub fn new() -> MockFilesystem {
        MockFilesystem::default()
    }

    pub fn add_dir(&self, path: &str) {
        self.insert(path, Node::Dir { mode: 0o755 });
    }

    pub fn add_file(&self, path: &str, content: &[u8]) {
        self.insert(
            path,
            Node::File {
                mode: 0o644,
                content: content.to_vec(),
            },
        );
    }

    pub fn add_symlink(&self, path: &str, target: &str) {
        self.insert(
            path,
            Node::Symlink {
                target: target.to_string(),
            },
        );
    }

    pub fn fail_listing(&self, path: &str) {
        self.failing_listings.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_chmod(&self, path: &str) {
        self.failing_chmods.lock().unwrap().insert(path.to_string());
    }

    /// Every primitive fails afterwards the way a closed session does.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Calls {
        *self.calls.lock().unwrap()
    }

    pub fn file_content(&self, path: &str) -> Option<Vec<u8>> {
        let resolved = self.resolve(path)?;
        match self.nodes.lock().unwrap().get(&resolved) {
            Some(Node::File { content, .. }) => Some(content.clone()),
            _ => None,
        }
    }

    fn insert(&self, path: &str, node: Node) {
        self.nodes.lock().unwrap().insert(path.to_string(), node);
    }

    fn count(&self, update: impl FnOnce(&mut Calls)) -> io::Result<()> {
        update(&mut self.calls.lock().unwrap());
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionClosed::into_io());
        }
        Ok(())
    }

    /// Resolves symlinks in every component of `path`.
    fn resolve(&self, path: &str) -> Option<String> {
        let nodes = self.nodes.lock().unwrap();
        let mut current = String::new();
        for component in path.split('/').filter(|c| !c.is_empty()) {
            current = join_remote(if current.is_empty() { "/" } else { &current }, component);
            let mut hops = 0;
            while let Some(Node::Symlink { target }) = nodes.get(&current) {
                current = target.clone();
                hops += 1;
                if hops > 32 {
                    return None;
                }
            }
        }
        if current.is_empty() {
            current.push('/');
        }
        Some(current)
    }

    fn resolve_parent(&self, path: &str) -> Option<String> {
        let (parent, name) = path.rsplit_once('/')?;
        let parent = self.resolve(if parent.is_empty() { "/" } else { parent })?;
        Some(join_remote(&parent, name))
    }

    fn require_dir(&self, resolved: &str) -> io::Result<()> {
        match self.nodes.lock().unwrap().get(resolved) {
            Some(Node::Dir { .. }) => Ok(()),
            Some(_) => Err(io::Error::other(format!("not a directory: {}", resolved))),
            None => Err(not_found(resolved)),
        }
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("no such file: {}", path))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(index) => &path[..index],
        None => "",
    }
}

#[async_trait]
impl RemoteFilesystem for MockFilesystem {
    async fn list_dir(&self, path: &str) -> io::Result<Vec<RemoteDirEntry>> {
        self.count(|calls| calls.list_dir += 1)?;
        if self.failing_listings.lock().unwrap().contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot list {}", path),
            ));
        }
        let resolved = self.resolve(path).ok_or_else(|| not_found(path))?;
        self.require_dir(&resolved)?;

        let prefix = join_remote(&resolved, "");
        let nodes = self.nodes.lock().unwrap();
        Ok(nodes
            .iter()
            .filter_map(|(key, node)| {
                let name = key.strip_prefix(&prefix)?;
                (!name.is_empty() && !name.contains('/')).then(|| RemoteDirEntry::new(name, node.metadata()))
            })
            .collect())
    }

    async fn metadata(&self, path: &str) -> io::Result<RemoteMetadata> {
        self.count(|calls| calls.metadata += 1)?;
        let resolved = self.resolve(path).ok_or_else(|| not_found(path))?;
        match self.nodes.lock().unwrap().get(&resolved) {
            Some(node) => Ok(node.metadata()),
            None => Err(not_found(path)),
        }
    }

    async fn symlink_metadata(&self, path: &str) -> io::Result<RemoteMetadata> {
        self.count(|calls| calls.symlink_metadata += 1)?;
        let resolved = self.resolve_parent(path).ok_or_else(|| not_found(path))?;
        match self.nodes.lock().unwrap().get(&resolved) {
            Some(node) => Ok(node.metadata()),
            None => Err(not_found(path)),
        }
    }

    async fn create_dir(&self, path: &str) -> io::Result<()> {
        self.count(|calls| calls.create_dir += 1)?;
        let resolved = self.resolve_parent(path).ok_or_else(|| not_found(path))?;
        self.require_dir(parent_of(&resolved))?;
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.contains_key(&resolved) {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, resolved));
        }
        nodes.insert(resolved, Node::Dir { mode: 0o755 });
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> io::Result<()> {
        self.count(|calls| calls.remove_dir += 1)?;
        let resolved = self.resolve_parent(path).ok_or_else(|| not_found(path))?;
        self.require_dir(&resolved)?;
        let prefix = join_remote(&resolved, "");
        let mut nodes = self.nodes.lock().unwrap();
        if nodes.keys().any(|key| key.starts_with(&prefix)) {
            return Err(io::Error::other(format!("directory not empty: {}", resolved)));
        }
        nodes.remove(&resolved);
        Ok(())
    }

    async fn set_permissions(&self, path: &str, new_mode: u32) -> io::Result<()> {
        self.count(|calls| calls.set_permissions += 1)?;
        if self.failing_chmods.lock().unwrap().contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cannot chmod {}", path),
            ));
        }
        let resolved = self.resolve(path).ok_or_else(|| not_found(path))?;
        match self.nodes.lock().unwrap().get_mut(&resolved) {
            Some(Node::Dir { mode }) | Some(Node::File { mode, .. }) => {
                *mode = new_mode;
                Ok(())
            }
            _ => Err(not_found(path)),
        }
    }

    async fn get(&self, remote_path: &str, local_path: &Path) -> io::Result<u64> {
        self.count(|calls| calls.get += 1)?;
        let content = self.file_content(remote_path).ok_or_else(|| not_found(remote_path))?;
        tokio::fs::write(local_path, &content).await?;
        Ok(content.len() as u64)
    }

    async fn put(&self, local_path: &Path, remote_path: &str) -> io::Result<u64> {
        self.count(|calls| calls.put += 1)?;
        let content = tokio::fs::read(local_path).await?;
        let resolved = self.resolve_parent(remote_path).ok_or_else(|| not_found(remote_path))?;
        self.require_dir(parent_of(&resolved))?;
        let size = content.len() as u64;
        self.insert(&resolved, Node::File { mode: 0o644, content });
        Ok(size)
    }
}
