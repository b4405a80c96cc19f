use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use once_cell::sync::Lazy;
use russh::client::{self, Handle};
use russh_keys::key::PublicKey;
use tracing::{debug, warn};

use crate::error::{Error, Result};

static GLOBAL_KNOWN_HOSTS: Lazy<KnownHosts> = Lazy::new(KnownHosts::new);

pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Bounds connect, handshake and authentication together, and becomes the
    /// inactivity timeout of the connection unless `config` sets one.
    pub timeout: Option<Duration>,
    pub config: client::Config,
    pub known_hosts: KnownHosts,
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, username: impl Into<String>, password: impl Into<String>) -> ConnectOptions {
        ConnectOptions {
            host: host.into(),
            port: 22,
            username: username.into(),
            password: password.into(),
            timeout: None,
            config: client::Config::default(),
            known_hosts: KnownHosts::global(),
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn config(mut self, config: client::Config) -> Self {
        self.config = config;
        self
    }

    pub fn known_hosts(mut self, known_hosts: KnownHosts) -> Self {
        self.known_hosts = known_hosts;
        self
    }
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Remembered host key fingerprints, keyed by `host:port`.
///
/// By default an unknown host is accepted and its key remembered (trust on
/// first use); a host presenting a different key later is refused. Clones share
/// the same store.
#[derive(Debug, Clone)]
pub struct KnownHosts {
    fingerprints: Arc<DashMap<String, String>>,
    accept_unknown: bool,
}

impl Default for KnownHosts {
    fn default() -> Self {
        KnownHosts::new()
    }
}

impl KnownHosts {
    pub fn new() -> KnownHosts {
        KnownHosts {
            fingerprints: Arc::new(DashMap::new()),
            accept_unknown: true,
        }
    }

    /// The store shared by every [`ConnectOptions`] that does not supply its own.
    pub fn global() -> KnownHosts {
        GLOBAL_KNOWN_HOSTS.clone()
    }

    /// Only hosts inserted beforehand are accepted.
    pub fn reject_unknown(mut self) -> Self {
        self.accept_unknown = false;
        self
    }

    pub fn insert(&self, host: &str, port: u16, fingerprint: impl Into<String>) {
        self.fingerprints.insert(host_key(host, port), fingerprint.into());
    }

    pub fn fingerprint(&self, host: &str, port: u16) -> Option<String> {
        self.fingerprints.get(&host_key(host, port)).map(|known| known.value().clone())
    }

    pub fn check(&self, host: &str, port: u16, fingerprint: &str) -> bool {
        match self.fingerprints.entry(host_key(host, port)) {
            Entry::Occupied(known) => {
                let matches = known.get() == fingerprint;
                if !matches {
                    warn!("host key for {}:{} changed, refusing connection", host, port);
                }
                matches
            }
            Entry::Vacant(vacant) => {
                if !self.accept_unknown {
                    warn!("unknown host key for {}:{}, refusing connection", host, port);
                    return false;
                }
                debug!("remembering host key {} for {}:{}", fingerprint, host, port);
                vacant.insert(fingerprint.to_string());
                true
            }
        }
    }
}

fn host_key(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

#[derive(Debug)]
pub struct HostKeyHandler {
    host: String,
    port: u16,
    known_hosts: KnownHosts,
}

#[async_trait]
impl client::Handler for HostKeyHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> std::result::Result<bool, Self::Error> {
        Ok(self
            .known_hosts
            .check(&self.host, self.port, &server_public_key.fingerprint()))
    }
}

pub(super) async fn open_handle(options: ConnectOptions) -> Result<Handle<HostKeyHandler>> {
    let ConnectOptions {
        host,
        port,
        username,
        password,
        timeout,
        mut config,
        known_hosts,
    } = options;

    if config.inactivity_timeout.is_none() {
        config.inactivity_timeout = timeout;
    }
    let handler = HostKeyHandler {
        host: host.clone(),
        port,
        known_hosts,
    };

    debug!("connecting to {}:{} as {}", host, port, username);
    let establish = async {
        let mut handle = client::connect(Arc::new(config), (host.as_str(), port), handler)
            .await
            .map_err(|source| Error::Connect {
                host: host.clone(),
                port,
                source,
            })?;

        if !handle.authenticate_password(username.as_str(), password).await? {
            return Err(Error::AuthenticationFailed(username.clone()));
        }
        Ok::<_, Error>(handle)
    };

    let handle = match timeout {
        Some(limit) => tokio::time::timeout(limit, establish)
            .await
            .map_err(|_| Error::ConnectTimeout {
                host: host.clone(),
                port,
            })??,
        None => establish.await?,
    };

    debug!("authenticated to {}:{} as {}", host, port, username);
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_key_is_remembered() {
        let known_hosts = KnownHosts::new();
        assert!(known_hosts.check("example.org", 22, "SHA256:aaa"));
        assert_eq!(known_hosts.fingerprint("example.org", 22).as_deref(), Some("SHA256:aaa"));
        assert!(known_hosts.check("example.org", 22, "SHA256:aaa"));
    }

    #[test]
    fn changed_key_is_refused() {
        let known_hosts = KnownHosts::new();
        known_hosts.insert("example.org", 22, "SHA256:aaa");
        assert!(!known_hosts.check("example.org", 22, "SHA256:bbb"));
        assert_eq!(known_hosts.fingerprint("example.org", 22).as_deref(), Some("SHA256:aaa"));
    }

    #[test]
    fn ports_are_tracked_separately() {
        let known_hosts = KnownHosts::new();
        assert!(known_hosts.check("example.org", 22, "SHA256:aaa"));
        assert!(known_hosts.check("example.org", 2222, "SHA256:bbb"));
    }

    #[test]
    fn rejecting_store_only_accepts_pinned_hosts() {
        let known_hosts = KnownHosts::new().reject_unknown();
        assert!(!known_hosts.check("example.org", 22, "SHA256:aaa"));
        assert_eq!(known_hosts.fingerprint("example.org", 22), None);

        known_hosts.insert("example.org", 22, "SHA256:aaa");
        assert!(known_hosts.check("example.org", 22, "SHA256:aaa"));
    }

    #[test]
    fn clones_share_the_store() {
        let known_hosts = KnownHosts::new();
        let clone = known_hosts.clone();
        assert!(clone.check("example.org", 22, "SHA256:aaa"));
        assert!(!known_hosts.check("example.org", 22, "SHA256:bbb"));
    }

    #[test]
    fn options_default_to_port_22_and_hide_the_password() {
        let options = ConnectOptions::new("example.org", "root", "hunter2");
        assert_eq!(options.port, 22);
        assert_eq!(options.timeout, None);
        let options = options.port(2222).timeout(Duration::from_secs(5));
        assert_eq!(options.port, 2222);
        assert_eq!(options.timeout, Some(Duration::from_secs(5)));
        assert!(!format!("{:?}", options).contains("hunter2"));
    }
}
