//! Test fixtures and helpers.
//!
//! A [`TestNetwork`] is one server with any number of registered clients
//! talking to it over [`LocalTransport`].

use std::sync::Arc;

use tempfile::TempDir;

use lockbox_core::{FileName, Keypair, UserId};
use lockbox_protocol::{ClientContext, ClientSettings, LocalTransport, ServerContext};
use lockbox_store::{MemoryStore, RecordStore, SqliteStore};

/// A client connected to a [`TestNetwork`].
pub type TestClient<S> = ClientContext<LocalTransport<S>>;

/// A server and the clients registered against it.
pub struct TestNetwork<S: RecordStore> {
    server: Arc<ServerContext<S>>,
    // Keeps an on-disk database alive for the network's lifetime.
    _dir: Option<TempDir>,
}

impl TestNetwork<MemoryStore> {
    /// A network backed by the in-memory store.
    pub fn memory() -> Self {
        Self::with_store(MemoryStore::new())
    }
}

impl TestNetwork<SqliteStore> {
    /// A network backed by a SQLite file in a fresh temporary directory.
    pub fn sqlite() -> std::io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = SqliteStore::open(dir.path().join("lockbox.db"))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        Ok(Self {
            server: Arc::new(ServerContext::new(store)),
            _dir: Some(dir),
        })
    }
}

impl<S: RecordStore> TestNetwork<S> {
    pub fn with_store(store: S) -> Self {
        Self {
            server: Arc::new(ServerContext::new(store)),
            _dir: None,
        }
    }

    pub fn server(&self) -> &Arc<ServerContext<S>> {
        &self.server
    }

    pub fn store(&self) -> &S {
        self.server.store()
    }

    /// A transport onto this network's server.
    pub fn transport(&self) -> LocalTransport<S> {
        LocalTransport::new(self.server.clone())
    }

    /// A client for `name` with a fresh key pair, not yet registered.
    pub fn unregistered(&self, name: &str) -> TestClient<S> {
        self.client_with(name, Keypair::generate())
    }

    /// A client for `name` using `keypair`, not yet registered.
    pub fn client_with(&self, name: &str, keypair: Keypair) -> TestClient<S> {
        ClientContext::new(
            user(name),
            keypair,
            self.transport(),
            ClientSettings::default(),
        )
    }

    /// A registered client for `name` with a fresh key pair.
    ///
    /// Panics if registration fails.
    pub async fn client(&self, name: &str) -> TestClient<S> {
        let client = self.unregistered(name);
        if let Err(e) = client.register().await {
            panic!("registering {name}: {e}");
        }
        client
    }

    /// Registered clients for each of `names`.
    pub async fn clients(&self, names: &[&str]) -> Vec<TestClient<S>> {
        let mut clients = Vec::with_capacity(names.len());
        for name in names {
            clients.push(self.client(name).await);
        }
        clients
    }
}

/// A user id from a literal. Panics on an invalid name.
pub fn user(name: &str) -> UserId {
    match UserId::new(name) {
        Ok(user) => user,
        Err(e) => panic!("invalid test user {name:?}: {e}"),
    }
}

/// A file name from a literal. Panics on an invalid name.
pub fn file(name: &str) -> FileName {
    match FileName::new(name) {
        Ok(name) => name,
        Err(e) => panic!("invalid test file name {name:?}: {e}"),
    }
}

/// Deterministic key pairs for multi-party tests.
pub fn seeded_keypairs(count: usize) -> Vec<Keypair> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[..8].copy_from_slice(&(i as u64).to_le_bytes());
            Keypair::from_seed(&seed)
        })
        .collect()
}
