//! Building clients and servers from configuration.

use std::sync::Arc;

use anyhow::Context;

use lockbox_core::{Keypair, UserId};
use lockbox_protocol::{ClientContext, ServerContext, Transport};
use lockbox_store::SqliteStore;

use crate::config::{ClientConfig, ServerConfig};

/// Open the server's database and wrap it in a [`ServerContext`].
pub fn open_server(config: &ServerConfig) -> anyhow::Result<Arc<ServerContext<SqliteStore>>> {
    let store = SqliteStore::open(&config.database_path)
        .with_context(|| format!("opening database {}", config.database_path.display()))?;
    tracing::info!(
        database = %config.database_path.display(),
        port = config.port,
        "server store ready"
    );
    Ok(Arc::new(ServerContext::new(store)))
}

/// Load (or create) the configured key pair and build a client on
/// `transport`.
pub fn open_client<T: Transport>(
    config: &ClientConfig,
    transport: T,
) -> anyhow::Result<ClientContext<T>> {
    let user = UserId::new(config.user.clone())
        .with_context(|| format!("invalid client user {:?}", config.user))?;
    let keypair = Keypair::load_or_create(&config.key_path)
        .with_context(|| format!("loading key from {}", config.key_path.display()))?;

    Ok(ClientContext::new(user, keypair, transport, config.protocol()))
}
