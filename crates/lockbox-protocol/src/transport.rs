//! Transport abstraction between client and server.
//!
//! The transport carries one request and returns one tagged reply.
//! Implementations may use HTTP or any other request/response channel.

use std::sync::Arc;

use async_trait::async_trait;

use lockbox_store::RecordStore;

use crate::error::Result;
use crate::messages::{Reply, Request, Response};
use crate::server::ServerContext;

/// Transport trait for request/reply exchanges with a server.
///
/// Implementations must be thread-safe (Send + Sync). A transport does not
/// retry; timeouts are applied by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its reply.
    async fn call(&self, request: Request) -> Result<Reply<Response>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn call(&self, request: Request) -> Result<Reply<Response>> {
        (**self).call(request).await
    }
}

/// An in-process transport for tests and embedding.
///
/// Every request and reply is round-tripped through its JSON wire form, so
/// the encoding is exercised exactly as over a network.
pub struct LocalTransport<S: RecordStore> {
    server: Arc<ServerContext<S>>,
}

impl<S: RecordStore> LocalTransport<S> {
    /// Connect to a server.
    pub fn new(server: Arc<ServerContext<S>>) -> Self {
        Self { server }
    }

    /// Get the server this transport is connected to.
    pub fn server(&self) -> &Arc<ServerContext<S>> {
        &self.server
    }
}

impl<S: RecordStore> Clone for LocalTransport<S> {
    fn clone(&self) -> Self {
        Self {
            server: Arc::clone(&self.server),
        }
    }
}

#[async_trait]
impl<S: RecordStore> Transport for LocalTransport<S> {
    async fn call(&self, request: Request) -> Result<Reply<Response>> {
        let body = request.to_json()?;
        let reply = self.server.handle_json(&body).await;
        Reply::from_json(&reply)
    }
}
