//! Streaming transport for live snapshot subscribers.
//!
//! A transport only needs three operations from the core: attach a
//! subscriber, detach it, and learn that its channel was closed. Everything
//! about the wire lives behind [`StreamingTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::subscribers::SubscriberRegistry;

mod tcp;

pub use tcp::TcpTransport;

#[async_trait]
pub trait StreamingTransport: Send + 'static {
    /// Claims the listening address and returns the bound address.
    ///
    /// A failure here is fatal to the exporter.
    async fn bind(&mut self) -> Result<String>;

    /// Serves subscribers until `shutdown` is cancelled.
    ///
    /// Peers that are still attached when the accept loop stops keep
    /// receiving until the registry closes their subscriptions.
    async fn serve(self: Box<Self>, registry: Arc<SubscriberRegistry>, shutdown: CancellationToken) -> Result<()>;
}
