//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::{ConnectOptions, PublishOptions, RawMessage, RequestOptions, SubscriptionOptions};
use crate::TransportResult;

/// Request deadline applied when neither the caller nor the configuration sets one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Factory for broker connections.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Establish a connection using the given options.
    async fn connect(&self, options: &ConnectOptions) -> TransportResult<Arc<dyn Connection>>;
    /// Human-readable backend name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Live connection to a broker.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Address of the server this connection is attached to.
    fn server(&self) -> String;
    /// Publish a payload to a concrete subject.
    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> TransportResult<()>;
    /// Subscribe to a subject or wildcard pattern.
    async fn subscribe(
        &self,
        subject: &str,
        options: &SubscriptionOptions,
    ) -> TransportResult<Arc<dyn Subscription>>;
    /// Publish and wait for the first reply.
    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        options: &RequestOptions,
    ) -> TransportResult<RawMessage>;
    /// Push buffered outbound data to the server.
    async fn flush(&self) -> TransportResult<()>;
    /// Close the connection. Subscriptions stop receiving.
    async fn close(&self) -> TransportResult<()>;
    /// Whether [`Connection::close`] has run.
    fn is_closed(&self) -> bool;
}

/// Transport-level subscription handle.
#[async_trait]
pub trait Subscription: Send + Sync {
    /// Subject or pattern this handle listens on.
    fn subject(&self) -> &str;
    /// Next message, or `None` once the subscription is closed and its
    /// buffer is exhausted.
    async fn next(&self) -> Option<RawMessage>;
    /// Stop new deliveries. Already buffered messages stay readable.
    async fn drain(&self) -> TransportResult<()>;
    /// Whether the handle no longer receives new messages.
    fn is_closed(&self) -> bool;
}
