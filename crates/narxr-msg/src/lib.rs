//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Wire-level building blocks shared by the broker client: payload codec,
//! subject grammar, message headers, and the transport seam with its
//! in-memory and NATS backends.

pub mod codec;
pub mod headers;
pub mod logging;
pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;
pub mod subject;
pub mod transport;
pub mod types;

/// Shared result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Failures raised while turning values into payload bytes and back.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failures reported by a broker connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No connection has been established yet.
    #[error("not connected")]
    NotConnected,
    /// Subject is empty or violates the token grammar.
    #[error("invalid subject '{0}'")]
    InvalidSubject(String),
    /// The connection or subscription was closed.
    #[error("connection closed")]
    Closed,
    /// No server could be reached.
    #[error("connection refused: {0}")]
    Connect(String),
    /// A request saw no reply before its deadline.
    #[error("timeout")]
    Timeout,
    /// A request was sent to a subject nobody listens on.
    #[error("no responders")]
    NoResponders,
    /// The broker refused a publish.
    #[error("publish failed: {0}")]
    Publish(String),
    /// The broker refused a subscription.
    #[error("subscription failed: {0}")]
    Subscribe(String),
    /// A request failed for a reason other than timeout or missing responders.
    #[error("request failed: {0}")]
    Request(String),
    /// Buffered outbound data could not be flushed.
    #[error("flush failed: {0}")]
    Flush(String),
}

pub use codec::{decode, encode, is_structured, Payload};
pub use headers::{HeaderBuilder, Headers};
pub use logging::{log_message, MessageDirection, MessagingMetricsExporter};
pub use memory::InMemoryBroker;
#[cfg(feature = "nats")]
pub use nats::NatsBroker;
pub use subject::{is_valid_publish_subject, is_valid_subject, subject_matches};
pub use transport::{Broker, Connection, Subscription, DEFAULT_REQUEST_TIMEOUT};
pub use types::{ConnectOptions, PublishOptions, RawMessage, RequestOptions, SubscriptionOptions};
