//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Broker client façade: connection lifecycle, subscription registry,
//! consumption loops and the publish, request and respond patterns.

pub mod connection;
mod consumer;
pub mod descriptor;
pub mod envelope;
pub mod registry;
pub mod report;
pub mod retry;
pub mod service;

/// Failures surfaced by the façade beyond plain success flags and codec errors.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// A bounded retry budget ran out.
    #[error("{pattern} on '{subject}' gave up after {attempts} attempt(s)")]
    RetriesExhausted {
        /// Messaging pattern whose policy ran out.
        pattern: &'static str,
        /// Subject the pattern was working on.
        subject: String,
        /// Attempts made.
        attempts: usize,
    },
}

pub use connection::{ConnectionManager, ConnectionState, Registration};
pub use descriptor::{DeliveryMode, RespondSpec, SubscriptionDescriptor};
pub use envelope::{handler, Handler, MessageEnvelope};
pub use registry::SubscriptionRegistry;
pub use report::ErrorReporter;
pub use retry::{RetryPolicy, RetrySchedule};
pub use service::NatsService;
