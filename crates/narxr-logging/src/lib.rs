//! ---
//! narxr_section: "03-logging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Structured logging helpers for broker activity."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Context-carrying log macros for broker activity.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

#[doc(hidden)]
pub use tracing;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogContext<'a> {
    /// Subject the event relates to.
    pub subject: Option<&'a str>,
    /// Display name of the service instance.
    pub server: Option<&'a str>,
    /// Reply-to address, when the event concerns a request.
    pub reply: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a subject.
    pub fn with_subject(mut self, subject: &'a str) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Attach the service display name. Blank names are left out.
    pub fn with_server(mut self, server: &'a str) -> Self {
        if !server.is_empty() {
            self.server = Some(server);
        }
        self
    }

    /// Attach a reply-to address.
    pub fn with_reply(mut self, reply: &'a str) -> Self {
        self.reply = Some(reply);
        self
    }
}

/// High-level outcome used when emitting broker lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEventOutcome {
    /// The operation completed successfully.
    Success,
    /// The operation failed or was aborted.
    Fault,
}

impl BrokerEventOutcome {
    /// Stable lowercase label for the outcome.
    pub fn as_str(&self) -> &'static str {
        match self {
            BrokerEventOutcome::Success => "success",
            BrokerEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event (connect, drain, shutdown) with an outcome.
pub fn log_broker_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: BrokerEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    match outcome {
        BrokerEventOutcome::Success => tracing::info!(
            event,
            outcome = outcome.as_str(),
            subject = ctx.subject.unwrap_or(""),
            server = ctx.server.unwrap_or(""),
            message = %message
        ),
        BrokerEventOutcome::Fault => tracing::error!(
            event,
            outcome = outcome.as_str(),
            subject = ctx.subject.unwrap_or(""),
            server = ctx.server.unwrap_or(""),
            message = %message
        ),
    }
}
