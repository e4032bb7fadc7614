//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use narxr_logging::{nx_error, LogContext};
use narxr_msg::TransportError;

/// Logs failures caught at a pattern boundary when error visibility is on.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    enabled: bool,
    server: String,
}

impl ErrorReporter {
    /// Reporter for the named service instance.
    pub fn new(enabled: bool, server: impl Into<String>) -> Self {
        Self {
            enabled,
            server: server.into(),
        }
    }

    /// Whether reports are written.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Render a transport failure as `[subject] nats is <message>`.
    pub fn format_transport(subject: &str, err: &TransportError) -> String {
        format!("[{subject}] nats is {}", err.to_string().to_lowercase())
    }

    /// Report a transport failure for `subject`.
    pub fn transport(&self, subject: &str, err: &TransportError) {
        self.message(subject, &Self::format_transport(subject, err));
    }

    /// Report a free-form failure for `subject`.
    pub fn message(&self, subject: &str, message: &str) {
        if !self.enabled {
            return;
        }
        let ctx = LogContext::new()
            .with_subject(subject)
            .with_server(&self.server);
        nx_error!(context = ctx, "{}", message);
    }
}
