//! ---
//! narxr_section: "03-logging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Structured logging helpers for broker activity."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---

/// Shared expansion for the level-specific macros below.
#[doc(hidden)]
#[macro_export]
macro_rules! __nx_event {
    ($level:expr, $ctx:expr, $($arg:tt)+) => {{
        let ctx = &$ctx;
        $crate::tracing::event!(
            $level,
            subject = ctx.subject.unwrap_or(""),
            server = ctx.server.unwrap_or(""),
            reply = ctx.reply.unwrap_or(""),
            message = %format_args!($($arg)+)
        );
    }};
}

/// Emit an informational log enriched with broker context.
#[macro_export]
macro_rules! nx_info {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::INFO, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::INFO, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a debug log enriched with broker context.
#[macro_export]
macro_rules! nx_debug {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::DEBUG, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::DEBUG, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit a warning enriched with broker context.
#[macro_export]
macro_rules! nx_warn {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::WARN, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::WARN, $crate::LogContext::default(), $($arg)+)
    };
}

/// Emit an error log enriched with broker context.
#[macro_export]
macro_rules! nx_error {
    (context = $ctx:expr, $($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::ERROR, $ctx, $($arg)+)
    };
    ($($arg:tt)+) => {
        $crate::__nx_event!($crate::tracing::Level::ERROR, $crate::LogContext::default(), $($arg)+)
    };
}
