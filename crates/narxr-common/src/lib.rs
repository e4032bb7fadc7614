//! ---
//! narxr_section: "01-core-functionality"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Shared primitives for the broker client runtime."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
//! Shared primitives for the narxr workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the service crate and the control CLI.

pub mod config;
pub mod logging;

pub use config::{
    ConnectionConfig, LoggingConfig, RequestConfig, RetryConfig, RetryPolicyConfig, ServiceConfig,
};
pub use logging::{init_tracing, LogFormat};
