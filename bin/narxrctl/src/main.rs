//! ---
//! narxr_section: "05-cli"
//! narxr_subsection: "binary"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Operator CLI for interacting with a NATS broker."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use narxr_common::{init_tracing, LogFormat, ServiceConfig};
use narxr_msg::NatsBroker;
use narxr_service::NatsService;
use tokio::runtime::Runtime;
use tracing::warn;

mod commands;

const DEFAULT_CONFIG_CANDIDATES: &[&str] = &["narxr.toml", "/etc/narxr/narxr.toml"];

#[derive(Debug, Parser)]
#[command(author, version, about = "narxr broker control utility", long_about = None)]
struct Cli {
    /// Configuration file; falls back to ./narxr.toml and /etc/narxr/narxr.toml.
    #[arg(long, global = true, value_name = "FILE", env = "NARXR_CONFIG")]
    config: Option<PathBuf>,

    /// Broker URL, repeatable. Overrides the configured server list.
    #[arg(long = "server", short = 's', global = true, value_name = "URL")]
    servers: Vec<String>,

    /// Display name stamped into the `serverName` header.
    #[arg(long, global = true, value_name = "NAME")]
    name: Option<String>,

    /// Stdout log format.
    #[arg(long = "log-format", global = true, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Suppress transport error logs.
    #[arg(long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Publish one message.
    #[command(name = "pub")]
    Publish(commands::PublishArgs),
    /// Send a request and print the reply.
    #[command(name = "req")]
    Request(commands::RequestArgs),
    /// Print messages arriving on a subject.
    Listen(commands::ListenArgs),
    /// Answer requests on a subject with a fixed payload.
    Serve(commands::ServeArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Json,
    Pretty,
}

impl From<LogFormatArg> for LogFormat {
    fn from(value: LogFormatArg) -> Self {
        match value {
            LogFormatArg::Json => LogFormat::StructuredJson,
            LogFormatArg::Pretty => LogFormat::Pretty,
        }
    }
}

/// Effective configuration plus the reason built-in defaults were used, if
/// they were. The reason is logged once tracing is up.
struct CliConfig {
    config: ServiceConfig,
    defaults_reason: Option<anyhow::Error>,
}

impl Cli {
    fn load_config(&self) -> Result<CliConfig> {
        let (mut config, defaults_reason) = match &self.config {
            Some(path) => (
                ServiceConfig::load(std::slice::from_ref(path))
                    .with_context(|| format!("loading {}", path.display()))?,
                None,
            ),
            None => match ServiceConfig::load(DEFAULT_CONFIG_CANDIDATES) {
                Ok(config) => (config, None),
                Err(err) => (ServiceConfig::default(), Some(err)),
            },
        };
        if !self.servers.is_empty() {
            config.connection.servers = self.servers.clone();
        }
        if let Some(name) = &self.name {
            config.connection.name = Some(name.clone());
        }
        if config.connection.name.is_none() {
            config.connection.name = Some(env!("CARGO_PKG_NAME").to_owned());
        }
        if let Some(format) = self.log_format {
            config.logging.format = format.into();
        }
        if self.quiet {
            config.view_errors = false;
        }
        config.validate()?;
        Ok(CliConfig {
            config,
            defaults_reason,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let CliConfig {
        config,
        defaults_reason,
    } = cli.load_config()?;
    init_tracing(config.server_name(), &config.logging)?;
    if let Some(err) = defaults_reason {
        warn!(error = %err, "using built-in defaults");
    }

    let runtime = Runtime::new()?;
    runtime.block_on(async move {
        let service = NatsService::new(Arc::new(NatsBroker::new()), &config);
        let result = match cli.command {
            Commands::Publish(args) => commands::publish(&service, args).await,
            Commands::Request(args) => commands::request(&service, &config, args).await,
            Commands::Listen(args) => commands::listen(&service, args).await,
            Commands::Serve(args) => commands::serve(&service, args).await,
        };
        service.shutdown().await;
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_override_config() {
        let cli = Cli::try_parse_from([
            "narxrctl",
            "--server",
            "nats://10.0.0.1:4222",
            "--name",
            "ops",
            "--quiet",
            "pub",
            "orders.created",
            "{\"id\":1}",
        ])
        .unwrap();
        let config = cli.load_config().unwrap().config;
        assert_eq!(config.connection.servers, vec!["nats://10.0.0.1:4222"]);
        assert_eq!(config.server_name(), "ops");
        assert!(!config.view_errors);
        assert!(matches!(cli.command, Commands::Publish(_)));
    }

    #[test]
    fn explicit_config_file_is_not_a_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("narxr.toml");
        std::fs::write(&path, "[connection]\nname = \"edge\"\n").unwrap();
        let cli = Cli::try_parse_from([
            "narxrctl",
            "--config",
            path.to_str().unwrap(),
            "listen",
            "orders.>",
        ])
        .unwrap();
        let loaded = cli.load_config().unwrap();
        assert!(loaded.defaults_reason.is_none());
        assert_eq!(loaded.config.server_name(), "edge");
    }

    #[test]
    fn missing_candidates_fall_back_to_defaults_with_a_reason() {
        let cli = Cli::try_parse_from(["narxrctl", "listen", "orders.>"]).unwrap();
        if cli.config.is_some() {
            return;
        }
        let loaded = cli.load_config().unwrap();
        let reason = loaded.defaults_reason.expect("fallback reason");
        assert!(reason.to_string().contains("narxr.toml"));
        assert_eq!(loaded.config.server_name(), "narxrctl");
    }

    #[test]
    fn serve_requires_reply() {
        assert!(Cli::try_parse_from(["narxrctl", "serve", "api.v1.hello"]).is_err());
    }
}
