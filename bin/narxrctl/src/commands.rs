//! ---
//! narxr_section: "05-cli"
//! narxr_subsection: "binary"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Operator CLI for interacting with a NATS broker."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use clap::Args;
use narxr_common::ServiceConfig;
use narxr_msg::{Headers, PublishOptions, RequestOptions, SubscriptionOptions};
use narxr_service::{handler, MessageEnvelope, NatsService, RespondSpec, SubscriptionDescriptor};
use serde_json::Value;
use tokio::sync::mpsc;

/// Arguments shared by commands that attach headers.
#[derive(Debug, Args)]
pub struct HeaderArgs {
    /// Extra header as KEY=VALUE, repeatable.
    #[arg(long = "header", short = 'H', value_name = "KEY=VALUE", value_parser = parse_key_val)]
    headers: Vec<(String, String)>,
}

impl HeaderArgs {
    fn build(&self, service: &NatsService) -> Option<Headers> {
        if self.headers.is_empty() {
            None
        } else {
            Some(service.header_add_params(self.headers.iter().cloned(), None, None))
        }
    }
}

#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Subject to publish to.
    subject: String,
    /// Payload; JSON text is sent as-is, anything else as plain text.
    data: String,
    /// Reply-to subject carried with the message.
    #[arg(long)]
    reply: Option<String>,
    #[command(flatten)]
    headers: HeaderArgs,
}

#[derive(Debug, Args)]
pub struct RequestArgs {
    /// Subject to send the request to.
    subject: String,
    /// Request payload.
    #[arg(default_value = "")]
    data: String,
    /// Reply deadline in milliseconds; the configured default applies otherwise.
    #[arg(long = "timeout-ms", value_name = "MS")]
    timeout_ms: Option<u64>,
    #[command(flatten)]
    headers: HeaderArgs,
}

#[derive(Debug, Args)]
pub struct ListenArgs {
    /// Subject or wildcard pattern.
    subject: String,
    /// Queue group to join.
    #[arg(long)]
    queue: Option<String>,
    /// Exit after this many messages.
    #[arg(long)]
    count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Subject requests arrive on.
    subject: String,
    /// Reply-to address requests must carry.
    #[arg(long)]
    reply: String,
    /// Payload sent back for every request.
    #[arg(long, default_value = "ok")]
    answer: String,
    /// Queue group to join.
    #[arg(long)]
    queue: Option<String>,
}

fn parse_key_val(raw: &str) -> Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got '{raw}'"))?;
    if key.trim().is_empty() {
        bail!("header key must not be empty");
    }
    Ok((key.trim().to_owned(), value.to_owned()))
}

async fn connect(service: &NatsService) -> Result<()> {
    if service.init().await {
        Ok(())
    } else {
        bail!("unable to connect to the broker")
    }
}

fn render(envelope: &MessageEnvelope) -> String {
    let reply = envelope
        .reply_to
        .as_deref()
        .map(|reply| format!(" reply={reply}"))
        .unwrap_or_default();
    format!("[{}]{} {}", envelope.sender_subject, reply, envelope.payload)
}

pub async fn publish(service: &NatsService, args: PublishArgs) -> Result<()> {
    connect(service).await?;
    let options = PublishOptions {
        reply: args.reply.clone(),
        headers: args.headers.build(service),
    };
    if !service.publish(&args.subject, &args.data, options).await? {
        bail!("publish to '{}' failed", args.subject);
    }
    println!("published to {}", args.subject);
    Ok(())
}

pub async fn request(service: &NatsService, config: &ServiceConfig, args: RequestArgs) -> Result<()> {
    connect(service).await?;
    let timeout = args
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(config.request.timeout);
    let options = RequestOptions {
        timeout: Some(timeout),
        headers: args.headers.build(service),
    };
    match service
        .request::<Value, _>(&args.subject, &args.data, options)
        .await?
    {
        Some(Value::String(text)) => println!("{text}"),
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => bail!("no reply from '{}' within {:?}", args.subject, timeout),
    }
    Ok(())
}

pub async fn listen(service: &NatsService, args: ListenArgs) -> Result<()> {
    connect(service).await?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = handler(move |envelope: MessageEnvelope| {
        let tx = tx.clone();
        async move {
            println!("{}", render(&envelope));
            tx.send(()).ok();
            Ok(())
        }
    });
    let options = SubscriptionOptions {
        queue: args.queue.clone(),
        max_messages: args.count,
    };
    let descriptor = SubscriptionDescriptor::new(args.subject.clone())
        .with_options(options)
        .with_handler(printer);
    if !service.subs(descriptor).await {
        bail!("unable to subscribe to '{}'", args.subject);
    }

    let mut seen = 0;
    loop {
        tokio::select! {
            received = rx.recv() => {
                if received.is_none() {
                    break;
                }
                seen += 1;
                if args.count.is_some_and(|count| seen >= count) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}

pub async fn serve(service: &NatsService, args: ServeArgs) -> Result<()> {
    connect(service).await?;
    let answer = args.answer.clone();
    let responder = handler(move |envelope: MessageEnvelope| {
        let answer = answer.clone();
        async move {
            println!("{}", render(&envelope));
            if envelope.respond(&answer, PublishOptions::default()).await != Some(true) {
                anyhow::bail!("could not answer {}", envelope.sender_subject);
            }
            Ok(())
        }
    });
    let mut spec = RespondSpec::new(args.subject.clone(), args.reply.clone(), responder);
    if let Some(queue) = &args.queue {
        spec = spec.with_options(SubscriptionOptions::queue(queue.clone()));
    }
    if !service.respond(spec).await? {
        bail!("invalid subject '{}' or reply '{}'", args.subject, args.reply);
    }
    println!("serving {} (reply {}); ctrl-c to stop", args.subject, args.reply);
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_value_pairs_parse() {
        assert_eq!(
            parse_key_val("trace=abc=1").unwrap(),
            ("trace".to_owned(), "abc=1".to_owned())
        );
        assert!(parse_key_val("novalue").is_err());
        assert!(parse_key_val("=x").is_err());
    }
}
