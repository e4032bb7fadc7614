//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use narxr_logging::{nx_debug, nx_error, LogContext};
use narxr_msg::{decode, Connection, MessagingMetricsExporter, RawMessage, Subscription};
use tokio::task::JoinHandle;

use crate::descriptor::DeliveryMode;
use crate::envelope::{Handler, MessageEnvelope, Responder};
use crate::report::ErrorReporter;

/// Shared pieces every consumption loop needs.
#[derive(Clone)]
pub(crate) struct ConsumerContext {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) reporter: ErrorReporter,
    pub(crate) server: String,
    pub(crate) metrics: Option<Arc<MessagingMetricsExporter>>,
}

/// Spawn a task that feeds `subscription` into `handler` until it closes.
pub(crate) fn spawn_consumer(
    subscription: Arc<dyn Subscription>,
    handler: Handler,
    delivery: DeliveryMode,
    context: ConsumerContext,
) -> JoinHandle<()> {
    tokio::spawn(run_consumer(subscription, handler, delivery, context))
}

async fn run_consumer(
    subscription: Arc<dyn Subscription>,
    handler: Handler,
    delivery: DeliveryMode,
    context: ConsumerContext,
) {
    let catching = subscription.subject().to_owned();
    let default_reply = match &delivery {
        DeliveryMode::Data => None,
        DeliveryMode::Respond { reply, .. } => Some(reply.clone()),
    };
    nx_debug!(
        context = LogContext::new()
            .with_subject(&catching)
            .with_server(&context.server),
        "consumer started"
    );

    while let Some(message) = subscription.next().await {
        if !accepts(&delivery, &message) {
            continue;
        }
        let payload = decode(&message.payload);
        if delivery == DeliveryMode::Data && !payload.is_usable() {
            continue;
        }
        if let Some(metrics) = &context.metrics {
            metrics.observe_received();
        }

        let sender = message.subject.clone();
        let envelope = MessageEnvelope {
            catching_subject: catching.clone(),
            sender_subject: message.subject,
            payload,
            headers: message.headers,
            reply_to: message.reply,
            responder: Responder {
                connection: context.connection.clone(),
                default_reply: default_reply.clone(),
                reporter: context.reporter.clone(),
                metrics: context.metrics.clone(),
            },
        };

        let handler = handler.clone();
        match AssertUnwindSafe(async move { handler(envelope).await })
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(err)) => context
                .reporter
                .message(&sender, &format!("handler failed: {err:#}")),
            Err(_) => {
                let ctx = LogContext::new()
                    .with_subject(&sender)
                    .with_server(&context.server);
                nx_error!(context = ctx, "handler panicked; continuing with next message");
            }
        }
    }

    nx_debug!(
        context = LogContext::new()
            .with_subject(&catching)
            .with_server(&context.server),
        "consumer finished"
    );
}

/// Respond-mode loops only see messages addressed exactly as declared.
fn accepts(delivery: &DeliveryMode, message: &RawMessage) -> bool {
    match delivery {
        DeliveryMode::Data => true,
        DeliveryMode::Respond { subject, reply } => {
            message.subject == *subject && message.reply.as_deref() == Some(reply.as_str())
        }
    }
}
