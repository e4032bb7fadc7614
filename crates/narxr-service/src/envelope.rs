//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use narxr_msg::{
    encode, Connection, Headers, MessagingMetricsExporter, Payload, PublishOptions,
};
use serde::Serialize;

use crate::report::ErrorReporter;

/// Callback invoked for every delivered message.
pub type Handler =
    Arc<dyn Fn(MessageEnvelope) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wrap an async closure into a [`Handler`].
pub fn handler<F, Fut>(f: F) -> Handler
where
    F: Fn(MessageEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(move |envelope| Box::pin(f(envelope)))
}

/// Publishes answers back to the sender of one message.
#[derive(Clone)]
pub(crate) struct Responder {
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) default_reply: Option<String>,
    pub(crate) reporter: ErrorReporter,
    pub(crate) metrics: Option<Arc<MessagingMetricsExporter>>,
}

/// Normalized view of one received message, handed to handlers.
#[derive(Clone)]
pub struct MessageEnvelope {
    /// Subject (or pattern) of the subscription that caught the message.
    pub catching_subject: String,
    /// Concrete subject the sender published to.
    pub sender_subject: String,
    /// Decoded payload.
    pub payload: Payload,
    /// Headers sent with the message.
    pub headers: Option<Headers>,
    /// Address the sender expects an answer on.
    pub reply_to: Option<String>,
    pub(crate) responder: Responder,
}

impl MessageEnvelope {
    /// Answer the sender.
    ///
    /// Returns `Some(true)` once published, `Some(false)` when the message has
    /// no reply-to address and `None` when encoding or publishing failed.
    /// Options left unset fall back to the subscription's declared reply.
    pub async fn respond<T: Serialize + ?Sized>(
        &self,
        data: &T,
        options: PublishOptions,
    ) -> Option<bool> {
        let Some(reply_to) = self.reply_to.as_deref() else {
            return Some(false);
        };
        let responder = &self.responder;
        let payload = match encode(data) {
            Ok(payload) => payload,
            Err(err) => {
                responder.reporter.message(&self.sender_subject, &err.to_string());
                return None;
            }
        };
        let options = PublishOptions {
            reply: options.reply.or_else(|| responder.default_reply.clone()),
            headers: options.headers,
        };
        match responder.connection.publish(reply_to, payload, &options).await {
            Ok(()) => {
                if let Some(metrics) = &responder.metrics {
                    metrics.observe_published();
                }
                Some(true)
            }
            Err(err) => {
                responder.reporter.transport(&self.sender_subject, &err);
                None
            }
        }
    }

    /// Deserialize the payload into a caller type.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.payload.deserialize().ok()
    }
}

impl std::fmt::Debug for MessageEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageEnvelope")
            .field("catching_subject", &self.catching_subject)
            .field("sender_subject", &self.sender_subject)
            .field("payload", &self.payload)
            .field("headers", &self.headers)
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}
