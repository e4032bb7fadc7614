//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use narxr_msg::SubscriptionOptions;

use crate::envelope::Handler;

/// How a consumption loop filters and answers messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Hand every usable payload to the handler.
    Data,
    /// Only messages published to `subject` with reply-to `reply`; responses
    /// default to carrying `reply`.
    Respond {
        /// Concrete subject a message must arrive on.
        subject: String,
        /// Reply-to address a message must carry.
        reply: String,
    },
}

/// Declared interest in a subject, activated once a connection exists.
#[derive(Clone)]
pub struct SubscriptionDescriptor {
    /// Subject or wildcard pattern.
    pub subject: String,
    /// Queue group and message limit.
    pub options: SubscriptionOptions,
    /// Consumer callback; without one the subscription is only registered.
    pub handler: Option<Handler>,
    /// Filtering applied by the consumer.
    pub delivery: DeliveryMode,
}

impl SubscriptionDescriptor {
    /// Data-mode descriptor without a handler.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            options: SubscriptionOptions::default(),
            handler: None,
            delivery: DeliveryMode::Data,
        }
    }

    /// Replace the subscription options.
    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }

    /// Attach a consumer callback.
    pub fn with_handler(mut self, handler: Handler) -> Self {
        self.handler = Some(handler);
        self
    }

    pub(crate) fn with_delivery(mut self, delivery: DeliveryMode) -> Self {
        self.delivery = delivery;
        self
    }
}

impl std::fmt::Debug for SubscriptionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionDescriptor")
            .field("subject", &self.subject)
            .field("options", &self.options)
            .field("handler", &self.handler.is_some())
            .field("delivery", &self.delivery)
            .finish()
    }
}

/// Parameters for a reply-serving loop.
#[derive(Clone)]
pub struct RespondSpec {
    /// Concrete subject requests arrive on.
    pub subject: String,
    /// Reply-to address requests must carry.
    pub reply: String,
    /// Queue group and message limit.
    pub options: SubscriptionOptions,
    /// Callback answering each request.
    pub handler: Handler,
}

impl RespondSpec {
    /// Serve `subject` for requests that carry `reply`.
    pub fn new(subject: impl Into<String>, reply: impl Into<String>, handler: Handler) -> Self {
        Self {
            subject: subject.into(),
            reply: reply.into(),
            options: SubscriptionOptions::default(),
            handler,
        }
    }

    /// Replace the subscription options.
    pub fn with_options(mut self, options: SubscriptionOptions) -> Self {
        self.options = options;
        self
    }

    pub(crate) fn descriptor(&self) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new(self.subject.clone())
            .with_options(self.options.clone())
            .with_handler(self.handler.clone())
            .with_delivery(DeliveryMode::Respond {
                subject: self.subject.clone(),
                reply: self.reply.clone(),
            })
    }
}
