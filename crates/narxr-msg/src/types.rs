//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::headers::Headers;

/// Options applied when creating a subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionOptions {
    /// Queue group; each message goes to one member of the group.
    #[serde(default)]
    pub queue: Option<String>,
    /// Unsubscribe automatically after this many messages.
    #[serde(default)]
    pub max_messages: Option<usize>,
}

impl SubscriptionOptions {
    /// Options joining the given queue group.
    pub fn queue(group: impl Into<String>) -> Self {
        Self {
            queue: Some(group.into()),
            max_messages: None,
        }
    }

    /// Stop after `max` deliveries.
    pub fn with_max_messages(mut self, max: usize) -> Self {
        self.max_messages = Some(max);
        self
    }
}

/// Options applied to a single publish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    /// Reply-to subject carried with the message.
    pub reply: Option<String>,
    /// Headers carried with the message.
    pub headers: Option<Headers>,
}

impl PublishOptions {
    /// Options carrying a reply-to subject.
    pub fn reply(reply: impl Into<String>) -> Self {
        Self {
            reply: Some(reply.into()),
            headers: None,
        }
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Options applied to a single request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Reply deadline. The transport default applies when unset.
    pub timeout: Option<Duration>,
    /// Headers carried with the request.
    pub headers: Option<Headers>,
}

impl RequestOptions {
    /// Options with an explicit deadline.
    pub fn timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            headers: None,
        }
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// Undecoded message as delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Concrete subject the message was published to.
    pub subject: String,
    /// Reply-to subject, if the sender expects an answer.
    pub reply: Option<String>,
    /// Encoded payload.
    pub payload: Bytes,
    /// Headers sent with the message.
    pub headers: Option<Headers>,
}

impl RawMessage {
    /// Message without reply-to or headers.
    pub fn new(subject: impl Into<String>, payload: Bytes) -> Self {
        Self {
            subject: subject.into(),
            reply: None,
            payload,
            headers: None,
        }
    }
}

/// Parameters handed to [`crate::Broker::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Candidate server URLs, tried in order.
    pub servers: Vec<String>,
    /// Display name announced to the broker.
    pub name: Option<String>,
    /// Reconnect limit; `None` reconnects forever.
    pub max_reconnect_attempts: Option<usize>,
    /// Keep retrying the very first connect instead of failing.
    pub wait_on_first_connect: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            servers: vec!["nats://localhost:4222".to_owned()],
            name: None,
            max_reconnect_attempts: None,
            wait_on_first_connect: true,
        }
    }
}
