//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
//! `async-nats` backed implementation of the transport seam.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_nats::client::RequestErrorKind;
use async_nats::{HeaderMap, ServerAddr};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::headers::Headers;
use crate::logging::{log_message, MessageDirection};
use crate::transport::{Broker, Connection, Subscription, DEFAULT_REQUEST_TIMEOUT};
use crate::types::{ConnectOptions, PublishOptions, RawMessage, RequestOptions, SubscriptionOptions};
use crate::{TransportError, TransportResult};

const STATUS_HEADER: &str = "Status";
const DESCRIPTION_HEADER: &str = "Description";

/// Broker backed by a NATS server.
#[derive(Debug, Clone, Copy, Default)]
pub struct NatsBroker;

impl NatsBroker {
    /// Create the broker factory.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn connect(&self, options: &ConnectOptions) -> TransportResult<Arc<dyn Connection>> {
        let addrs = options
            .servers
            .iter()
            .map(|server| {
                server.parse::<ServerAddr>().map_err(|err| {
                    TransportError::Connect(format!("invalid server '{server}': {err}"))
                })
            })
            .collect::<TransportResult<Vec<_>>>()?;

        let mut connect_options =
            async_nats::ConnectOptions::new().max_reconnects(options.max_reconnect_attempts);
        if let Some(name) = &options.name {
            connect_options = connect_options.name(name.as_str());
        }
        if options.wait_on_first_connect {
            connect_options = connect_options.retry_on_initial_connect();
        }

        let client = connect_options
            .connect(addrs.as_slice())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;
        debug!(servers = ?options.servers, "nats client connected");
        Ok(Arc::new(NatsConnection {
            client,
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}

struct NatsConnection {
    client: async_nats::Client,
    closed: AtomicBool,
}

impl NatsConnection {
    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Connection for NatsConnection {
    fn server(&self) -> String {
        let info = self.client.server_info();
        format!("{}:{}", info.host, info.port)
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> TransportResult<()> {
        self.ensure_open()?;
        log_message(MessageDirection::Outbound, subject, payload.len());
        let subject = subject.to_owned();
        let result = match (&options.reply, &options.headers) {
            (None, None) => self.client.publish(subject, payload).await,
            (Some(reply), None) => {
                self.client
                    .publish_with_reply(subject, reply.clone(), payload)
                    .await
            }
            (None, Some(headers)) => {
                self.client
                    .publish_with_headers(subject, to_header_map(headers), payload)
                    .await
            }
            (Some(reply), Some(headers)) => {
                self.client
                    .publish_with_reply_and_headers(
                        subject,
                        reply.clone(),
                        to_header_map(headers),
                        payload,
                    )
                    .await
            }
        };
        result.map_err(|err| TransportError::Publish(err.to_string()))
    }

    async fn subscribe(
        &self,
        subject: &str,
        options: &SubscriptionOptions,
    ) -> TransportResult<Arc<dyn Subscription>> {
        self.ensure_open()?;
        let mut subscriber = match &options.queue {
            Some(group) => {
                self.client
                    .queue_subscribe(subject.to_owned(), group.clone())
                    .await
            }
            None => self.client.subscribe(subject.to_owned()).await,
        }
        .map_err(|err| TransportError::Subscribe(err.to_string()))?;

        if let Some(max) = options.max_messages.filter(|max| *max > 0) {
            subscriber
                .unsubscribe_after(max as u64)
                .await
                .map_err(|err| TransportError::Subscribe(err.to_string()))?;
        }

        Ok(Arc::new(NatsSubscription::spawn(subject, subscriber)))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        options: &RequestOptions,
    ) -> TransportResult<RawMessage> {
        self.ensure_open()?;
        log_message(MessageDirection::Request, subject, payload.len());
        let mut request = async_nats::Request::new()
            .payload(payload)
            .timeout(Some(options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)));
        if let Some(headers) = &options.headers {
            request = request.headers(to_header_map(headers));
        }
        let message = self
            .client
            .send_request(subject.to_owned(), request)
            .await
            .map_err(|err| match err.kind() {
                RequestErrorKind::TimedOut => TransportError::Timeout,
                RequestErrorKind::NoResponders => TransportError::NoResponders,
                _ => TransportError::Request(err.to_string()),
            })?;
        let reply = to_raw_message(message);
        log_message(MessageDirection::Reply, &reply.subject, reply.payload.len());
        Ok(reply)
    }

    async fn flush(&self) -> TransportResult<()> {
        self.ensure_open()?;
        self.client
            .flush()
            .await
            .map_err(|err| TransportError::Flush(err.to_string()))
    }

    async fn close(&self) -> TransportResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.client
            .flush()
            .await
            .map_err(|err| TransportError::Flush(err.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Subscription whose messages are pumped from the client into a local channel
/// so `next` can be called through a shared reference.
struct NatsSubscription {
    subject: String,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<RawMessage>>,
    stop: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl NatsSubscription {
    fn spawn(subject: &str, mut subscriber: async_nats::Subscriber) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stop = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));

        let pump_stop = stop.clone();
        let pump_closed = closed.clone();
        let pump_subject = subject.to_owned();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_stop.notified() => {
                        pump_closed.store(true, Ordering::SeqCst);
                        if let Err(err) = subscriber.unsubscribe().await {
                            warn!(subject = %pump_subject, error = %err, "unsubscribe failed");
                        }
                        while let Some(message) = subscriber.next().await {
                            if sender.send(to_raw_message(message)).is_err() {
                                break;
                            }
                        }
                        break;
                    }
                    next = subscriber.next() => match next {
                        Some(message) => {
                            if sender.send(to_raw_message(message)).is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                }
            }
            pump_closed.store(true, Ordering::SeqCst);
            debug!(subject = %pump_subject, "subscription pump finished");
        });

        Self {
            subject: subject.to_owned(),
            receiver: tokio::sync::Mutex::new(receiver),
            stop,
            closed,
        }
    }
}

#[async_trait]
impl Subscription for NatsSubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next(&self) -> Option<RawMessage> {
        let message = self.receiver.lock().await.recv().await;
        match &message {
            Some(message) => {
                log_message(MessageDirection::Inbound, &message.subject, message.payload.len())
            }
            None => self.closed.store(true, Ordering::SeqCst),
        }
        message
    }

    async fn drain(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.stop.notify_one();
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for NatsSubscription {
    fn drop(&mut self) {
        self.stop.notify_one();
    }
}

fn to_header_map(headers: &Headers) -> HeaderMap {
    let mut map = HeaderMap::new();
    if let Some(code) = headers.code() {
        map.insert(STATUS_HEADER, code.to_string().as_str());
    }
    if let Some(description) = headers.description() {
        map.insert(DESCRIPTION_HEADER, description);
    }
    for (key, value) in headers.iter() {
        map.append(key, value);
    }
    map
}

fn from_header_map(map: &HeaderMap, status: Option<u16>, description: Option<&str>) -> Headers {
    let code = status.or_else(|| {
        map.get(STATUS_HEADER)
            .and_then(|value| value.as_str().parse().ok())
    });
    let description =
        description.or_else(|| map.get(DESCRIPTION_HEADER).map(|value| value.as_str()));
    let mut headers = Headers::with_status(code, description);
    for (name, values) in map.iter() {
        let key = name.to_string();
        if key == STATUS_HEADER || key == DESCRIPTION_HEADER {
            continue;
        }
        for value in values {
            headers.append(key.clone(), value.as_str());
        }
    }
    headers
}

fn to_raw_message(message: async_nats::Message) -> RawMessage {
    let status = message.status.map(|status| status.as_u16());
    let headers = match &message.headers {
        Some(map) => Some(from_header_map(
            map,
            status,
            message.description.as_deref(),
        )),
        None if status.is_some() || message.description.is_some() => Some(Headers::with_status(
            status,
            message.description.as_deref(),
        )),
        None => None,
    };
    RawMessage {
        subject: message.subject.to_string(),
        reply: message.reply.map(|reply| reply.to_string()),
        payload: message.payload,
        headers,
    }
}
