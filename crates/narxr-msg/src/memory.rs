//! ---
//! narxr_section: "02-messaging"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Payload codecs and broker transports."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

use crate::logging::{log_message, MessageDirection};
use crate::subject::{is_valid_publish_subject, is_valid_subject, subject_matches};
use crate::transport::{Broker, Connection, Subscription, DEFAULT_REQUEST_TIMEOUT};
use crate::types::{ConnectOptions, PublishOptions, RawMessage, RequestOptions, SubscriptionOptions};
use crate::{TransportError, TransportResult};

const INBOX_PREFIX: &str = "_INBOX";
const LOCAL_SERVER: &str = "memory://local";

struct Route {
    sid: u64,
    connection: u64,
    pattern: String,
    queue: Option<String>,
    remaining: Option<usize>,
    sender: mpsc::UnboundedSender<RawMessage>,
    closed: Arc<AtomicBool>,
}

#[derive(Default)]
struct BrokerState {
    unreachable: AtomicBool,
    reject_publish: AtomicBool,
    failing_subscribes: AtomicUsize,
    next_id: AtomicU64,
    connects: AtomicUsize,
    queue_cursor: AtomicUsize,
    routes: Mutex<Vec<Route>>,
    published: Mutex<Vec<RawMessage>>,
}

/// In-process broker used by tests and single-process setups.
///
/// Supports `*`/`>` wildcards, queue groups (round-robin), per-subscription
/// message limits and request-reply through private inboxes. Reachability and
/// publish rejection can be toggled to exercise failure paths.
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl InMemoryBroker {
    /// Create an empty, reachable broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent connects succeed or fail.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Make subsequent publishes and requests fail.
    pub fn reject_publishes(&self, reject: bool) {
        self.state.reject_publish.store(reject, Ordering::SeqCst);
    }

    /// Make the next `count` subscribes fail, on any connection.
    pub fn fail_subscribes(&self, count: usize) {
        self.state.failing_subscribes.store(count, Ordering::SeqCst);
    }

    /// Number of successful connects so far.
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Every message accepted for routing, in publish order.
    pub fn published(&self) -> Vec<RawMessage> {
        self.state.published.lock().clone()
    }

    /// Accepted messages published to exactly `subject`.
    pub fn published_to(&self, subject: &str) -> Vec<RawMessage> {
        self.state
            .published
            .lock()
            .iter()
            .filter(|message| message.subject == subject)
            .cloned()
            .collect()
    }

    /// Number of live subscriptions registered with exactly this pattern.
    pub fn subscriber_count(&self, pattern: &str) -> usize {
        self.state
            .routes
            .lock()
            .iter()
            .filter(|route| route.pattern == pattern)
            .count()
    }

    fn next_id(&self) -> u64 {
        self.state.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn add_route(
        &self,
        connection: u64,
        pattern: &str,
        options: &SubscriptionOptions,
    ) -> (u64, mpsc::UnboundedReceiver<RawMessage>, Arc<AtomicBool>) {
        let sid = self.next_id();
        let (sender, receiver) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        self.state.routes.lock().push(Route {
            sid,
            connection,
            pattern: pattern.to_owned(),
            queue: options.queue.clone(),
            remaining: options.max_messages.filter(|max| *max > 0),
            sender,
            closed: closed.clone(),
        });
        (sid, receiver, closed)
    }

    fn remove_routes(&self, predicate: impl Fn(&Route) -> bool) {
        self.state.routes.lock().retain(|route| {
            if predicate(route) {
                route.closed.store(true, Ordering::SeqCst);
                false
            } else {
                true
            }
        });
    }

    fn record(&self, message: &RawMessage) {
        self.state.published.lock().push(message.clone());
    }

    /// Deliver to every matching plain subscription and one member per queue group.
    fn route(&self, message: &RawMessage) -> usize {
        let mut routes = self.state.routes.lock();
        let mut targets = Vec::new();
        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
        for (index, route) in routes.iter().enumerate() {
            if !subject_matches(&route.pattern, &message.subject) {
                continue;
            }
            match &route.queue {
                Some(group) => groups.entry(group.clone()).or_default().push(index),
                None => targets.push(index),
            }
        }
        for members in groups.values() {
            let pick = self.state.queue_cursor.fetch_add(1, Ordering::SeqCst) % members.len();
            targets.push(members[pick]);
        }

        let mut delivered = 0;
        let mut finished = Vec::new();
        for index in targets {
            let route = &mut routes[index];
            if route.sender.send(message.clone()).is_err() {
                finished.push(route.sid);
                continue;
            }
            delivered += 1;
            if let Some(remaining) = route.remaining.as_mut() {
                *remaining -= 1;
                if *remaining == 0 {
                    finished.push(route.sid);
                }
            }
        }
        routes.retain(|route| {
            let keep = !finished.contains(&route.sid);
            if !keep {
                route.closed.store(true, Ordering::SeqCst);
            }
            keep
        });
        delivered
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn connect(&self, options: &ConnectOptions) -> TransportResult<Arc<dyn Connection>> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(TransportError::Connect(format!(
                "no servers available for connection: {}",
                options.servers.join(", ")
            )));
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        let server = options
            .servers
            .first()
            .cloned()
            .unwrap_or_else(|| LOCAL_SERVER.to_owned());
        debug!(server = %server, name = ?options.name, "in-memory broker connected");
        Ok(Arc::new(InMemoryConnection {
            id: self.next_id(),
            server,
            broker: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}

struct InMemoryConnection {
    id: u64,
    server: String,
    broker: InMemoryBroker,
    closed: AtomicBool,
}

impl InMemoryConnection {
    fn ensure_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    fn ensure_accepting(&self, subject: &str) -> TransportResult<()> {
        self.ensure_open()?;
        if !is_valid_publish_subject(subject) {
            return Err(TransportError::InvalidSubject(subject.to_owned()));
        }
        if self.broker.state.reject_publish.load(Ordering::SeqCst) {
            return Err(TransportError::Publish(format!(
                "broker rejected message on '{subject}'"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn server(&self) -> String {
        self.server.clone()
    }

    async fn publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> TransportResult<()> {
        self.ensure_accepting(subject)?;
        let message = RawMessage {
            subject: subject.to_owned(),
            reply: options.reply.clone(),
            payload,
            headers: options.headers.clone(),
        };
        log_message(MessageDirection::Outbound, subject, message.payload.len());
        self.broker.record(&message);
        self.broker.route(&message);
        Ok(())
    }

    async fn subscribe(
        &self,
        subject: &str,
        options: &SubscriptionOptions,
    ) -> TransportResult<Arc<dyn Subscription>> {
        self.ensure_open()?;
        if !is_valid_subject(subject) {
            return Err(TransportError::InvalidSubject(subject.to_owned()));
        }
        let failing = &self.broker.state.failing_subscribes;
        if failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Subscribe(format!(
                "broker refused subscription on '{subject}'"
            )));
        }
        let (sid, receiver, closed) = self.broker.add_route(self.id, subject, options);
        Ok(Arc::new(InMemorySubscription {
            sid,
            subject: subject.to_owned(),
            broker: self.broker.clone(),
            receiver: tokio::sync::Mutex::new(receiver),
            closed,
        }))
    }

    async fn request(
        &self,
        subject: &str,
        payload: Bytes,
        options: &RequestOptions,
    ) -> TransportResult<RawMessage> {
        self.ensure_accepting(subject)?;
        let inbox = format!("{INBOX_PREFIX}.{}", Uuid::new_v4().simple());
        let (sid, mut receiver, _) = self.broker.add_route(
            self.id,
            &inbox,
            &SubscriptionOptions::default().with_max_messages(1),
        );
        let message = RawMessage {
            subject: subject.to_owned(),
            reply: Some(inbox),
            payload,
            headers: options.headers.clone(),
        };
        log_message(MessageDirection::Request, subject, message.payload.len());
        self.broker.record(&message);
        if self.broker.route(&message) == 0 {
            self.broker.remove_routes(|route| route.sid == sid);
            return Err(TransportError::NoResponders);
        }

        let timeout = options.timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(reply)) => {
                log_message(MessageDirection::Reply, &reply.subject, reply.payload.len());
                Ok(reply)
            }
            Ok(None) => Err(TransportError::Request("reply inbox closed".to_owned())),
            Err(_) => {
                self.broker.remove_routes(|route| route.sid == sid);
                Err(TransportError::Timeout)
            }
        }
    }

    async fn flush(&self) -> TransportResult<()> {
        self.ensure_open()
    }

    async fn close(&self) -> TransportResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        let id = self.id;
        self.broker.remove_routes(|route| route.connection == id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct InMemorySubscription {
    sid: u64,
    subject: String,
    broker: InMemoryBroker,
    receiver: tokio::sync::Mutex<mpsc::UnboundedReceiver<RawMessage>>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Subscription for InMemorySubscription {
    fn subject(&self) -> &str {
        &self.subject
    }

    async fn next(&self) -> Option<RawMessage> {
        let mut receiver = self.receiver.lock().await;
        match receiver.recv().await {
            Some(message) => {
                log_message(MessageDirection::Inbound, &message.subject, message.payload.len());
                Some(message)
            }
            None => {
                self.closed.store(true, Ordering::SeqCst);
                None
            }
        }
    }

    async fn drain(&self) -> TransportResult<()> {
        let sid = self.sid;
        self.broker.remove_routes(|route| route.sid == sid);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Drop for InMemorySubscription {
    fn drop(&mut self) {
        let sid = self.sid;
        self.broker.remove_routes(|route| route.sid == sid);
    }
}
