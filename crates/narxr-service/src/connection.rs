//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use narxr_logging::{log_broker_event, nx_info, nx_warn, BrokerEventOutcome, LogContext};
use narxr_msg::{Broker, ConnectOptions, Connection, MessagingMetricsExporter, Subscription};
use parking_lot::{Mutex, RwLock};

use crate::consumer::{spawn_consumer, ConsumerContext};
use crate::descriptor::{DeliveryMode, SubscriptionDescriptor};
use crate::registry::SubscriptionRegistry;
use crate::report::ErrorReporter;
use crate::retry::RetryPolicy;
use crate::ServiceError;

/// Lifecycle of the broker connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection yet, or the last attempt failed.
    Disconnected,
    /// A connect is in flight.
    Connecting,
    /// Connected; registrations are activated immediately.
    Connected,
    /// Shut down for good.
    Closed,
}

impl ConnectionState {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of handing a descriptor to the manager.
pub enum Registration {
    /// Stored until the connection is ready.
    Queued,
    /// Subscribed right away.
    Active(Arc<dyn Subscription>),
    /// A connection existed but the subscription could not be created.
    Failed,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Queued => f.write_str("Queued"),
            Registration::Active(handle) => write!(f, "Active({})", handle.subject()),
            Registration::Failed => f.write_str("Failed"),
        }
    }
}

/// Owns the broker connection, the pending registration queue and the
/// subscription registry.
pub struct ConnectionManager {
    broker: Arc<dyn Broker>,
    options: ConnectOptions,
    server_name: String,
    state: RwLock<ConnectionState>,
    connection: RwLock<Option<Arc<dyn Connection>>>,
    pending: Mutex<IndexMap<String, SubscriptionDescriptor>>,
    registry: SubscriptionRegistry,
    reporter: ErrorReporter,
    metrics: Option<Arc<MessagingMetricsExporter>>,
    respond_policy: RwLock<RetryPolicy>,
    lifecycle: tokio::sync::Mutex<()>,
    this: Weak<ConnectionManager>,
}

impl ConnectionManager {
    /// Manager for `broker`; nothing is connected until [`Self::init`].
    ///
    /// `respond_policy` paces retries of queued respond loops whose
    /// subscription fails when the queue is drained.
    pub fn new(
        broker: Arc<dyn Broker>,
        options: ConnectOptions,
        reporter: ErrorReporter,
        metrics: Option<Arc<MessagingMetricsExporter>>,
        respond_policy: RetryPolicy,
    ) -> Arc<Self> {
        let server_name = options.name.clone().unwrap_or_default();
        Arc::new_cyclic(|this| Self {
            broker,
            options,
            server_name,
            state: RwLock::new(ConnectionState::Disconnected),
            connection: RwLock::new(None),
            pending: Mutex::new(IndexMap::new()),
            registry: SubscriptionRegistry::new(reporter.clone()),
            reporter,
            metrics,
            respond_policy: RwLock::new(respond_policy),
            lifecycle: tokio::sync::Mutex::new(()),
            this: this.clone(),
        })
    }

    /// Replace the policy used for respond loops activated from the queue.
    pub fn set_respond_policy(&self, policy: RetryPolicy) {
        *self.respond_policy.write() = policy;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Live connection handle, if connected.
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.connection.read().clone()
    }

    /// Display name of this service instance.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Subscription registry.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Number of descriptors waiting for a connection.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new().with_server(&self.server_name)
    }

    /// Connect if needed, then activate queued descriptors.
    ///
    /// Returns whether a connection is available afterwards. Failures are
    /// logged and leave the manager `Disconnected`; reconnects are the
    /// transport's business.
    pub async fn init(&self) -> bool {
        let _lifecycle = self.lifecycle.lock().await;
        match self.state() {
            ConnectionState::Closed => return false,
            ConnectionState::Connected => {
                self.drain_queue().await;
                return true;
            }
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        *self.state.write() = ConnectionState::Connecting;
        match self.broker.connect(&self.options).await {
            Ok(connection) => {
                let server = connection.server();
                *self.connection.write() = Some(connection);
                *self.state.write() = ConnectionState::Connected;
                log_broker_event(
                    Some(&self.log_context()),
                    "broker.connect",
                    &format!("connected to {server} via {}", self.broker.name()),
                    BrokerEventOutcome::Success,
                );
                self.drain_queue().await;
                true
            }
            Err(err) => {
                *self.state.write() = ConnectionState::Disconnected;
                log_broker_event(
                    Some(&self.log_context()),
                    "broker.connect",
                    &err.to_string(),
                    BrokerEventOutcome::Fault,
                );
                self.reporter.message("connect", &err.to_string());
                false
            }
        }
    }

    /// Activate every queued descriptor. Returns how many became active.
    ///
    /// A respond loop that fails to subscribe here keeps retrying in the
    /// background under the respond policy.
    pub async fn drain_queue(&self) -> usize {
        let queued = std::mem::take(&mut *self.pending.lock());
        if queued.is_empty() {
            return 0;
        }
        nx_info!(
            context = self.log_context(),
            "activating {} queued subscription(s)",
            queued.len()
        );
        let mut activated = 0;
        for (_, descriptor) in queued {
            if self.activate(&descriptor).await.is_some() {
                activated += 1;
            } else if matches!(descriptor.delivery, DeliveryMode::Respond { .. }) {
                self.spawn_respond_retry(descriptor);
            }
        }
        activated
    }

    fn spawn_respond_retry(&self, descriptor: SubscriptionDescriptor) {
        let this = self.this.clone();
        let mut schedule = self.respond_policy.read().schedule();
        // the drain itself was the first attempt
        schedule.next_attempt();
        tokio::spawn(async move {
            loop {
                if schedule.is_exhausted() {
                    if let Some(manager) = this.upgrade() {
                        let err = ServiceError::RetriesExhausted {
                            pattern: "respond",
                            subject: descriptor.subject.clone(),
                            attempts: schedule.attempts(),
                        };
                        manager.reporter.message(&descriptor.subject, &err.to_string());
                    }
                    return;
                }
                schedule.wait().await;
                let Some(manager) = this.upgrade() else {
                    return;
                };
                if manager.state() == ConnectionState::Closed
                    || manager.registry.lookup(&descriptor.subject).is_some()
                {
                    return;
                }
                let attempt = schedule.next_attempt();
                match manager.register(descriptor.clone()).await {
                    Registration::Active(_) => {
                        nx_info!(
                            context = manager.log_context().with_subject(&descriptor.subject),
                            "respond loop listening after {} attempts",
                            attempt
                        );
                        return;
                    }
                    Registration::Queued => return,
                    Registration::Failed => manager.reporter.message(
                        &descriptor.subject,
                        &format!("[{}] subscription not found", descriptor.subject),
                    ),
                }
            }
        });
    }

    /// Queue `descriptor` or, when connected, activate it right away.
    ///
    /// Queued descriptors for the same subject collapse to the latest one
    /// while keeping the position of the first.
    pub async fn register(&self, descriptor: SubscriptionDescriptor) -> Registration {
        {
            let mut pending = self.pending.lock();
            if self.state() == ConnectionState::Closed {
                return Registration::Failed;
            }
            if self.connection.read().is_none() {
                pending.insert(descriptor.subject.clone(), descriptor);
                return Registration::Queued;
            }
        }
        match self.activate(&descriptor).await {
            Some(handle) => Registration::Active(handle),
            None => Registration::Failed,
        }
    }

    /// Subscribe a descriptor and start its consumer when it has a handler.
    pub(crate) async fn activate(
        &self,
        descriptor: &SubscriptionDescriptor,
    ) -> Option<Arc<dyn Subscription>> {
        let Some(connection) = self.connection() else {
            nx_warn!(
                context = self.log_context().with_subject(&descriptor.subject),
                "no connection; subscription not activated"
            );
            return None;
        };
        let handle = self
            .registry
            .subscribe(&connection, &descriptor.subject, &descriptor.options)
            .await?;
        if let Some(handler) = &descriptor.handler {
            spawn_consumer(
                handle.clone(),
                handler.clone(),
                descriptor.delivery.clone(),
                self.consumer_context(connection),
            );
        }
        Some(handle)
    }

    pub(crate) fn consumer_context(&self, connection: Arc<dyn Connection>) -> ConsumerContext {
        ConsumerContext {
            connection,
            reporter: self.reporter.clone(),
            server: self.server_name.clone(),
            metrics: self.metrics.clone(),
        }
    }

    /// Drain every subscription, close the connection and refuse further use.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Closed {
            return;
        }
        let connection = {
            let mut pending = self.pending.lock();
            pending.clear();
            *self.state.write() = ConnectionState::Closed;
            self.connection.write().take()
        };
        let drained = self.registry.drain_all().await;

        let (message, outcome) = match connection {
            Some(connection) => match connection.close().await {
                Ok(()) => (
                    format!("closed after draining {drained} subscription(s)"),
                    BrokerEventOutcome::Success,
                ),
                Err(err) => {
                    self.reporter.transport("shutdown", &err);
                    (err.to_string(), BrokerEventOutcome::Fault)
                }
            },
            None => ("closed before connecting".to_owned(), BrokerEventOutcome::Success),
        };
        log_broker_event(
            Some(&self.log_context()),
            "broker.shutdown",
            &message,
            outcome,
        );
    }
}
