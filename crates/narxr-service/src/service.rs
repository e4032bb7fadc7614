//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use narxr_common::ServiceConfig;
use narxr_logging::{nx_info, nx_warn, LogContext};
use narxr_msg::{
    decode, encode, is_valid_publish_subject, is_valid_subject, Broker, CodecError,
    ConnectOptions, Connection, HeaderBuilder, Headers, MessagingMetricsExporter,
    PublishOptions, RequestOptions, Subscription, SubscriptionOptions, TransportError,
    TransportResult,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionManager, ConnectionState, Registration};
use crate::consumer::spawn_consumer;
use crate::descriptor::{DeliveryMode, RespondSpec, SubscriptionDescriptor};
use crate::envelope::Handler;
use crate::report::ErrorReporter;
use crate::retry::RetryPolicy;
use crate::ServiceError;

/// Publish/subscribe client façade.
///
/// Cheap to clone; clones share the connection, registry and queue.
#[derive(Clone)]
pub struct NatsService {
    core: Arc<ConnectionManager>,
    headers: HeaderBuilder,
    request_timeout: Duration,
    publish_policy: RetryPolicy,
    respond_policy: RetryPolicy,
    reporter: ErrorReporter,
    metrics: Option<Arc<MessagingMetricsExporter>>,
}

impl NatsService {
    /// Service over `broker`. Nothing connects until [`Self::init`].
    pub fn new(broker: Arc<dyn Broker>, config: &ServiceConfig) -> Self {
        Self::build(broker, config, None)
    }

    /// Service that records activity into `metrics`.
    pub fn with_metrics(
        broker: Arc<dyn Broker>,
        config: &ServiceConfig,
        metrics: Arc<MessagingMetricsExporter>,
    ) -> Self {
        Self::build(broker, config, Some(metrics))
    }

    fn build(
        broker: Arc<dyn Broker>,
        config: &ServiceConfig,
        metrics: Option<Arc<MessagingMetricsExporter>>,
    ) -> Self {
        let server_name = config.server_name().to_owned();
        let reporter = ErrorReporter::new(config.view_errors, server_name.clone());
        let options = ConnectOptions {
            servers: config.connection.servers.clone(),
            name: config.connection.name.clone(),
            max_reconnect_attempts: config.connection.max_reconnect_attempts,
            wait_on_first_connect: config.connection.wait_on_first_connect,
        };
        let respond_policy = RetryPolicy::from(&config.retry.respond);
        let core = ConnectionManager::new(
            broker,
            options,
            reporter.clone(),
            metrics.clone(),
            respond_policy.clone(),
        );
        Self {
            core,
            headers: HeaderBuilder::new(server_name),
            request_timeout: config.request.timeout,
            publish_policy: RetryPolicy::from(&config.retry.publish),
            respond_policy,
            reporter,
            metrics,
        }
    }

    /// Override the publish failure policy.
    pub fn with_publish_policy(mut self, policy: RetryPolicy) -> Self {
        self.publish_policy = policy;
        self
    }

    /// Override the respond failure policy, including retries of respond
    /// loops queued before the connection came up.
    pub fn with_respond_policy(mut self, policy: RetryPolicy) -> Self {
        self.core.set_respond_policy(policy.clone());
        self.respond_policy = policy;
        self
    }

    /// Connect and activate queued subscriptions.
    pub async fn init(&self) -> bool {
        self.core.init().await
    }

    /// Run [`Self::init`] in the background.
    pub fn spawn_init(&self) -> JoinHandle<bool> {
        let service = self.clone();
        tokio::spawn(async move { service.init().await })
    }

    /// Drain all subscriptions and close the connection.
    pub async fn shutdown(&self) {
        self.core.shutdown().await;
    }

    /// Connection lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Live connection handle, if connected.
    pub fn connection(&self) -> Option<Arc<dyn Connection>> {
        self.core.connection()
    }

    /// Display name stamped into headers.
    pub fn server_name(&self) -> &str {
        self.core.server_name()
    }

    /// Subjects with an active subscription.
    pub fn subjects(&self) -> Vec<String> {
        self.core.registry().subjects()
    }

    /// Descriptors waiting for a connection.
    pub fn pending_subscriptions(&self) -> usize {
        self.core.pending()
    }

    /// Declare a subscription. It is queued until connected, activated
    /// immediately otherwise. Returns `false` for an invalid subject or a
    /// failed activation.
    pub async fn subs(&self, descriptor: SubscriptionDescriptor) -> bool {
        if !is_valid_subject(&descriptor.subject) {
            self.reporter.message(
                &descriptor.subject,
                &format!("[{}] invalid subject", descriptor.subject),
            );
            return false;
        }
        !matches!(
            self.core.register(descriptor).await,
            Registration::Failed
        )
    }

    /// Subscribe directly and register the handle, without a consumer.
    pub async fn sub(
        &self,
        subject: &str,
        options: SubscriptionOptions,
    ) -> Option<Arc<dyn Subscription>> {
        let connection = self.core.connection()?;
        self.core
            .registry()
            .subscribe(&connection, subject, &options)
            .await
    }

    /// Feed an existing handle into `handler` until it closes.
    pub fn consume(
        &self,
        subscription: Arc<dyn Subscription>,
        handler: Handler,
    ) -> Option<JoinHandle<()>> {
        let connection = self.core.connection()?;
        Some(spawn_consumer(
            subscription,
            handler,
            DeliveryMode::Data,
            self.core.consumer_context(connection),
        ))
    }

    /// Handle registered for `subject`. A miss triggers one initialisation
    /// pass (connect if needed, drain the queue) and a second lookup.
    pub async fn get_sub(&self, subject: &str) -> Option<Arc<dyn Subscription>> {
        if let Some(handle) = self.core.registry().lookup(subject) {
            return Some(handle);
        }
        self.core.init().await;
        self.core.registry().lookup(subject)
    }

    /// Drain and forget the handle for `subject`. Returns whether it closed.
    pub async fn del_sub(&self, subject: &str) -> bool {
        self.core.registry().remove(subject).await
    }

    async fn try_publish(
        &self,
        subject: &str,
        payload: Bytes,
        options: &PublishOptions,
    ) -> TransportResult<()> {
        let connection = self.core.connection().ok_or(TransportError::NotConnected)?;
        connection.publish(subject, payload, options).await?;
        connection.flush().await
    }

    /// Publish `data` to `subject`.
    ///
    /// Serialisation errors are returned. Transport failures are reported and
    /// retried per the publish policy; `Ok(false)` once the budget is spent.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        subject: &str,
        data: &T,
        options: PublishOptions,
    ) -> Result<bool, CodecError> {
        let payload = encode(data)?;
        if !is_valid_publish_subject(subject) {
            self.reporter.transport(
                subject,
                &TransportError::InvalidSubject(subject.to_owned()),
            );
            return Ok(false);
        }

        let mut schedule = self.publish_policy.schedule();
        loop {
            let attempt = schedule.next_attempt();
            match self.try_publish(subject, payload.clone(), &options).await {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.observe_published();
                    }
                    return Ok(true);
                }
                Err(err) => self.reporter.transport(subject, &err),
            }
            if schedule.is_exhausted() {
                if attempt > 1 {
                    nx_warn!(
                        context = LogContext::new()
                            .with_subject(subject)
                            .with_server(self.server_name()),
                        "publish gave up after {} attempts",
                        attempt
                    );
                }
                if let Some(metrics) = &self.metrics {
                    metrics.observe_dropped();
                }
                return Ok(false);
            }
            schedule.wait().await;
        }
    }

    /// Send a request and decode the reply into `R`.
    ///
    /// `Ok(None)` covers an invalid subject, a missing connection, timeouts,
    /// missing responders, transport errors and replies that do not convert.
    pub async fn request<R, T>(
        &self,
        subject: &str,
        data: &T,
        options: RequestOptions,
    ) -> Result<Option<R>, CodecError>
    where
        R: DeserializeOwned,
        T: Serialize + ?Sized,
    {
        if !is_valid_publish_subject(subject) {
            return Ok(None);
        }
        let Some(connection) = self.core.connection() else {
            self.reporter.transport(subject, &TransportError::NotConnected);
            self.record_request_failure();
            return Ok(None);
        };
        let payload = encode(data)?;
        if let Err(err) = connection.flush().await {
            self.reporter.transport(subject, &err);
            self.record_request_failure();
            return Ok(None);
        }

        let options = RequestOptions {
            timeout: Some(options.timeout.unwrap_or(self.request_timeout)),
            headers: options.headers,
        };
        let started = Instant::now();
        let reply = match connection.request(subject, payload, &options).await {
            Ok(reply) => reply,
            Err(err) => {
                self.reporter.transport(subject, &err);
                self.record_request_failure();
                return Ok(None);
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_latency(started.elapsed());
        }

        match decode(&reply.payload).deserialize::<R>() {
            Ok(value) => Ok(Some(value)),
            Err(err) => {
                self.reporter
                    .message(subject, &format!("[{subject}] unexpected reply: {err}"));
                self.record_request_failure();
                Ok(None)
            }
        }
    }

    fn record_request_failure(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.observe_request_failure();
        }
    }

    /// Serve requests on `spec.subject` that carry `spec.reply`.
    ///
    /// `Ok(false)` for an invalid subject or reply, `Ok(true)` once the loop
    /// is queued or running. Activation failures are retried per the respond
    /// policy; a bounded budget that runs out yields
    /// [`ServiceError::RetriesExhausted`]. A queued loop that fails to
    /// subscribe on connect is retried in the background under the same
    /// policy.
    pub async fn respond(&self, spec: RespondSpec) -> Result<bool, ServiceError> {
        if !is_valid_publish_subject(&spec.subject) || !is_valid_publish_subject(&spec.reply) {
            self.reporter.message(
                &spec.subject,
                &format!("[{}] invalid respond subject or reply", spec.subject),
            );
            return Ok(false);
        }

        let mut schedule = self.respond_policy.schedule();
        loop {
            let attempt = schedule.next_attempt();
            match self.core.register(spec.descriptor()).await {
                Registration::Queued => {
                    nx_info!(
                        context = self.respond_context(&spec),
                        "respond loop queued until connected"
                    );
                    return Ok(true);
                }
                Registration::Active(_) => {
                    nx_info!(context = self.respond_context(&spec), "respond loop listening");
                    return Ok(true);
                }
                Registration::Failed => {
                    if self.state() == ConnectionState::Closed {
                        return Ok(false);
                    }
                    self.reporter.message(
                        &spec.subject,
                        &format!("[{}] subscription not found", spec.subject),
                    );
                }
            }
            if schedule.is_exhausted() {
                return Err(ServiceError::RetriesExhausted {
                    pattern: "respond",
                    subject: spec.subject,
                    attempts: attempt,
                });
            }
            schedule.wait().await;
        }
    }

    fn respond_context<'a>(&'a self, spec: &'a RespondSpec) -> LogContext<'a> {
        LogContext::new()
            .with_subject(&spec.subject)
            .with_reply(&spec.reply)
            .with_server(self.server_name())
    }

    /// Header set stamped with this service's name.
    pub fn headers(&self, code: Option<u16>, description: Option<&str>) -> Headers {
        self.headers.build(code, description)
    }

    /// [`Self::headers`] extended with `params` in iteration order.
    pub fn header_add_params<I, K, V>(
        &self,
        params: I,
        code: Option<u16>,
        description: Option<&str>,
    ) -> Headers
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.headers.with_params(params, code, description)
    }
}
