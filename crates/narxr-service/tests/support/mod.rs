//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
#![allow(dead_code)]

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use narxr_common::ServiceConfig;
use narxr_msg::{InMemoryBroker, Payload};
use narxr_service::{handler, Handler, MessageEnvelope, NatsService};
use tokio::sync::mpsc;
use tracing::subscriber::DefaultGuard;

pub const WAIT: Duration = Duration::from_secs(2);

pub fn service(broker: &InMemoryBroker, name: &str) -> NatsService {
    NatsService::new(Arc::new(broker.clone()), &ServiceConfig::named(name))
}

pub fn quiet_service(broker: &InMemoryBroker, name: &str) -> NatsService {
    let mut config = ServiceConfig::named(name);
    config.view_errors = false;
    NatsService::new(Arc::new(broker.clone()), &config)
}

/// Handler forwarding every envelope into a channel.
pub fn collector() -> (Handler, mpsc::UnboundedReceiver<MessageEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = handler(move |envelope: MessageEnvelope| {
        let tx = tx.clone();
        async move {
            tx.send(envelope).ok();
            Ok(())
        }
    });
    (handler, rx)
}

pub async fn next_payload(rx: &mut mpsc::UnboundedReceiver<MessageEnvelope>) -> Payload {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("message within deadline")
        .expect("channel open")
        .payload
}

pub async fn assert_silent(rx: &mut mpsc::UnboundedReceiver<MessageEnvelope>) {
    let outcome = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(outcome.is_err(), "unexpected delivery: {outcome:?}");
}

/// Formatted log output collected for the current thread.
#[derive(Clone, Default)]
pub struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl LogCapture {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Route this thread's events into a buffer until the guard drops.
/// Only valid on the default current-thread test runtime.
pub fn capture_logs() -> (LogCapture, DefaultGuard) {
    let capture = LogCapture::default();
    let writer = capture.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(move || writer.clone())
        .finish();
    (capture, tracing::subscriber::set_default(subscriber))
}
