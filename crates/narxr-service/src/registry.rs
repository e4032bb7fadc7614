//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::Arc;

use narxr_msg::{is_valid_subject, Connection, Subscription, SubscriptionOptions};
use parking_lot::{Mutex, RwLock};

use crate::report::ErrorReporter;

/// Active subscriptions keyed by subject, at most one per subject.
///
/// Mutations of one subject are serialised by a per-subject async lock so
/// concurrent re-registrations never leak a handle; different subjects do not
/// contend.
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<String, Arc<dyn Subscription>>>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    reporter: ErrorReporter,
}

impl SubscriptionRegistry {
    /// Empty registry reporting failures through `reporter`.
    pub fn new(reporter: ErrorReporter) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            reporter,
        }
    }

    fn subject_lock(&self, subject: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(subject.to_owned())
            .or_default()
            .clone()
    }

    /// Forget the lock for `subject` once no handle is stored and nobody
    /// else holds it.
    fn release_lock(&self, subject: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        let idle = locks
            .get(subject)
            .is_some_and(|held| Arc::strong_count(held) == 1);
        if idle && !self.entries.read().contains_key(subject) {
            locks.remove(subject);
        }
    }

    /// Subscribe through `connection` and store the handle.
    ///
    /// Any handle already stored for `subject` is drained first. Returns
    /// `None` when the subject is invalid or the transport refuses it.
    pub async fn subscribe(
        &self,
        connection: &Arc<dyn Connection>,
        subject: &str,
        options: &SubscriptionOptions,
    ) -> Option<Arc<dyn Subscription>> {
        if !is_valid_subject(subject) {
            self.reporter
                .message(subject, &format!("[{subject}] invalid subject"));
            return None;
        }
        let lock = self.subject_lock(subject);
        let guard = lock.lock().await;

        let previous = self.entries.write().remove(subject);
        if let Some(previous) = previous {
            if let Err(err) = previous.drain().await {
                self.reporter.transport(subject, &err);
            }
        }

        let stored = match connection.subscribe(subject, options).await {
            Ok(handle) => {
                self.entries
                    .write()
                    .insert(subject.to_owned(), handle.clone());
                Some(handle)
            }
            Err(err) => {
                self.reporter.transport(subject, &err);
                None
            }
        };
        drop(guard);
        self.release_lock(subject, lock);
        stored
    }

    /// Stored handle for `subject`, if any.
    pub fn lookup(&self, subject: &str) -> Option<Arc<dyn Subscription>> {
        self.entries.read().get(subject).cloned()
    }

    /// Drain and forget the handle for `subject`.
    ///
    /// Returns whether the handle reports closed afterwards; unknown subjects
    /// yield `false`.
    pub async fn remove(&self, subject: &str) -> bool {
        let lock = self.subject_lock(subject);
        let guard = lock.lock().await;

        let removed = self.entries.write().remove(subject);
        let closed = match removed {
            Some(handle) => {
                if let Err(err) = handle.drain().await {
                    self.reporter.transport(subject, &err);
                }
                handle.is_closed()
            }
            None => false,
        };
        drop(guard);
        self.release_lock(subject, lock);
        closed
    }

    /// Drain every stored handle and empty the registry.
    pub async fn drain_all(&self) -> usize {
        let subjects = self.subjects();
        let mut drained = 0;
        for subject in subjects {
            if self.remove(&subject).await {
                drained += 1;
            }
        }
        drained
    }

    /// Subjects with a stored handle.
    pub fn subjects(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of stored handles.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    #[cfg(test)]
    fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use narxr_msg::{Broker, ConnectOptions, InMemoryBroker};

    async fn setup() -> (InMemoryBroker, Arc<dyn Connection>, SubscriptionRegistry) {
        let broker = InMemoryBroker::new();
        let connection = broker.connect(&ConnectOptions::default()).await.unwrap();
        (broker, connection, SubscriptionRegistry::new(ErrorReporter::new(false, "test")))
    }

    #[tokio::test]
    async fn re_registration_drains_previous_handle() {
        let (broker, conn, registry) = setup().await;
        let first = registry
            .subscribe(&conn, "a", &Default::default())
            .await
            .unwrap();
        let second = registry
            .subscribe(&conn, "a", &Default::default())
            .await
            .unwrap();

        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.len(), 1);
        assert_eq!(broker.subscriber_count("a"), 1);
    }

    #[tokio::test]
    async fn invalid_subject_is_not_registered() {
        let (_broker, conn, registry) = setup().await;
        assert!(registry.subscribe(&conn, "", &Default::default()).await.is_none());
        assert!(registry
            .subscribe(&conn, "a..b", &Default::default())
            .await
            .is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn remove_reports_closed_handles() {
        let (_broker, conn, registry) = setup().await;
        registry.subscribe(&conn, "a", &Default::default()).await.unwrap();
        assert!(registry.remove("a").await);
        assert!(registry.lookup("a").is_none());
        assert!(!registry.remove("a").await);
        assert!(!registry.remove("never").await);
    }

    #[tokio::test]
    async fn subject_locks_do_not_outlive_their_handles() {
        let (broker, conn, registry) = setup().await;
        registry.subscribe(&conn, "a", &Default::default()).await.unwrap();
        registry.subscribe(&conn, "b", &Default::default()).await.unwrap();
        assert_eq!(registry.lock_count(), 2);

        assert!(registry.remove("a").await);
        assert!(!registry.remove("never").await);
        assert_eq!(registry.lock_count(), 1);

        broker.fail_subscribes(1);
        assert!(registry.subscribe(&conn, "c", &Default::default()).await.is_none());
        assert_eq!(registry.lock_count(), 1);

        registry.drain_all().await;
        assert_eq!(registry.lock_count(), 0);
    }

    #[tokio::test]
    async fn concurrent_registrations_keep_one_handle() {
        let (broker, conn, registry) = setup().await;
        let registry = Arc::new(registry);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let conn = conn.clone();
            tasks.push(tokio::spawn(async move {
                registry.subscribe(&conn, "shared", &Default::default()).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(registry.len(), 1);
        assert_eq!(broker.subscriber_count("shared"), 1);
    }

    #[tokio::test]
    async fn drain_all_empties_registry() {
        let (broker, conn, registry) = setup().await;
        registry.subscribe(&conn, "a", &Default::default()).await.unwrap();
        registry.subscribe(&conn, "b.>", &Default::default()).await.unwrap();
        assert_eq!(registry.drain_all().await, 2);
        assert!(registry.is_empty());
        assert_eq!(broker.subscriber_count("b.>"), 0);
    }
}
