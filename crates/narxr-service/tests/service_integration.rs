//! ---
//! narxr_section: "04-service"
//! narxr_subsection: "module"
//! narxr_type: "source"
//! narxr_scope: "code"
//! narxr_description: "Broker client facade and messaging patterns."
//! narxr_version: "v0.0.0-prealpha"
//! narxr_owner: "tbd"
//! ---
mod support;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use narxr_common::ServiceConfig;
use narxr_msg::{
    InMemoryBroker, MessagingMetricsExporter, Payload, PublishOptions, RequestOptions,
    Subscription, SubscriptionOptions,
};
use narxr_service::{
    handler, ConnectionState, MessageEnvelope, NatsService, RetryPolicy, SubscriptionDescriptor,
};
use serde::Deserialize;
use serde_json::json;
use support::{assert_silent, capture_logs, collector, next_payload, quiet_service, service};

#[tokio::test]
async fn publish_without_broker_returns_false() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);
    for svc in [service(&broker, "svc1"), quiet_service(&broker, "svc1")] {
        assert!(!svc.init().await);
        assert_eq!(svc.state(), ConnectionState::Disconnected);
        assert!(!svc.publish("x.y", "hello", PublishOptions::default()).await.unwrap());
    }
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn publish_failures_are_logged_only_with_error_visibility() {
    let broker = InMemoryBroker::new();
    broker.set_reachable(false);

    let (logs, guard) = capture_logs();
    let svc = service(&broker, "svc1");
    assert!(!svc.publish("x.y", "hello", PublishOptions::default()).await.unwrap());
    assert!(logs.contents().contains("[x.y] nats is not connected"));
    drop(guard);

    let (logs, _guard) = capture_logs();
    let svc = quiet_service(&broker, "svc1");
    assert!(!svc.publish("x.y", "hello", PublishOptions::default()).await.unwrap());
    assert!(!logs.contents().contains("nats is"));
}

#[tokio::test]
async fn request_without_connection_is_none() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    let reply: Option<serde_json::Value> = svc
        .request("api.v1.hello", "hi", RequestOptions::default())
        .await
        .unwrap();
    assert!(reply.is_none());
}

#[tokio::test]
async fn malformed_subjects_never_reach_the_transport() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    assert!(svc.init().await);

    let reply: Option<String> = svc
        .request("", "hi", RequestOptions::default())
        .await
        .unwrap();
    assert!(reply.is_none());
    assert!(!svc.publish("a..b", "hi", PublishOptions::default()).await.unwrap());
    assert!(!svc.subs(SubscriptionDescriptor::new("")).await);
    assert!(broker.published().is_empty());
}

#[tokio::test]
async fn serialisation_errors_propagate() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    svc.init().await;
    let mut bad = std::collections::HashMap::new();
    bad.insert((1, 2), "tuple keys are not JSON");
    assert!(svc.publish("a", &bad, PublishOptions::default()).await.is_err());
}

#[tokio::test]
async fn duplicate_registrations_activate_once() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");

    assert!(svc.subs(SubscriptionDescriptor::new("a")).await);
    assert!(
        svc.subs(SubscriptionDescriptor::new("a").with_options(SubscriptionOptions::queue("g")))
            .await
    );
    assert!(svc.subs(SubscriptionDescriptor::new("b")).await);
    assert_eq!(svc.pending_subscriptions(), 2);

    assert!(svc.init().await);
    assert_eq!(svc.pending_subscriptions(), 0);
    assert_eq!(broker.subscriber_count("a"), 1);
    assert_eq!(broker.subscriber_count("b"), 1);

    let handle = svc.get_sub("a").await.expect("one handle for a");
    assert_eq!(handle.subject(), "a");
    let mut subjects = svc.subjects();
    subjects.sort();
    assert_eq!(subjects, vec!["a".to_owned(), "b".to_owned()]);
}

#[tokio::test]
async fn get_sub_initialises_lazily() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    svc.subs(SubscriptionDescriptor::new("lazy")).await;
    assert_eq!(broker.connect_count(), 0);

    assert!(svc.get_sub("lazy").await.is_some());
    assert_eq!(broker.connect_count(), 1);
    assert!(svc.get_sub("missing").await.is_none());
    assert_eq!(broker.connect_count(), 1);
}

#[tokio::test]
async fn del_sub_drains_and_forgets() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    svc.init().await;
    let handle = svc.sub("orders.*", SubscriptionOptions::default()).await.unwrap();

    assert!(svc.del_sub("orders.*").await);
    assert!(handle.is_closed());
    assert_eq!(broker.subscriber_count("orders.*"), 0);
    assert!(!svc.del_sub("orders.*").await);
}

#[tokio::test]
async fn data_handlers_skip_empty_payloads() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    let (handler, mut rx) = collector();
    svc.subs(SubscriptionDescriptor::new("feed").with_handler(handler))
        .await;
    svc.init().await;

    for value in [json!(0), json!(null), json!(false), json!("")] {
        svc.publish("feed", &value, PublishOptions::default())
            .await
            .unwrap();
    }
    svc.publish("feed", &json!({"n": 1}), PublishOptions::default())
        .await
        .unwrap();
    svc.publish("feed", "plain", PublishOptions::default())
        .await
        .unwrap();

    assert_eq!(next_payload(&mut rx).await, Payload::Structured(json!({"n": 1})));
    assert_eq!(next_payload(&mut rx).await, Payload::Text("plain".into()));
    assert_silent(&mut rx).await;
}

#[tokio::test]
async fn envelope_describes_the_message() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    svc.init().await;
    let (handler, mut rx) = collector();
    svc.subs(SubscriptionDescriptor::new("events.>").with_handler(handler))
        .await;

    let headers = svc.header_add_params([("trace", "t-1")], None, None);
    svc.publish(
        "events.user.created",
        &json!({"id": 3}),
        PublishOptions::reply("audit").with_headers(headers),
    )
    .await
    .unwrap();

    let envelope = tokio::time::timeout(support::WAIT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(envelope.catching_subject, "events.>");
    assert_eq!(envelope.sender_subject, "events.user.created");
    assert_eq!(envelope.reply_to.as_deref(), Some("audit"));
    let headers = envelope.headers.as_ref().unwrap();
    assert_eq!(headers.get("serverName"), Some("svc1"));
    assert_eq!(headers.get("trace"), Some("t-1"));

    #[derive(Deserialize, PartialEq, Debug)]
    struct Created {
        id: u32,
    }
    assert_eq!(envelope.payload_as::<Created>(), Some(Created { id: 3 }));
}

#[tokio::test]
async fn handler_failures_do_not_stop_the_loop() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    svc.init().await;
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let flaky = handler(move |envelope: MessageEnvelope| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            match envelope.payload.as_text() {
                Some("fail") => anyhow::bail!("handler refused"),
                Some("panic") => panic!("handler exploded"),
                _ => Ok(()),
            }
        }
    });
    svc.subs(SubscriptionDescriptor::new("jobs").with_handler(flaky))
        .await;

    for body in ["fail", "panic", "ok"] {
        svc.publish("jobs", body, PublishOptions::default())
            .await
            .unwrap();
    }
    tokio::time::timeout(support::WAIT, async {
        while seen.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("all three messages handled");
}

#[tokio::test]
async fn consume_attaches_a_loop_to_an_existing_handle() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    let (handler, mut rx) = collector();
    let handle = svc.sub("direct", SubscriptionOptions::default()).await;
    assert!(handle.is_none());
    assert!(svc.connection().is_none());

    svc.init().await;
    let handle = svc.sub("direct", SubscriptionOptions::default()).await.unwrap();
    let task = svc.consume(handle, handler).expect("connected");
    svc.publish("direct", &json!([1, 2]), PublishOptions::default())
        .await
        .unwrap();
    assert_eq!(next_payload(&mut rx).await, Payload::Structured(json!([1, 2])));

    svc.del_sub("direct").await;
    tokio::time::timeout(support::WAIT, task)
        .await
        .expect("loop ends after drain")
        .unwrap();
}

#[tokio::test]
async fn request_reply_round_trip() {
    let broker = InMemoryBroker::new();
    let server = service(&broker, "server");
    let client = service(&broker, "client");
    server.init().await;
    client.init().await;

    let echo = handler(|envelope: MessageEnvelope| async move {
        let name = envelope.payload.to_string();
        envelope
            .respond(&json!({"hello": name}), PublishOptions::default())
            .await;
        Ok(())
    });
    server
        .subs(
            SubscriptionDescriptor::new("greet")
                .with_options(SubscriptionOptions::queue("greeters"))
                .with_handler(echo),
        )
        .await;

    #[derive(Deserialize)]
    struct Greeting {
        hello: String,
    }
    let reply: Option<Greeting> = client
        .request("greet", "ada", RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(reply.unwrap().hello, "ada");

    let mismatched: Option<Vec<u8>> = client
        .request("greet", "ada", RequestOptions::default())
        .await
        .unwrap();
    assert!(mismatched.is_none());

    let nobody: Option<serde_json::Value> = client
        .request(
            "nobody.home",
            "?",
            RequestOptions::timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap();
    assert!(nobody.is_none());
}

#[tokio::test]
async fn respond_without_reply_to_is_false() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    svc.init().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let answer = handler(move |envelope: MessageEnvelope| {
        let tx = tx.clone();
        async move {
            tx.send(envelope.respond("ignored", PublishOptions::default()).await)
                .ok();
            Ok(())
        }
    });
    svc.subs(SubscriptionDescriptor::new("fire").with_handler(answer))
        .await;
    svc.publish("fire", "and forget", PublishOptions::default())
        .await
        .unwrap();
    let outcome = tokio::time::timeout(support::WAIT, rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome, Some(false));
}

#[tokio::test]
async fn publish_retries_until_the_budget_is_spent() {
    let broker = InMemoryBroker::new();
    broker.reject_publishes(true);
    let svc = service(&broker, "svc1")
        .with_publish_policy(RetryPolicy::bounded(3, Duration::from_millis(1)));
    svc.init().await;
    assert!(!svc.publish("a", "x", PublishOptions::default()).await.unwrap());

    let svc = svc.with_publish_policy(RetryPolicy::bounded(200, Duration::from_millis(2)));
    let toggler = broker.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        toggler.reject_publishes(false);
    });
    assert!(svc.publish("a", "x", PublishOptions::default()).await.unwrap());
    assert_eq!(broker.published_to("a").len(), 1);
}

#[tokio::test]
async fn shutdown_drains_everything() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    let (handler, _rx) = collector();
    svc.subs(SubscriptionDescriptor::new("a").with_handler(handler))
        .await;
    svc.init().await;
    let handle = svc.get_sub("a").await.unwrap();

    svc.shutdown().await;
    assert_eq!(svc.state(), ConnectionState::Closed);
    assert!(handle.is_closed());
    assert!(svc.connection().is_none());
    assert!(!svc.init().await);
    assert!(!svc.subs(SubscriptionDescriptor::new("b")).await);
    assert!(!svc.publish("a", "late", PublishOptions::default()).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registrations_racing_shutdown_are_never_queued() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    assert!(svc.init().await);

    let mut tasks = Vec::new();
    for worker in 0..8 {
        let svc = svc.clone();
        tasks.push(tokio::spawn(async move {
            for round in 0..50 {
                svc.subs(SubscriptionDescriptor::new(format!("race.{worker}.{round}")))
                    .await;
                tokio::task::yield_now().await;
            }
        }));
    }
    tokio::task::yield_now().await;
    svc.shutdown().await;
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(svc.state(), ConnectionState::Closed);
    assert_eq!(svc.pending_subscriptions(), 0);
    assert!(!svc.subs(SubscriptionDescriptor::new("race.late")).await);
}

#[tokio::test]
async fn spawn_init_connects_in_background() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    assert!(svc.spawn_init().await.unwrap());
    assert_eq!(svc.state(), ConnectionState::Connected);
    assert_eq!(svc.server_name(), "svc1");
}

#[tokio::test]
async fn header_add_params_stamps_server_name() {
    let broker = InMemoryBroker::new();
    let svc = service(&broker, "svc1");
    let headers = svc.header_add_params([("k1", "v1")], Some(100), Some("ok"));
    assert_eq!(headers.get("serverName"), Some("svc1"));
    assert_eq!(headers.get("k1"), Some("v1"));
    assert_eq!(headers.code(), Some(100));
    assert_eq!(headers.description(), Some("ok"));

    let plain = svc.headers(None, None);
    assert_eq!(plain.len(), 1);
    assert_eq!(plain.code(), None);
}

#[tokio::test]
async fn metrics_follow_pattern_outcomes() {
    let registry = prometheus::Registry::new();
    let metrics = Arc::new(MessagingMetricsExporter::register(&registry).unwrap());
    let broker = InMemoryBroker::new();
    let svc = NatsService::with_metrics(
        Arc::new(broker.clone()),
        &ServiceConfig::named("svc1"),
        metrics,
    );
    svc.init().await;
    svc.publish("a", "x", PublishOptions::default()).await.unwrap();
    let _: Option<String> = svc
        .request("nobody", "?", RequestOptions::default())
        .await
        .unwrap();

    let value = |name: &str| {
        registry
            .gather()
            .iter()
            .find(|family| family.get_name() == name)
            .map(|family| family.get_metric()[0].get_counter().get_value())
            .unwrap_or_default()
    };
    assert_eq!(value("narxr_messages_published_total"), 1.0);
    assert_eq!(value("narxr_request_failures_total"), 1.0);
}
