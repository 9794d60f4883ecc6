//! Tests for channel dispatch ordering, acknowledgements, and disconnect handling.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use picteus_protocol::{AckOutcome, ErrorKind, Notification, TransportError};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::mpsc,
};

use super::{memory_link_pair, ndjson_link, Acknowledger, TransportChannel};

fn connected_pair() -> (TransportChannel, TransportChannel) {
    let (host_link, extension_link) = memory_link_pair();
    let host = TransportChannel::new("host", host_link);
    let extension = TransportChannel::new("ext", extension_link);
    (host, extension)
}

async fn with_timeout<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("operation should finish in time")
}

#[tokio::test]
async fn functional_send_with_ack_returns_handler_value() {
    let (host, extension) = connected_pair();
    extension.on(
        "image.computeTags",
        |notification: Notification, ack: Option<Acknowledger>| async move {
            let ack = ack.expect("request should carry a context id");
            let id = notification.value["id"].as_str().unwrap_or_default().to_string();
            ack.resolve(json!({"tags": [format!("tag-{id}")]}))
                .expect("respond");
        },
    );
    host.start();
    extension.start();

    let outcome = with_timeout(host.send_with_ack("image.computeTags", json!({"id": "a"})))
        .await
        .expect("ack");
    assert_eq!(outcome, AckOutcome::Value(json!({"tags": ["tag-a"]})));
    assert_eq!(host.pending_requests(), 0);
}

#[tokio::test]
async fn integration_same_channel_notifications_are_handled_in_send_order() {
    let (host, extension) = connected_pair();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let (done_sender, mut done_receiver) = mpsc::unbounded_channel();
    let sink = Arc::clone(&observed);
    extension.on(
        "image.created",
        move |notification: Notification, _ack: Option<Acknowledger>| {
            let sink = Arc::clone(&sink);
            let done_sender = done_sender.clone();
            async move {
                let index = notification.value["index"].as_u64().unwrap_or_default();
                // Early notifications sleep longest so reordering would show up.
                tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(index))).await;
                sink.lock().expect("observed lock").push(index);
                let _ = done_sender.send(());
            }
        },
    );
    host.start();
    extension.start();

    for index in 0..20u64 {
        host.send("image.created", json!({"index": index}))
            .expect("send");
    }
    for _ in 0..20 {
        with_timeout(done_receiver.recv()).await.expect("done");
    }
    let observed = observed.lock().expect("observed lock").clone();
    assert_eq!(observed, (0..20u64).collect::<Vec<_>>());
}

#[tokio::test]
async fn integration_distinct_channels_are_handled_concurrently() {
    let (host, extension) = connected_pair();
    let (release_sender, release_receiver) = tokio::sync::oneshot::channel::<()>();
    let release_receiver = Arc::new(tokio::sync::Mutex::new(Some(release_receiver)));
    extension.on(
        "image.created",
        move |_notification: Notification, ack: Option<Acknowledger>| {
            let release_receiver = Arc::clone(&release_receiver);
            async move {
                if let Some(receiver) = release_receiver.lock().await.take() {
                    let _ = receiver.await;
                }
                if let Some(ack) = ack {
                    let _ = ack.resolve(json!("created"));
                }
            }
        },
    );
    extension.on(
        "image.updated",
        |_notification: Notification, ack: Option<Acknowledger>| async move {
            if let Some(ack) = ack {
                let _ = ack.resolve(json!("updated"));
            }
        },
    );
    host.start();
    extension.start();

    let blocked_host = host.clone();
    let blocked =
        tokio::spawn(async move { blocked_host.send_with_ack("image.created", json!({"id": "a"})).await });
    let updated = with_timeout(host.send_with_ack("image.updated", json!({"id": "b"})))
        .await
        .expect("updated ack");
    assert_eq!(updated, AckOutcome::Value(json!("updated")));

    release_sender.send(()).expect("release");
    let created = with_timeout(blocked).await.expect("join").expect("created ack");
    assert_eq!(created, AckOutcome::Value(json!("created")));
}

#[tokio::test]
async fn regression_handler_panic_is_isolated_and_acknowledged_with_error() {
    let (host, extension) = connected_pair();
    extension.on(
        "image.deleted",
        |_notification: Notification, _ack: Option<Acknowledger>| async move {
            panic!("handler blew up");
        },
    );
    extension.on(
        "image.updated",
        |_notification: Notification, ack: Option<Acknowledger>| async move {
            if let Some(ack) = ack {
                let _ = ack.resolve(Value::Bool(true));
            }
        },
    );
    host.start();
    extension.start();

    let failed = with_timeout(host.send_with_ack("image.deleted", json!({"id": "a"})))
        .await
        .expect("error ack");
    match failed {
        AckOutcome::Error(error) => assert_eq!(error.kind, ErrorKind::Handler),
        other => panic!("unexpected outcome {other:?}"),
    }
    let second = with_timeout(host.send_with_ack("image.deleted", json!({"id": "b"})))
        .await
        .expect("second error ack");
    assert!(second.is_error());

    let healthy = with_timeout(host.send_with_ack("image.updated", json!({"id": "c"})))
        .await
        .expect("healthy ack");
    assert_eq!(healthy, AckOutcome::Value(Value::Bool(true)));
    assert_eq!(extension.metrics().panicked, 2);
    assert!(extension.is_open());
}

#[tokio::test]
async fn unit_unhandled_channel_replies_with_error_ack() {
    let (host, extension) = connected_pair();
    host.start();
    extension.start();

    let outcome = with_timeout(host.send_with_ack("image.computeFeatures", json!({"id": "a"})))
        .await
        .expect("ack");
    match outcome {
        AckOutcome::Error(error) => {
            assert_eq!(error.kind, ErrorKind::Handler);
            assert!(error.message.contains("image.computeFeatures"));
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(extension.metrics().unhandled, 1);
}

#[tokio::test]
async fn functional_fallback_handler_receives_unknown_channels() {
    let (host, extension) = connected_pair();
    extension.on_fallback(
        |notification: Notification, ack: Option<Acknowledger>| async move {
            if let Some(ack) = ack {
                let _ = ack.resolve(json!(notification.channel));
            }
        },
    );
    host.start();
    extension.start();

    let outcome = with_timeout(host.send_with_ack("custom.event", json!({})))
        .await
        .expect("ack");
    assert_eq!(outcome, AckOutcome::Value(json!("custom.event")));
}

#[tokio::test]
async fn regression_peer_close_rejects_pending_requests() {
    let (host, extension) = connected_pair();
    extension.on(
        "extension.intent",
        |_notification: Notification, ack: Option<Acknowledger>| async move {
            // Hold the reply until the channel goes away.
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(ack);
        },
    );
    host.start();
    extension.start();

    let waiting_host = host.clone();
    let waiting =
        tokio::spawn(async move { waiting_host.send_with_ack("extension.intent", json!({})).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    extension.close();

    let result = with_timeout(waiting).await.expect("join");
    assert_eq!(result, Err(TransportError::ChannelClosed));
    with_timeout(host.closed()).await;
    assert!(!host.is_open());
    assert_eq!(
        host.send("image.created", json!({"id": "a"})),
        Err(TransportError::ChannelClosed)
    );
}

#[tokio::test]
async fn regression_send_with_ack_after_close_fails_fast() {
    let (host, _extension) = connected_pair();
    host.start();
    host.close();
    let result = host.send_with_ack("image.created", json!({})).await;
    assert_eq!(result, Err(TransportError::ChannelClosed));
}

#[tokio::test]
async fn integration_ndjson_link_exchanges_frames_and_rejects_malformed_ack() {
    let (host_stream, peer_stream) = tokio::io::duplex(4096);
    let (host_reader, host_writer) = tokio::io::split(host_stream);
    let (peer_reader, mut peer_writer) = tokio::io::split(peer_stream);
    let host = TransportChannel::new("host", ndjson_link("host", host_reader, host_writer));
    host.start();

    let requester = host.clone();
    let request =
        tokio::spawn(async move { requester.send_with_ack("image.created", json!({"id": "x"})).await });

    let mut peer_lines = BufReader::new(peer_reader).lines();
    let line = with_timeout(peer_lines.next_line())
        .await
        .expect("read")
        .expect("line");
    let frame: Value = serde_json::from_str(&line).expect("frame json");
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["channel"], "image.created");
    let context_id = frame["contextId"].as_str().expect("context id").to_string();

    let malformed = format!(
        "{{\"type\":\"ack\",\"contextId\":\"{context_id}\",\"outcome\":{{\"bogus\":true}}}}\n"
    );
    peer_writer
        .write_all(malformed.as_bytes())
        .await
        .expect("write malformed");

    let result = with_timeout(request).await.expect("join");
    assert!(matches!(result, Err(TransportError::MalformedFrame(_))));
    assert_eq!(host.metrics().malformed, 1);
}

#[tokio::test]
async fn regression_ndjson_end_of_stream_closes_channel() {
    let (host_stream, peer_stream) = tokio::io::duplex(1024);
    let (host_reader, host_writer) = tokio::io::split(host_stream);
    let host = TransportChannel::new("host", ndjson_link("host", host_reader, host_writer));
    host.start();
    drop(peer_stream);
    with_timeout(host.closed()).await;
    assert!(!host.is_open());
}
