use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use datagen_bus::{BusError, Dispatcher, InMemoryDispatcher, OutgoingMessage};

fn message(id: &str, body: &Bytes) -> OutgoingMessage {
    let mut headers = BTreeMap::new();
    headers.insert("NServiceBus.MessageId".to_string(), id.to_string());
    OutgoingMessage {
        message_id: id.to_string(),
        destination: "error".into(),
        headers,
        body: body.clone(),
    }
}

#[tokio::test]
async fn records_messages_and_shares_body() {
    let body = Bytes::from(vec![b'a'; 1024]);
    let bus = InMemoryDispatcher::default();
    bus.dispatch(message("m1", &body)).await.unwrap();
    bus.dispatch(message("m2", &body)).await.unwrap();

    let published = bus.take_published().await;
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].headers["NServiceBus.MessageId"], "m1");
    assert_eq!(published[1].destination, "error");
    assert_eq!(published[0].body.as_ptr(), body.as_ptr());
    assert_eq!(published[1].body.as_ptr(), body.as_ptr());
    assert!(bus.take_published().await.is_empty());
}

#[tokio::test]
async fn injects_failures_on_cadence() {
    let body = Bytes::from_static(b"x");
    let bus = InMemoryDispatcher::default().failing_every(3);
    let mut failures = 0;
    for i in 0..9 {
        match bus.dispatch(message(&format!("m{i}"), &body)).await {
            Ok(()) => {}
            Err(BusError::Rejected { message_id, .. }) => {
                failures += 1;
                assert!(message_id == "m2" || message_id == "m5" || message_id == "m8");
            }
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(failures, 3);
    assert_eq!(bus.attempts(), 9);
    assert_eq!(bus.published_len().await, 6);
    assert_eq!(bus.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn tracks_concurrent_dispatches() {
    let body = Bytes::from_static(b"x");
    let bus = InMemoryDispatcher::default().with_latency(Duration::from_millis(10));
    let mut handles = Vec::new();
    for i in 0..4 {
        let bus = bus.clone();
        let msg = message(&format!("m{i}"), &body);
        handles.push(tokio::spawn(async move { bus.dispatch(msg).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
    assert_eq!(bus.max_in_flight(), 4);
    assert_eq!(bus.in_flight(), 0);
}
