//! S1 — volatile subscribe, one live event, caller-initiated close.

#[path = "support.rs"]
mod support;

use bytes::Bytes;
use logwire::packet::{MessageType, Packet};
use logwire::types::{ContentKind, EventRecord, ResolvedEvent, StreamId};
use logwire::{DropReason, InboundMessage, SubscriptionEvent};
use uuid::Uuid;

fn sample_event(stream: &str, number: u64) -> ResolvedEvent {
    ResolvedEvent {
        inner: EventRecord {
            stream_id: StreamId::new(stream),
            event_number: number,
            position: Some(logwire::Position::new(number, number)),
            event_id: Uuid::new_v4(),
            event_type: "Appended".into(),
            data: b"{}".to_vec(),
            metadata: vec![],
            data_content: ContentKind::Json,
            metadata_content: ContentKind::Json,
            created_at: chrono::Utc::now(),
        },
        link: None,
    }
}

#[tokio::test]
async fn volatile_subscribe_live_event_then_unsubscribe() {
    let (listener, host, port) = support::bind_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");

        let subscribe = support::read_packet(&mut socket).await;
        assert_eq!(subscribe.message_type, MessageType::SubscribeToStream);

        let confirmed = serde_json::to_vec(&InboundMessage::SubscriptionConfirmed {
            last_commit_position: 0,
            last_event_number: None,
        })
        .unwrap();
        support::write_packet(
            &mut socket,
            &Packet::new(MessageType::SubscriptionConfirmed, subscribe.correlation_id, Bytes::from(confirmed)),
        )
        .await;

        let appeared = serde_json::to_vec(&InboundMessage::StreamEventAppeared { event: sample_event("s", 0) }).unwrap();
        support::write_packet(
            &mut socket,
            &Packet::new(MessageType::StreamEventAppeared, subscribe.correlation_id, Bytes::from(appeared)),
        )
        .await;

        let unsubscribe = support::read_packet(&mut socket).await;
        assert_eq!(unsubscribe.message_type, MessageType::Unsubscribe);
        assert_eq!(unsubscribe.correlation_id, subscribe.correlation_id);
    });

    let client = support::connect_client(&host, port).await;
    let mut subscription = client.subscribe_to_stream("s", None, None);

    assert!(matches!(subscription.next().await, Some(SubscriptionEvent::LiveProcessingStarted)));

    match subscription.next().await {
        Some(SubscriptionEvent::EventAppeared(event)) => assert_eq!(event.inner.event_number, 0),
        other => panic!("expected EventAppeared, got {other:?}"),
    }

    subscription.close().await;
    assert!(matches!(subscription.next().await, Some(SubscriptionEvent::Dropped(DropReason::Unsubscribed))));

    server.await.expect("server task");
    client.shutdown().await;
}
