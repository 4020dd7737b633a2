//! S2 — catch-up subscription from the beginning of a stream with two
//! preloaded events, followed by a live push once caught up.

#[path = "support.rs"]
mod support;

use bytes::Bytes;
use logwire::codec::ReadResult;
use logwire::packet::{MessageType, Packet};
use logwire::types::{ContentKind, EventRecord, ResolvedEvent, StreamId};
use logwire::{DropReason, InboundMessage, SubscriptionEvent};
use uuid::Uuid;

fn sample_event(number: u64) -> ResolvedEvent {
    ResolvedEvent {
        inner: EventRecord {
            stream_id: StreamId::new("s"),
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
async fn catch_up_from_zero_then_live_event() {
    let (listener, host, port) = support::bind_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");

        let historical_read = support::read_packet(&mut socket).await;
        assert_eq!(historical_read.message_type, MessageType::ReadStreamEventsForward);
        let body = serde_json::to_vec(&InboundMessage::ReadStreamEventsForwardCompleted {
            result: ReadResult::Success,
            events: vec![sample_event(0), sample_event(1)],
            next_event_number: 2,
            is_end_of_stream: true,
        })
        .unwrap();
        support::write_packet(
            &mut socket,
            &Packet::new(MessageType::ReadStreamEventsForwardCompleted, historical_read.correlation_id, Bytes::from(body)),
        )
        .await;

        let subscribe = support::read_packet(&mut socket).await;
        assert_eq!(subscribe.message_type, MessageType::SubscribeToStream);
        let confirmed = serde_json::to_vec(&InboundMessage::SubscriptionConfirmed {
            last_commit_position: 1,
            last_event_number: Some(1),
        })
        .unwrap();
        support::write_packet(
            &mut socket,
            &Packet::new(MessageType::SubscriptionConfirmed, subscribe.correlation_id, Bytes::from(confirmed)),
        )
        .await;

        let drain_read = support::read_packet(&mut socket).await;
        assert_eq!(drain_read.message_type, MessageType::ReadStreamEventsForward);
        let empty_body = serde_json::to_vec(&InboundMessage::ReadStreamEventsForwardCompleted {
            result: ReadResult::Success,
            events: vec![],
            next_event_number: 2,
            is_end_of_stream: true,
        })
        .unwrap();
        support::write_packet(
            &mut socket,
            &Packet::new(MessageType::ReadStreamEventsForwardCompleted, drain_read.correlation_id, Bytes::from(empty_body)),
        )
        .await;

        let appeared = serde_json::to_vec(&InboundMessage::StreamEventAppeared { event: sample_event(2) }).unwrap();
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
    let mut subscription = client.subscribe_to_stream_from("s", None, None, None);

    match subscription.next().await {
        Some(SubscriptionEvent::EventAppeared(event)) => assert_eq!(event.inner.event_number, 0),
        other => panic!("expected e0, got {other:?}"),
    }
    match subscription.next().await {
        Some(SubscriptionEvent::EventAppeared(event)) => assert_eq!(event.inner.event_number, 1),
        other => panic!("expected e1, got {other:?}"),
    }
    assert!(matches!(subscription.next().await, Some(SubscriptionEvent::LiveProcessingStarted)));
    match subscription.next().await {
        Some(SubscriptionEvent::EventAppeared(event)) => assert_eq!(event.inner.event_number, 2),
        other => panic!("expected e2, got {other:?}"),
    }

    subscription.close().await;
    assert!(matches!(subscription.next().await, Some(SubscriptionEvent::Dropped(DropReason::Unsubscribed))));

    server.await.expect("server task");
    client.shutdown().await;
}
