//! Resuming a catch-up subscription from a non-zero `from_exclusive`
//! must not re-deliver the boundary event itself (spec §4.E: "emit each
//! returned event with number > from-exclusive").

#[path = "support.rs"]
mod support;

use bytes::Bytes;
use logwire::codec::ReadResult;
use logwire::packet::{MessageType, Packet};
use logwire::types::{ContentKind, EventNumber, EventRecord, ResolvedEvent, StreamId};
use logwire::{InboundMessage, SubscriptionEvent};
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
async fn resuming_past_event_one_does_not_redeliver_it() {
    let (listener, host, port) = support::bind_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");

        // The server's read is inclusive of from_event_number, same as
        // any other forward read; the client is responsible for
        // filtering the boundary event out.
        let historical_read = support::read_packet(&mut socket).await;
        assert_eq!(historical_read.message_type, MessageType::ReadStreamEventsForward);
        let body = serde_json::to_vec(&InboundMessage::ReadStreamEventsForwardCompleted {
            result: ReadResult::Success,
            events: vec![sample_event(1), sample_event(2)],
            next_event_number: 3,
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
            last_commit_position: 2,
            last_event_number: Some(2),
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
            next_event_number: 3,
            is_end_of_stream: true,
        })
        .unwrap();
        support::write_packet(
            &mut socket,
            &Packet::new(MessageType::ReadStreamEventsForwardCompleted, drain_read.correlation_id, Bytes::from(empty_body)),
        )
        .await;

        let unsubscribe = support::read_packet(&mut socket).await;
        assert_eq!(unsubscribe.message_type, MessageType::Unsubscribe);
    });

    let client = support::connect_client(&host, port).await;
    let mut subscription = client.subscribe_to_stream_from("s", Some(EventNumber::Exact(1)), None, None);

    // Event 1 is the boundary the caller already observed — it must not
    // reappear. Event 2 is new and must be the very first thing emitted.
    match subscription.next().await {
        Some(SubscriptionEvent::EventAppeared(event)) => assert_eq!(event.inner.event_number, 2),
        other => panic!("expected e2, got {other:?}"),
    }
    assert!(matches!(subscription.next().await, Some(SubscriptionEvent::LiveProcessingStarted)));

    subscription.close().await;

    server.await.expect("server task");
    client.shutdown().await;
}
