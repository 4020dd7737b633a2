//! S4 — a peer that stops responding triggers a heartbeat timeout,
//! the connection manager reconnects, and the in-flight read is
//! retried against the fresh socket with its original correlation id.

#[path = "support.rs"]
mod support;

use std::time::Duration;

use bytes::Bytes;
use logwire::codec::ReadResult;
use logwire::packet::{MessageType, Packet};
use logwire::types::{ContentKind, EventNumber, EventRecord, ResolvedEvent, StreamId};
use logwire::{ClientSettings, InboundMessage};
use uuid::Uuid;

fn sample_event() -> ResolvedEvent {
    ResolvedEvent {
        inner: EventRecord {
            stream_id: StreamId::new("s"),
            event_number: 0,
            position: Some(logwire::Position::new(0, 0)),
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
async fn heartbeat_timeout_reconnects_and_retries_in_flight_read() {
    let (listener, host, port) = support::bind_listener().await;

    let server = tokio::spawn(async move {
        let (mut first, _) = listener.accept().await.expect("first accept");
        let first_request = support::read_packet(&mut first).await;
        assert_eq!(first_request.message_type, MessageType::ReadEvent);

        // Never reply on this socket and never touch it again — the
        // client's own heartbeat timer (interval 30ms, timeout 80ms)
        // must close it well before this sleep elapses.
        tokio::time::sleep(Duration::from_millis(300)).await;
        drop(first);

        let (mut second, _) = listener.accept().await.expect("second accept");
        let retried_request = support::read_packet(&mut second).await;
        assert_eq!(retried_request.message_type, MessageType::ReadEvent);
        assert_eq!(retried_request.correlation_id, first_request.correlation_id);

        let body = serde_json::to_vec(&InboundMessage::ReadEventCompleted {
            result: ReadResult::Success,
            event: Some(sample_event()),
        })
        .unwrap();
        support::write_packet(
            &mut second,
            &Packet::new(MessageType::ReadEventCompleted, retried_request.correlation_id, Bytes::from(body)),
        )
        .await;
    });

    let settings = ClientSettings::new(host, port)
        .with_heartbeat(Duration::from_millis(30), Duration::from_millis(80))
        .with_reconnection_delay(Duration::from_millis(10), Duration::from_millis(50))
        .with_operation_policy(10, Duration::from_secs(5));
    let client = support::connect_client_with(settings).await;

    let event = client
        .read_event("s", EventNumber::Exact(0), None, None)
        .await
        .expect("read should succeed after reconnect");
    assert!(event.is_some());

    server.await.expect("server task");
    client.shutdown().await;
}
