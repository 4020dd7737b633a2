//! S3 — optimistic concurrency: a write with a stale expected version
//! surfaces as `ClientError::WrongExpectedVersion` to the caller.

#[path = "support.rs"]
mod support;

use bytes::Bytes;
use logwire::packet::{MessageType, Packet};
use logwire::{ClientError, EventData, ExpectedVersion};

#[tokio::test]
async fn wrong_expected_version_surfaces_to_caller() {
    let (listener, host, port) = support::bind_listener().await;

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let request = support::read_packet(&mut socket).await;
        assert_eq!(request.message_type, MessageType::WriteEvents);

        let body = serde_json::to_vec(&logwire::InboundMessage::WriteEventsCompleted {
            result: logwire::codec::WriteResult::WrongExpectedVersion { given: 2, actual: Some(3) },
        })
        .unwrap();
        let response = Packet::new(MessageType::WriteEventsCompleted, request.correlation_id, Bytes::from(body));
        support::write_packet(&mut socket, &response).await;
    });

    let client = support::connect_client(&host, port).await;
    let result = client
        .append_to_stream("orders-1", ExpectedVersion::Exact(2), vec![EventData::new("OrderPlaced", b"{}".to_vec())], None)
        .await;

    match result {
        Err(ClientError::WrongExpectedVersion { given, actual }) => {
            assert_eq!(given, 2);
            assert_eq!(actual, Some(3));
        }
        other => panic!("expected WrongExpectedVersion, got {other:?}"),
    }

    server.await.expect("server task");
    client.shutdown().await;
}
