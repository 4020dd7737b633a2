//! The operation dispatcher: correlation-id-based matching of responses
//! to outstanding requests, request retry, and per-request timeout.
//!
//! Structurally this mirrors `hooteproto::client::reactor_task`'s
//! `pending: HashMap<Uuid, PendingRequest>` plus its periodic
//! cleanup-interval expiry, generalized to carry retries, credentials,
//! and the distinction between a single-response operation and a
//! long-lived streaming one (a subscription).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::{InboundMessage, NotHandledReason, OutboundMessage, PayloadCodec, ReadResult, WriteResult};
use crate::connection::{ConnectionEvent, ConnectionHandle};
use crate::error::ClientError;
use crate::packet::{MessageType, Packet};
use crate::types::Credentials;

/// Where responses for an operation are delivered: a single terminal
/// value for ordinary requests, or a stream of pushes for the lifetime
/// of a subscription.
pub(crate) enum ResponseHandler {
    Oneshot(oneshot::Sender<Result<InboundMessage, ClientError>>),
    Stream(mpsc::Sender<Result<InboundMessage, ClientError>>),
}

struct OperationRecord {
    message: OutboundMessage,
    credentials: Option<Credentials>,
    timeout: Duration,
    deadline: Instant,
    retries_left: u32,
    handler: ResponseHandler,
}

enum DispatcherCommand {
    Submit {
        message: OutboundMessage,
        credentials: Option<Credentials>,
        timeout: Duration,
        max_retries: u32,
        handler: ResponseHandler,
        assigned_tx: oneshot::Sender<Uuid>,
    },
    Cancel(Uuid),
    SendRaw {
        correlation_id: Uuid,
        message: OutboundMessage,
        credentials: Option<Credentials>,
    },
    Shutdown,
}

/// Handle used by the public facade and the subscription engine to
/// submit requests through the dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    cmd_tx: mpsc::Sender<DispatcherCommand>,
}

impl Dispatcher {
    /// Submit a request expecting a single terminal response.
    pub async fn submit(
        &self,
        message: OutboundMessage,
        credentials: Option<Credentials>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<(Uuid, oneshot::Receiver<Result<InboundMessage, ClientError>>), ClientError> {
        let (response_tx, response_rx) = oneshot::channel();
        let id = self
            .submit_with_handler(message, credentials, timeout, max_retries, ResponseHandler::Oneshot(response_tx))
            .await?;
        Ok((id, response_rx))
    }

    /// Submit a request whose correlation id will carry a stream of
    /// pushes for as long as the subscription lives (used by the
    /// subscription engine for `SubscribeToStream`).
    pub async fn submit_streaming(
        &self,
        message: OutboundMessage,
        credentials: Option<Credentials>,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<(Uuid, mpsc::Receiver<Result<InboundMessage, ClientError>>), ClientError> {
        let (response_tx, response_rx) = mpsc::channel(256);
        let id = self
            .submit_with_handler(message, credentials, timeout, max_retries, ResponseHandler::Stream(response_tx))
            .await?;
        Ok((id, response_rx))
    }

    async fn submit_with_handler(
        &self,
        message: OutboundMessage,
        credentials: Option<Credentials>,
        timeout: Duration,
        max_retries: u32,
        handler: ResponseHandler,
    ) -> Result<Uuid, ClientError> {
        let (assigned_tx, assigned_rx) = oneshot::channel();
        self.cmd_tx
            .send(DispatcherCommand::Submit { message, credentials, timeout, max_retries, handler, assigned_tx })
            .await
            .map_err(|_| ClientError::ConnectionLost)?;
        assigned_rx.await.map_err(|_| ClientError::ConnectionLost)
    }

    /// Drop an operation's record without waiting for a response —
    /// used when a subscription is closed by its caller.
    pub async fn cancel(&self, correlation_id: Uuid) {
        let _ = self.cmd_tx.send(DispatcherCommand::Cancel(correlation_id)).await;
    }

    /// Send a message tagged with a caller-chosen correlation id,
    /// best-effort, without installing an operation record. Used for
    /// `Unsubscribe`, which must carry the subscription's own
    /// correlation id rather than a freshly allocated one.
    pub async fn send_raw(&self, correlation_id: Uuid, message: OutboundMessage, credentials: Option<Credentials>) {
        let _ = self.cmd_tx.send(DispatcherCommand::SendRaw { correlation_id, message, credentials }).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(DispatcherCommand::Shutdown).await;
    }
}

/// How long between sweeps of the operation table for expired deadlines.
const CLEANUP_INTERVAL: Duration = Duration::from_millis(250);

pub fn spawn(
    connection: ConnectionHandle,
    inbound_rx: mpsc::Receiver<Packet>,
    codec: Arc<dyn PayloadCodec>,
    default_credentials: Option<Credentials>,
) -> Dispatcher {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    tokio::spawn(run(connection, inbound_rx, cmd_rx, codec, default_credentials));
    Dispatcher { cmd_tx }
}

async fn run(
    connection: ConnectionHandle,
    mut inbound_rx: mpsc::Receiver<Packet>,
    mut cmd_rx: mpsc::Receiver<DispatcherCommand>,
    codec: Arc<dyn PayloadCodec>,
    default_credentials: Option<Credentials>,
) {
    let mut operations: HashMap<Uuid, OperationRecord> = HashMap::new();
    let mut events_rx = connection.subscribe_events();
    let mut cleanup_interval = tokio::time::interval(CLEANUP_INTERVAL);
    cleanup_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(DispatcherCommand::Submit { message, credentials, timeout, max_retries, handler, assigned_tx }) => {
                        let correlation_id = Uuid::new_v4();
                        let _ = assigned_tx.send(correlation_id);
                        let credentials = credentials.or_else(|| default_credentials.clone());

                        match send_operation(&connection, &codec, correlation_id, &message, &credentials).await {
                            Ok(()) => {
                                operations.insert(correlation_id, OperationRecord {
                                    message,
                                    credentials,
                                    timeout,
                                    deadline: Instant::now() + timeout,
                                    retries_left: max_retries,
                                    handler,
                                });
                            }
                            Err(e) => complete(handler, Err(e)),
                        }
                    }
                    Some(DispatcherCommand::Cancel(id)) => {
                        operations.remove(&id);
                    }
                    Some(DispatcherCommand::SendRaw { correlation_id, message, credentials }) => {
                        let credentials = credentials.or_else(|| default_credentials.clone());
                        let _ = send_operation(&connection, &codec, correlation_id, &message, &credentials).await;
                    }
                    Some(DispatcherCommand::Shutdown) | None => {
                        for (_, record) in operations.drain() {
                            complete(record.handler, Err(ClientError::ConnectionLost));
                        }
                        break;
                    }
                }
            }

            packet = inbound_rx.recv() => {
                match packet {
                    Some(packet) => handle_inbound(&mut operations, &connection, &codec, packet).await,
                    None => break,
                }
            }

            event = events_rx.recv() => {
                match event {
                    Ok(ConnectionEvent::Terminated) => {
                        for (_, record) in operations.drain() {
                            complete(record.handler, Err(ClientError::ConnectionLost));
                        }
                        break;
                    }
                    Ok(ConnectionEvent::StashOverflow(id)) => {
                        if let Some(record) = operations.remove(&id) {
                            complete(record.handler, Err(ClientError::ConnectionLost));
                        }
                    }
                    Ok(ConnectionEvent::Connected) => {
                        // Packets sent on the previous socket never got a
                        // response; re-send them now that a fresh socket
                        // is up, without touching retries-left.
                        for (id, record) in operations.iter() {
                            let _ = send_operation(&connection, &codec, *id, &record.message, &record.credentials).await;
                        }
                    }
                    Ok(ConnectionEvent::Reconnecting) | Err(_) => {}
                }
            }

            _ = cleanup_interval.tick() => {
                let now = Instant::now();
                let expired: Vec<Uuid> = operations
                    .iter()
                    .filter(|(_, record)| now > record.deadline)
                    .map(|(id, _)| *id)
                    .collect();
                for id in expired {
                    if let Some(record) = operations.remove(&id) {
                        debug!(correlation_id = %id, "dispatcher: operation timed out");
                        complete(record.handler, Err(ClientError::OperationTimedOut));
                    }
                }
            }
        }
    }

    debug!("dispatcher: exiting");
}

async fn send_operation(
    connection: &ConnectionHandle,
    codec: &Arc<dyn PayloadCodec>,
    correlation_id: Uuid,
    message: &OutboundMessage,
    credentials: &Option<Credentials>,
) -> Result<(), ClientError> {
    let payload = codec.encode(message)?;
    let packet = Packet::new(message.message_type(), correlation_id, payload).with_credentials(credentials.clone());
    connection.send(packet).await
}

fn complete(handler: ResponseHandler, result: Result<InboundMessage, ClientError>) {
    match handler {
        ResponseHandler::Oneshot(tx) => {
            let _ = tx.send(result);
        }
        ResponseHandler::Stream(tx) => {
            tokio::spawn(async move {
                let _ = tx.send(result).await;
            });
        }
    }
}

async fn handle_inbound(
    operations: &mut HashMap<Uuid, OperationRecord>,
    connection: &ConnectionHandle,
    codec: &Arc<dyn PayloadCodec>,
    packet: Packet,
) {
    let correlation_id = packet.correlation_id;
    let Some(mut record) = operations.remove(&correlation_id) else {
        debug!(%correlation_id, "dispatcher: discarding response for unknown or already-completed operation");
        return;
    };

    match codec.decode(packet.message_type, &packet.payload) {
        Err(e) => complete(record.handler, Err(e)),
        Ok(message) => match classify(message) {
            Outcome::Retry => {
                if record.retries_left == 0 {
                    warn!(%correlation_id, "dispatcher: retries exhausted");
                    complete(record.handler, Err(ClientError::RetriesExhausted));
                } else {
                    record.retries_left -= 1;
                    record.deadline = Instant::now() + record.timeout;
                    let _ = send_operation(connection, codec, correlation_id, &record.message, &record.credentials).await;
                    operations.insert(correlation_id, record);
                }
            }
            Outcome::RetryReconnect => {
                if record.retries_left == 0 {
                    warn!(%correlation_id, "dispatcher: retries exhausted");
                    complete(record.handler, Err(ClientError::RetriesExhausted));
                } else {
                    record.retries_left -= 1;
                    record.deadline = Instant::now() + record.timeout;
                    operations.insert(correlation_id, record);
                    // The endpoint is no longer master; force a fresh
                    // connect so it gets re-resolved. The resend happens
                    // once `ConnectionEvent::Connected` fires, alongside
                    // every other still-installed operation.
                    connection.force_reconnect().await;
                }
            }
            Outcome::Continue(message) => {
                if let ResponseHandler::Stream(tx) = &record.handler {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        let _ = tx.send(Ok(message)).await;
                    });
                }
                operations.insert(correlation_id, record);
            }
            Outcome::Terminal(result) => complete(record.handler, result),
        },
    }
}

/// What the dispatcher should do in response to a decoded inbound
/// message, independent of which kind of handler owns the operation.
enum Outcome {
    /// One of the three timeout-flavored retryable write outcomes (spec
    /// §4.D) — retried on the same connection.
    Retry,
    /// `NotHandled(NotMaster)` (spec §4.D) — retried after forcing the
    /// connection manager to re-resolve the endpoint, since retrying on
    /// the same socket would just hit the same non-master node again.
    RetryReconnect,
    /// A push that belongs to a long-lived streaming operation — the
    /// operation stays installed.
    Continue(InboundMessage),
    /// The operation is finished, successfully or not.
    Terminal(Result<InboundMessage, ClientError>),
}

fn classify(message: InboundMessage) -> Outcome {
    match message {
        InboundMessage::NotAuthenticated => Outcome::Terminal(Err(ClientError::AccessDenied)),
        InboundMessage::BadRequest => Outcome::Terminal(Err(ClientError::BadRequest)),

        InboundMessage::NotHandled { reason: NotHandledReason::NotMaster } => Outcome::RetryReconnect,
        InboundMessage::NotHandled { .. } => {
            Outcome::Terminal(Err(ClientError::UnexpectedResponse(MessageType::NotHandled)))
        }

        InboundMessage::WriteEventsCompleted { result } => match result {
            WriteResult::PrepareTimeout | WriteResult::CommitTimeout | WriteResult::ForwardTimeout => Outcome::Retry,
            WriteResult::WrongExpectedVersion { given, actual } => {
                Outcome::Terminal(Err(ClientError::WrongExpectedVersion { given, actual }))
            }
            WriteResult::StreamDeleted => Outcome::Terminal(Err(ClientError::StreamDeleted)),
            WriteResult::AccessDenied => Outcome::Terminal(Err(ClientError::AccessDenied)),
            result @ WriteResult::Success { .. } => Outcome::Terminal(Ok(InboundMessage::WriteEventsCompleted { result })),
        },

        InboundMessage::ReadEventCompleted { result, event } => match result {
            ReadResult::NotFound => Outcome::Terminal(Err(ClientError::EventNotFound)),
            ReadResult::NoStream => Outcome::Terminal(Err(ClientError::StreamNotFound)),
            ReadResult::StreamDeleted => Outcome::Terminal(Err(ClientError::StreamDeleted)),
            ReadResult::AccessDenied => Outcome::Terminal(Err(ClientError::AccessDenied)),
            ReadResult::Error => Outcome::Terminal(Err(ClientError::BadRequest)),
            ReadResult::Success => {
                Outcome::Terminal(Ok(InboundMessage::ReadEventCompleted { result: ReadResult::Success, event }))
            }
        },

        InboundMessage::ReadStreamEventsForwardCompleted { result, events, next_event_number, is_end_of_stream } => {
            match result {
                ReadResult::NoStream => Outcome::Terminal(Err(ClientError::StreamNotFound)),
                ReadResult::StreamDeleted => Outcome::Terminal(Err(ClientError::StreamDeleted)),
                ReadResult::AccessDenied => Outcome::Terminal(Err(ClientError::AccessDenied)),
                ReadResult::Error => Outcome::Terminal(Err(ClientError::BadRequest)),
                ReadResult::NotFound | ReadResult::Success => {
                    Outcome::Terminal(Ok(InboundMessage::ReadStreamEventsForwardCompleted {
                        result: ReadResult::Success,
                        events,
                        next_event_number,
                        is_end_of_stream,
                    }))
                }
            }
        }

        InboundMessage::ReadAllEventsForwardCompleted { events, next_position, is_end_of_stream } => {
            Outcome::Terminal(Ok(InboundMessage::ReadAllEventsForwardCompleted { events, next_position, is_end_of_stream }))
        }

        InboundMessage::SubscriptionConfirmed { last_commit_position, last_event_number } => {
            Outcome::Continue(InboundMessage::SubscriptionConfirmed { last_commit_position, last_event_number })
        }
        InboundMessage::StreamEventAppeared { event } => Outcome::Continue(InboundMessage::StreamEventAppeared { event }),
        InboundMessage::SubscriptionDropped { reason } => Outcome::Terminal(Err(ClientError::SubscriptionDropped(reason))),

        InboundMessage::HeartbeatRequest => Outcome::Terminal(Err(ClientError::UnexpectedResponse(MessageType::HeartbeatRequest))),
        InboundMessage::HeartbeatResponse => Outcome::Terminal(Err(ClientError::UnexpectedResponse(MessageType::HeartbeatResponse))),
        InboundMessage::Ping => Outcome::Terminal(Err(ClientError::UnexpectedResponse(MessageType::Ping))),
        InboundMessage::Pong => Outcome::Terminal(Err(ClientError::UnexpectedResponse(MessageType::Pong))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_timeout_is_retryable() {
        let outcome = classify(InboundMessage::WriteEventsCompleted { result: WriteResult::PrepareTimeout });
        assert!(matches!(outcome, Outcome::Retry));
    }

    #[test]
    fn not_master_is_retryable_other_reasons_are_not() {
        assert!(matches!(
            classify(InboundMessage::NotHandled { reason: NotHandledReason::NotMaster }),
            Outcome::RetryReconnect
        ));
        assert!(matches!(
            classify(InboundMessage::NotHandled { reason: NotHandledReason::TooBusy }),
            Outcome::Terminal(Err(ClientError::UnexpectedResponse(MessageType::NotHandled)))
        ));
    }

    #[test]
    fn wrong_expected_version_is_terminal() {
        let outcome = classify(InboundMessage::WriteEventsCompleted {
            result: WriteResult::WrongExpectedVersion { given: 2, actual: Some(3) },
        });
        assert!(matches!(
            outcome,
            Outcome::Terminal(Err(ClientError::WrongExpectedVersion { given: 2, actual: Some(3) }))
        ));
    }

    #[test]
    fn stream_event_appeared_keeps_subscription_installed() {
        let event = crate::types::ResolvedEvent {
            inner: crate::types::EventRecord {
                stream_id: crate::types::StreamId::new("s"),
                event_number: 0,
                position: None,
                event_id: Uuid::new_v4(),
                event_type: "t".into(),
                data: vec![],
                metadata: vec![],
                data_content: crate::types::ContentKind::Binary,
                metadata_content: crate::types::ContentKind::Binary,
                created_at: chrono::Utc::now(),
            },
            link: None,
        };
        let outcome = classify(InboundMessage::StreamEventAppeared { event });
        assert!(matches!(outcome, Outcome::Continue(_)));
    }
}
