//! The opaque payload codec contract: a bidirectional mapping between a
//! typed message and the bytes carried in a [`crate::packet::Packet`]
//! payload. The core does not prescribe a wire format for this — callers
//! supply an implementation of [`PayloadCodec`]. [`JsonPayloadCodec`] is a
//! reference implementation used by this crate's own tests.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, DropReason};
use crate::packet::MessageType;
use crate::types::{EventData, ExpectedVersion, Position, ResolvedEvent, StreamId};

/// A typed request message produced by the client facade and handed to
/// a [`PayloadCodec`] for encoding before it is wrapped in a packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OutboundMessage {
    WriteEvents {
        stream_id: StreamId,
        expected_version: ExpectedVersion,
        events: Vec<EventData>,
        require_master: bool,
    },
    ReadEvent {
        stream_id: StreamId,
        event_number: u64,
        resolve_link_tos: bool,
    },
    ReadStreamEventsForward {
        stream_id: StreamId,
        from_event_number: u64,
        max_count: u32,
        resolve_link_tos: bool,
    },
    ReadAllEventsForward {
        from_position: Position,
        max_count: u32,
        resolve_link_tos: bool,
    },
    SubscribeToStream {
        stream_id: StreamId,
        resolve_link_tos: bool,
    },
    Unsubscribe,
    HeartbeatRequest,
    HeartbeatResponse,
    Ping,
    Pong,
}

impl OutboundMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::WriteEvents { .. } => MessageType::WriteEvents,
            Self::ReadEvent { .. } => MessageType::ReadEvent,
            Self::ReadStreamEventsForward { .. } => MessageType::ReadStreamEventsForward,
            Self::ReadAllEventsForward { .. } => MessageType::ReadAllEventsForward,
            Self::SubscribeToStream { .. } => MessageType::SubscribeToStream,
            Self::Unsubscribe => MessageType::Unsubscribe,
            Self::HeartbeatRequest => MessageType::HeartbeatRequest,
            Self::HeartbeatResponse => MessageType::HeartbeatResponse,
            Self::Ping => MessageType::Ping,
            Self::Pong => MessageType::Pong,
        }
    }
}

/// Outcome of a write, as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WriteResult {
    Success { first_event_number: u64, last_event_number: u64 },
    PrepareTimeout,
    CommitTimeout,
    ForwardTimeout,
    WrongExpectedVersion { given: i64, actual: Option<i64> },
    StreamDeleted,
    AccessDenied,
}

/// Outcome of a single-event or paged read, as reported by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReadResult {
    Success,
    NotFound,
    NoStream,
    StreamDeleted,
    AccessDenied,
    Error,
}

/// Why the server declined to service a request on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotHandledReason {
    NotMaster,
    TooBusy,
    NotReady,
}

/// A typed response or push message decoded from a packet payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InboundMessage {
    WriteEventsCompleted {
        result: WriteResult,
    },
    ReadEventCompleted {
        result: ReadResult,
        event: Option<ResolvedEvent>,
    },
    ReadStreamEventsForwardCompleted {
        result: ReadResult,
        events: Vec<ResolvedEvent>,
        next_event_number: u64,
        is_end_of_stream: bool,
    },
    ReadAllEventsForwardCompleted {
        events: Vec<ResolvedEvent>,
        next_position: Position,
        is_end_of_stream: bool,
    },
    SubscriptionConfirmed {
        last_commit_position: u64,
        last_event_number: Option<u64>,
    },
    StreamEventAppeared {
        event: ResolvedEvent,
    },
    SubscriptionDropped {
        reason: DropReason,
    },
    HeartbeatRequest,
    HeartbeatResponse,
    Ping,
    Pong,
    NotAuthenticated,
    BadRequest,
    NotHandled {
        reason: NotHandledReason,
    },
}

impl InboundMessage {
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::WriteEventsCompleted { .. } => MessageType::WriteEventsCompleted,
            Self::ReadEventCompleted { .. } => MessageType::ReadEventCompleted,
            Self::ReadStreamEventsForwardCompleted { .. } => MessageType::ReadStreamEventsForwardCompleted,
            Self::ReadAllEventsForwardCompleted { .. } => MessageType::ReadAllEventsForwardCompleted,
            Self::SubscriptionConfirmed { .. } => MessageType::SubscriptionConfirmed,
            Self::StreamEventAppeared { .. } => MessageType::StreamEventAppeared,
            Self::SubscriptionDropped { .. } => MessageType::SubscriptionDropped,
            Self::HeartbeatRequest => MessageType::HeartbeatRequest,
            Self::HeartbeatResponse => MessageType::HeartbeatResponse,
            Self::Ping => MessageType::Ping,
            Self::Pong => MessageType::Pong,
            Self::NotAuthenticated => MessageType::NotAuthenticated,
            Self::BadRequest => MessageType::BadRequest,
            Self::NotHandled { .. } => MessageType::NotHandled,
        }
    }
}

/// Produces and consumes the opaque payload bytes carried by a packet.
/// The core only requires that encode/decode round-trip and that
/// `decode` is told the message type from the envelope so it can reject
/// a mismatched payload rather than guess.
pub trait PayloadCodec: Send + Sync + 'static {
    fn encode(&self, message: &OutboundMessage) -> Result<Bytes, ClientError>;
    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<InboundMessage, ClientError>;
}

/// A JSON-backed [`PayloadCodec`]. Not the prescribed wire format — a
/// reference implementation usable for tests and as a starting point for
/// callers who want one.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPayloadCodec;

impl PayloadCodec for JsonPayloadCodec {
    fn encode(&self, message: &OutboundMessage) -> Result<Bytes, ClientError> {
        let bytes = serde_json::to_vec(message).map_err(|_| ClientError::BadRequest)?;
        Ok(Bytes::from(bytes))
    }

    fn decode(&self, message_type: MessageType, bytes: &[u8]) -> Result<InboundMessage, ClientError> {
        let message: InboundMessage =
            serde_json::from_slice(bytes).map_err(|_| ClientError::UnexpectedResponse(message_type))?;
        if message.message_type() != message_type {
            return Err(ClientError::UnexpectedResponse(message_type));
        }
        Ok(message)
    }
}
