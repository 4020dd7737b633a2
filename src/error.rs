//! Error taxonomy surfaced to callers.

use crate::packet::MessageType;

/// Errors that can terminate an operation or subscription.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("access denied")]
    AccessDenied,

    #[error("bad request")]
    BadRequest,

    #[error("wrong expected version: given {given}, actual {actual:?}")]
    WrongExpectedVersion { given: i64, actual: Option<i64> },

    #[error("stream deleted")]
    StreamDeleted,

    #[error("stream not found")]
    StreamNotFound,

    #[error("event not found")]
    EventNotFound,

    #[error("operation timed out")]
    OperationTimedOut,

    #[error("connection lost")]
    ConnectionLost,

    #[error("retries exhausted")]
    RetriesExhausted,

    #[error("unexpected response for message type {0:?}")]
    UnexpectedResponse(MessageType),

    #[error("invalid frame: {0}")]
    InvalidFrame(#[from] FrameError),

    #[error("subscription dropped: {0}")]
    SubscriptionDropped(#[from] DropReason),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a subscription's terminal `onDropped` callback can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
pub enum DropReason {
    #[error("unsubscribed by caller")]
    Unsubscribed,
    #[error("access denied")]
    AccessDenied,
    #[error("stream not found")]
    NotFound,
    #[error("connection lost")]
    ConnectionLost,
    #[error("live buffer overflow")]
    Overflow,
}

/// Errors produced while decoding or encoding frames on the wire.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("frame length {0} exceeds the maximum of {max}", max = crate::frame::MAX_FRAME_SIZE)]
    TooLarge(u32),

    #[error("invalid message type byte: {0:#04x}")]
    InvalidMessageType(u8),

    #[error("invalid correlation id")]
    InvalidCorrelationId,

    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    #[error("reserved flag bits set: {0:#04x}")]
    ReservedFlagsSet(u8),

    #[error("backpressure buffer of {buffered} bytes exceeds the absolute watermark of {max}")]
    BackpressureExceeded { buffered: usize, max: usize },
}
