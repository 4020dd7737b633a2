//! The packet envelope: correlation id, message-type tag, optional auth,
//! and an opaque payload, serialised to/from the exact bytes handed back
//! by the frame codec.
//!
//! ```text
//! u8  flags         # bit 0: auth present; bits 1-7 reserved, must be 0
//! u8  message_type
//! u8[16] correlation_id   # UUID
//! if flags & 1:
//!     u8 login_len; u8[login_len] login
//!     u8 pw_len;    u8[pw_len] password
//! u8[...] payload
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::error::FrameError;
use crate::types::Credentials;

const FLAG_AUTH_PRESENT: u8 = 0b0000_0001;
const RESERVED_FLAG_MASK: u8 = !FLAG_AUTH_PRESENT;

const HEADER_LEN: usize = 1 + 1 + 16;

/// The closed set of logical operations this protocol carries. Every
/// message on the wire is tagged with exactly one of these.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    WriteEvents = 0x01,
    WriteEventsCompleted = 0x02,
    ReadEvent = 0x03,
    ReadEventCompleted = 0x04,
    ReadStreamEventsForward = 0x05,
    ReadStreamEventsForwardCompleted = 0x06,
    ReadAllEventsForward = 0x07,
    ReadAllEventsForwardCompleted = 0x08,
    SubscribeToStream = 0x09,
    SubscriptionConfirmed = 0x0A,
    StreamEventAppeared = 0x0B,
    SubscriptionDropped = 0x0C,
    Unsubscribe = 0x0D,
    HeartbeatRequest = 0x0E,
    HeartbeatResponse = 0x0F,
    Ping = 0x10,
    Pong = 0x11,
    NotAuthenticated = 0x12,
    BadRequest = 0x13,
    NotHandled = 0x14,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Result<Self, FrameError> {
        Ok(match value {
            0x01 => Self::WriteEvents,
            0x02 => Self::WriteEventsCompleted,
            0x03 => Self::ReadEvent,
            0x04 => Self::ReadEventCompleted,
            0x05 => Self::ReadStreamEventsForward,
            0x06 => Self::ReadStreamEventsForwardCompleted,
            0x07 => Self::ReadAllEventsForward,
            0x08 => Self::ReadAllEventsForwardCompleted,
            0x09 => Self::SubscribeToStream,
            0x0A => Self::SubscriptionConfirmed,
            0x0B => Self::StreamEventAppeared,
            0x0C => Self::SubscriptionDropped,
            0x0D => Self::Unsubscribe,
            0x0E => Self::HeartbeatRequest,
            0x0F => Self::HeartbeatResponse,
            0x10 => Self::Ping,
            0x11 => Self::Pong,
            0x12 => Self::NotAuthenticated,
            0x13 => Self::BadRequest,
            0x14 => Self::NotHandled,
            other => return Err(FrameError::InvalidMessageType(other)),
        })
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// A parsed packet envelope. `payload` is opaque to this layer — it is
/// produced and consumed by a [`crate::codec::PayloadCodec`].
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub message_type: MessageType,
    pub correlation_id: Uuid,
    pub credentials: Option<Credentials>,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(message_type: MessageType, correlation_id: Uuid, payload: Bytes) -> Self {
        Self { message_type, correlation_id, credentials: None, payload }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn decode(mut bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort { expected: HEADER_LEN, actual: bytes.len() });
        }

        let flags = bytes[0];
        if flags & RESERVED_FLAG_MASK != 0 {
            return Err(FrameError::ReservedFlagsSet(flags));
        }
        let message_type = MessageType::from_u8(bytes[1])?;
        let correlation_id =
            Uuid::from_slice(&bytes[2..18]).map_err(|_| FrameError::InvalidCorrelationId)?;

        let mut rest = bytes.split_off(HEADER_LEN);

        let credentials = if flags & FLAG_AUTH_PRESENT != 0 {
            if rest.is_empty() {
                return Err(FrameError::TooShort { expected: 1, actual: 0 });
            }
            let login_len = rest[0] as usize;
            if rest.len() < 1 + login_len + 1 {
                return Err(FrameError::TooShort { expected: 1 + login_len + 1, actual: rest.len() });
            }
            let login = std::str::from_utf8(&rest[1..1 + login_len])
                .map_err(|_| FrameError::InvalidUtf8("login"))?
                .to_string();
            let pw_len_offset = 1 + login_len;
            let pw_len = rest[pw_len_offset] as usize;
            let pw_start = pw_len_offset + 1;
            if rest.len() < pw_start + pw_len {
                return Err(FrameError::TooShort { expected: pw_start + pw_len, actual: rest.len() });
            }
            let password = std::str::from_utf8(&rest[pw_start..pw_start + pw_len])
                .map_err(|_| FrameError::InvalidUtf8("password"))?
                .to_string();
            rest = rest.split_off(pw_start + pw_len);
            Some(Credentials::new(login, password))
        } else {
            None
        };

        Ok(Self { message_type, correlation_id, credentials, payload: rest })
    }

    pub fn encode(&self) -> Bytes {
        let auth_len = self
            .credentials
            .as_ref()
            .map(|c| 1 + c.login.len() + 1 + c.password.len())
            .unwrap_or(0);
        let mut buf = BytesMut::with_capacity(HEADER_LEN + auth_len + self.payload.len());

        let flags = if self.credentials.is_some() { FLAG_AUTH_PRESENT } else { 0 };
        buf.put_u8(flags);
        buf.put_u8(self.message_type.to_u8());
        buf.put_slice(self.correlation_id.as_bytes());

        if let Some(creds) = &self.credentials {
            buf.put_u8(creds.login.len() as u8);
            buf.put_slice(creds.login.as_bytes());
            buf.put_u8(creds.password.len() as u8);
            buf.put_slice(creds.password.as_bytes());
        }

        buf.put_slice(&self.payload);
        buf.freeze()
    }
}
