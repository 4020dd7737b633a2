//! Domain types: stream identifiers, event numbers, positions, and the
//! event records that flow through reads, writes, and subscriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a stream. Names beginning with `$` are system streams
/// (e.g. `$all`); `$$…` names are metadata streams.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_system(&self) -> bool {
        self.0.starts_with('$')
    }

    pub fn is_metadata(&self) -> bool {
        self.0.starts_with("$$")
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StreamId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for StreamId {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A position within a single stream. `First` and `Last` are sentinels
/// resolved by the read phase that issued them, not by the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventNumber {
    First,
    Exact(u64),
    Last,
}

impl EventNumber {
    pub fn exact(&self) -> Option<u64> {
        match self {
            EventNumber::Exact(n) => Some(*n),
            EventNumber::First => Some(0),
            EventNumber::Last => None,
        }
    }
}

/// A global ordering pair in the `$all` log, totally ordered
/// lexicographically by (commit, prepare).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub commit: u64,
    pub prepare: u64,
}

impl Position {
    pub const FIRST: Position = Position { commit: 0, prepare: 0 };
    pub const LAST: Position = Position { commit: u64::MAX, prepare: u64::MAX };

    pub fn new(commit: u64, prepare: u64) -> Self {
        Self { commit, prepare }
    }
}

/// Optimistic-concurrency precondition supplied with a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// No optimistic check.
    Any,
    /// Stream must not exist.
    NoStream,
    /// Stream exists and is empty.
    EmptyStream,
    /// Last event number must equal this value.
    Exact(u64),
}

/// Binary or JSON encoding of an event's data/metadata bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContentKind {
    Binary,
    Json,
}

/// An event supplied by the caller for a write. `event_id` is unique
/// within the target stream over its lifetime and is used by the server
/// for write idempotence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub event_id: Uuid,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub data_content: ContentKind,
    pub metadata_content: ContentKind,
}

impl EventData {
    pub fn new(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            metadata: Vec::new(),
            data_content: ContentKind::Binary,
            metadata_content: ContentKind::Binary,
        }
    }

    pub fn with_metadata(mut self, metadata: Vec<u8>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_json_content(mut self) -> Self {
        self.data_content = ContentKind::Json;
        self.metadata_content = ContentKind::Json;
        self
    }
}

/// An event as returned by the server: `EventData` plus its resolved
/// position in the stream and server-assigned timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub stream_id: StreamId,
    pub event_number: u64,
    /// This event's position in the `$all` log. Always present in
    /// practice; `None` only appears in hand-built test fixtures that
    /// don't care about `$all` ordering.
    pub position: Option<Position>,
    pub event_id: Uuid,
    pub event_type: String,
    pub data: Vec<u8>,
    pub metadata: Vec<u8>,
    pub data_content: ContentKind,
    pub metadata_content: ContentKind,
    pub created_at: DateTime<Utc>,
}

/// An event returned from a read or subscription. When the underlying
/// event is a link-to event and resolution was requested, `inner` is the
/// target event and `link` is the pointer; otherwise `inner` is the
/// pointer itself and `link` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEvent {
    pub inner: EventRecord,
    pub link: Option<EventRecord>,
}

impl ResolvedEvent {
    /// The event-number used for catch-up de-duplication: the link's
    /// number when present (the position in the stream being read),
    /// otherwise the inner event's own number.
    pub fn dedup_event_number(&self) -> u64 {
        self.link.as_ref().map(|l| l.event_number).unwrap_or(self.inner.event_number)
    }

    /// The position used for `$all` catch-up de-duplication, preferring
    /// the link's position when present for the same reason
    /// [`Self::dedup_event_number`] prefers the link's number.
    pub fn dedup_position(&self) -> Option<Position> {
        self.link.as_ref().map(|l| l.position).unwrap_or(self.inner.position)
    }
}

/// Client credentials placed in a packet's optional auth field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl Credentials {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self { login: login.into(), password: password.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_classification() {
        assert!(StreamId::new("$all").is_system());
        assert!(StreamId::new("$$s").is_metadata());
        assert!(!StreamId::new("orders-1").is_system());
    }

    #[test]
    fn position_ordering() {
        assert!(Position::new(1, 0) > Position::new(0, 5));
        assert!(Position::new(1, 2) < Position::new(1, 3));
        assert_eq!(Position::FIRST, Position::new(0, 0));
    }

    #[test]
    fn resolved_event_dedup_prefers_link() {
        let inner = EventRecord {
            stream_id: StreamId::new("s"),
            event_number: 10,
            position: Some(Position::new(10, 10)),
            event_id: Uuid::new_v4(),
            event_type: "t".into(),
            data: vec![],
            metadata: vec![],
            data_content: ContentKind::Binary,
            metadata_content: ContentKind::Binary,
            created_at: Utc::now(),
        };
        let mut link = inner.clone();
        link.event_number = 3;
        let resolved = ResolvedEvent { inner: inner.clone(), link: Some(link) };
        assert_eq!(resolved.dedup_event_number(), 3);

        let resolved_no_link = ResolvedEvent { inner, link: None };
        assert_eq!(resolved_no_link.dedup_event_number(), 10);
    }
}
