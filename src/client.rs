//! The public client facade: one async method per request kind, plus
//! subscription factories. This is the only layer where operation
//! timeouts, default credentials, and the default `resolve_link_tos`
//! flag are applied (spec §4.F), mirroring
//! `hooteproto::client::HootClient`'s `new`/`request`/`shutdown` shape.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::codec::{InboundMessage, OutboundMessage, PayloadCodec, ReadResult, WriteResult};
use crate::config::ClientSettings;
use crate::connection::{self, ConnectionHandle};
use crate::dispatcher::{self, Dispatcher};
use crate::error::ClientError;
use crate::packet::Packet;
use crate::resolver::EndpointResolver;
use crate::subscription::{self, CatchUpTarget, Subscription};
use crate::types::{Credentials, EventData, EventNumber, ExpectedVersion, Position, ResolvedEvent, StreamId};

/// Outcome of a successful append, as returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResultOk {
    pub first_event_number: u64,
    pub last_event_number: u64,
}

/// Outcome of a successful forward read of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSlice {
    pub events: Vec<ResolvedEvent>,
    pub next_event_number: u64,
    pub is_end_of_stream: bool,
}

/// Outcome of a successful forward read of `$all`.
#[derive(Debug, Clone, PartialEq)]
pub struct AllSlice {
    pub events: Vec<ResolvedEvent>,
    pub next_position: Position,
    pub is_end_of_stream: bool,
}

/// A connected client: owns a connection manager handle and a dispatcher
/// handle, and offers one async method per request kind plus
/// subscription factories.
pub struct Client {
    settings: ClientSettings,
    connection: ConnectionHandle,
    dispatcher: Dispatcher,
}

impl Client {
    /// Spawn the connection manager and dispatcher and return a
    /// connected client handle. Connection happens in the background;
    /// the first request submitted will be stashed and flushed once the
    /// socket comes up (spec §4.C).
    pub async fn connect(
        settings: ClientSettings,
        resolver: Arc<dyn EndpointResolver>,
        codec: Arc<dyn PayloadCodec>,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel::<Packet>(256);
        let connection = connection::spawn(settings.clone(), resolver, inbound_tx);
        let dispatcher =
            dispatcher::spawn(connection.clone(), inbound_rx, codec, settings.default_credentials.clone());

        Arc::new(Self { settings, connection, dispatcher })
    }

    /// Append one or more events to a stream.
    pub async fn append_to_stream(
        &self,
        stream_id: impl Into<StreamId>,
        expected_version: ExpectedVersion,
        events: Vec<EventData>,
        credentials: Option<Credentials>,
    ) -> Result<WriteResultOk, ClientError> {
        let message = OutboundMessage::WriteEvents {
            stream_id: stream_id.into(),
            expected_version,
            events,
            require_master: self.settings.require_master,
        };
        let message = self.request(message, credentials).await?;
        match message {
            InboundMessage::WriteEventsCompleted { result: WriteResult::Success { first_event_number, last_event_number } } => {
                Ok(WriteResultOk { first_event_number, last_event_number })
            }
            other => Err(ClientError::UnexpectedResponse(other.message_type())),
        }
    }

    /// Read a single event by its event number (`EventNumber::Last` reads
    /// whatever is most recent in the stream at read time).
    pub async fn read_event(
        &self,
        stream_id: impl Into<StreamId>,
        event_number: EventNumber,
        resolve_link_tos: Option<bool>,
        credentials: Option<Credentials>,
    ) -> Result<Option<ResolvedEvent>, ClientError> {
        let stream_id = stream_id.into();
        let resolve_link_tos = resolve_link_tos.unwrap_or(self.settings.resolve_link_tos);
        let event_number = self.resolve_event_number(&stream_id, event_number, resolve_link_tos, &credentials).await?;
        let message = OutboundMessage::ReadEvent { stream_id, event_number, resolve_link_tos };
        let message = self.request(message, credentials).await?;
        match message {
            InboundMessage::ReadEventCompleted { result: ReadResult::Success, event } => Ok(event),
            InboundMessage::ReadEventCompleted { .. } => Ok(None),
            other => Err(ClientError::UnexpectedResponse(other.message_type())),
        }
    }

    /// Page forward through a single stream starting at `from_event_number`
    /// (`EventNumber::Last` starts at whatever is most recent at read time).
    pub async fn read_stream_forward(
        &self,
        stream_id: impl Into<StreamId>,
        from_event_number: EventNumber,
        max_count: u32,
        resolve_link_tos: Option<bool>,
        credentials: Option<Credentials>,
    ) -> Result<StreamSlice, ClientError> {
        let stream_id = stream_id.into();
        let resolve_link_tos = resolve_link_tos.unwrap_or(self.settings.resolve_link_tos);
        let from_event_number =
            self.resolve_event_number(&stream_id, from_event_number, resolve_link_tos, &credentials).await?;
        self.read_stream_forward_raw(stream_id, from_event_number, max_count, resolve_link_tos, credentials).await
    }

    async fn read_stream_forward_raw(
        &self,
        stream_id: StreamId,
        from_event_number: u64,
        max_count: u32,
        resolve_link_tos: bool,
        credentials: Option<Credentials>,
    ) -> Result<StreamSlice, ClientError> {
        let message = OutboundMessage::ReadStreamEventsForward { stream_id, from_event_number, max_count, resolve_link_tos };
        let message = self.request(message, credentials).await?;
        match message {
            InboundMessage::ReadStreamEventsForwardCompleted { events, next_event_number, is_end_of_stream, .. } => {
                Ok(StreamSlice { events, next_event_number, is_end_of_stream })
            }
            other => Err(ClientError::UnexpectedResponse(other.message_type())),
        }
    }

    /// `EventNumber::First`/`Exact` resolve without a round trip;
    /// `EventNumber::Last` has no wire sentinel (unlike `Position::LAST`)
    /// and is resolved by paging forward to the end of the stream once.
    async fn resolve_event_number(
        &self,
        stream_id: &StreamId,
        number: EventNumber,
        resolve_link_tos: bool,
        credentials: &Option<Credentials>,
    ) -> Result<u64, ClientError> {
        if let Some(n) = number.exact() {
            return Ok(n);
        }
        let mut cursor = 0u64;
        let mut last_seen: Option<u64> = None;
        loop {
            let slice = self
                .read_stream_forward_raw(
                    stream_id.clone(),
                    cursor,
                    self.settings.read_batch_size,
                    resolve_link_tos,
                    credentials.clone(),
                )
                .await?;
            let count = slice.events.len();
            if let Some(event) = slice.events.last() {
                last_seen = Some(event.dedup_event_number());
            }
            if slice.is_end_of_stream || count < self.settings.read_batch_size as usize {
                break;
            }
            cursor = slice.next_event_number;
        }
        last_seen.ok_or(ClientError::EventNotFound)
    }

    /// Page forward through the global `$all` log starting at `from_position`.
    pub async fn read_all_forward(
        &self,
        from_position: Position,
        max_count: u32,
        resolve_link_tos: Option<bool>,
        credentials: Option<Credentials>,
    ) -> Result<AllSlice, ClientError> {
        let message = OutboundMessage::ReadAllEventsForward {
            from_position,
            max_count,
            resolve_link_tos: resolve_link_tos.unwrap_or(self.settings.resolve_link_tos),
        };
        let message = self.request(message, credentials).await?;
        match message {
            InboundMessage::ReadAllEventsForwardCompleted { events, next_position, is_end_of_stream } => {
                Ok(AllSlice { events, next_position, is_end_of_stream })
            }
            other => Err(ClientError::UnexpectedResponse(other.message_type())),
        }
    }

    /// Subscribe to live events on a stream only — no historical replay.
    pub fn subscribe_to_stream(
        &self,
        stream_id: impl Into<StreamId>,
        resolve_link_tos: Option<bool>,
        credentials: Option<Credentials>,
    ) -> Subscription {
        subscription::spawn_volatile(
            self.dispatcher.clone(),
            stream_id.into(),
            resolve_link_tos.unwrap_or(self.settings.resolve_link_tos),
            credentials.or_else(|| self.settings.default_credentials.clone()),
            self.settings.operation_timeout,
        )
    }

    /// Catch-up subscribe to a single stream from `from_exclusive`
    /// (`None` = from the beginning; `Some(EventNumber::Last)` resumes
    /// from whatever is most recent in the stream at subscribe time).
    pub fn subscribe_to_stream_from(
        &self,
        stream_id: impl Into<StreamId>,
        from_exclusive: Option<EventNumber>,
        resolve_link_tos: Option<bool>,
        credentials: Option<Credentials>,
    ) -> Subscription {
        subscription::spawn_catch_up(
            self.dispatcher.clone(),
            CatchUpTarget::stream(stream_id.into(), from_exclusive),
            resolve_link_tos.unwrap_or(self.settings.resolve_link_tos),
            self.settings.read_batch_size,
            credentials.or_else(|| self.settings.default_credentials.clone()),
            self.settings.operation_timeout,
        )
    }

    /// Catch-up subscribe to `$all` from `from_exclusive` (`None` = from
    /// the beginning of the log).
    pub fn subscribe_to_all_from(
        &self,
        from_exclusive: Option<Position>,
        resolve_link_tos: Option<bool>,
        credentials: Option<Credentials>,
    ) -> Subscription {
        subscription::spawn_catch_up(
            self.dispatcher.clone(),
            CatchUpTarget::all(from_exclusive),
            resolve_link_tos.unwrap_or(self.settings.resolve_link_tos),
            self.settings.read_batch_size,
            credentials.or_else(|| self.settings.default_credentials.clone()),
            self.settings.operation_timeout,
        )
    }

    async fn request(
        &self,
        message: OutboundMessage,
        credentials: Option<Credentials>,
    ) -> Result<InboundMessage, ClientError> {
        let (_, response_rx) = self
            .dispatcher
            .submit(message, credentials, self.settings.operation_timeout, self.settings.operation_max_retries)
            .await?;
        response_rx.await.map_err(|_| ClientError::ConnectionLost)?
    }

    /// Shut down the connection manager and dispatcher, failing every
    /// outstanding operation and subscription with `ConnectionLost`.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        self.connection.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_result_ok_is_plain_data() {
        let ok = WriteResultOk { first_event_number: 0, last_event_number: 0 };
        assert_eq!(ok.first_event_number, 0);
    }
}
