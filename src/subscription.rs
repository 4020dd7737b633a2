//! The subscription engine: volatile (live-only) and catch-up (stream or
//! `$all`) subscriptions, each run as its own lightweight task per spec
//! §4.E and §5 — a third actor role alongside the connection manager and
//! the dispatcher, following the same one-task-per-role convention as
//! `hooteproto::client::reactor_task`/`spawn_health_task`.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::codec::{InboundMessage, OutboundMessage};
use crate::dispatcher::Dispatcher;
use crate::error::{ClientError, DropReason};
use crate::types::{Credentials, EventNumber, Position, ResolvedEvent, StreamId};

/// A single event delivered to a subscription's observer. The terminal
/// variant (`Dropped`) is delivered exactly once and no further events
/// follow it.
#[derive(Debug, Clone)]
pub enum SubscriptionEvent {
    /// All historical events (if any) have been delivered; subsequent
    /// events arrive live.
    LiveProcessingStarted,
    EventAppeared(ResolvedEvent),
    Dropped(DropReason),
}

enum SubscriptionControl {
    Close(oneshot::Sender<()>),
}

/// A caller's handle to a running subscription task. Dropping this
/// handle without calling [`Subscription::close`] leaves the task
/// running until the connection or server ends it; `close` is the only
/// way to guarantee the silence property spec §8 property 4 requires.
pub struct Subscription {
    events_rx: mpsc::Receiver<SubscriptionEvent>,
    control_tx: mpsc::Sender<SubscriptionControl>,
}

impl Subscription {
    /// Wait for the next event. Returns `None` once the channel closes,
    /// which only happens after a `Dropped` event has already been
    /// delivered.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events_rx.recv().await
    }

    /// Unsubscribe. Sends `Unsubscribe` to the server best-effort and
    /// waits for the subscription task to acknowledge before returning —
    /// no further observer callbacks are ever produced after this
    /// resolves, though the task's final `Dropped(Unsubscribed)` event is
    /// already queued and can still be read with [`Self::next`].
    pub async fn close(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.control_tx.send(SubscriptionControl::Close(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }
}

fn new_handle() -> (mpsc::Sender<SubscriptionEvent>, mpsc::Receiver<SubscriptionControl>, Subscription) {
    let (events_tx, events_rx) = mpsc::channel(256);
    let (control_tx, control_rx) = mpsc::channel(8);
    (events_tx, control_rx, Subscription { events_rx, control_tx })
}

/// Spawn a volatile (live-only) subscription to `stream_id`.
pub fn spawn_volatile(
    dispatcher: Dispatcher,
    stream_id: StreamId,
    resolve_link_tos: bool,
    credentials: Option<Credentials>,
    timeout: Duration,
) -> Subscription {
    let (events_tx, control_rx, handle) = new_handle();
    tokio::spawn(run_volatile(dispatcher, stream_id, resolve_link_tos, credentials, timeout, events_tx, control_rx));
    handle
}

async fn run_volatile(
    dispatcher: Dispatcher,
    stream_id: StreamId,
    resolve_link_tos: bool,
    credentials: Option<Credentials>,
    timeout: Duration,
    events_tx: mpsc::Sender<SubscriptionEvent>,
    mut control_rx: mpsc::Receiver<SubscriptionControl>,
) {
    let message = OutboundMessage::SubscribeToStream { stream_id, resolve_link_tos };
    let (correlation_id, mut response_rx) = match dispatcher
        .submit_streaming(message, credentials.clone(), timeout, 0)
        .await
    {
        Ok(v) => v,
        Err(_) => {
            let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::ConnectionLost)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            biased;

            ctrl = control_rx.recv() => {
                close_subscription(&dispatcher, correlation_id, &credentials, &events_tx, ctrl).await;
                return;
            }

            msg = response_rx.recv() => {
                match msg {
                    Some(Ok(InboundMessage::SubscriptionConfirmed { .. })) => {
                        if events_tx.send(SubscriptionEvent::LiveProcessingStarted).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(InboundMessage::StreamEventAppeared { event })) => {
                        if events_tx.send(SubscriptionEvent::EventAppeared(event)).await.is_err() {
                            return;
                        }
                    }
                    Some(Ok(other)) => {
                        debug!(?other, "volatile subscription: unexpected push, ignoring");
                    }
                    Some(Err(ClientError::SubscriptionDropped(reason))) => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(reason)).await;
                        return;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "volatile subscription: terminal error");
                        let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::ConnectionLost)).await;
                        return;
                    }
                    None => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::ConnectionLost)).await;
                        return;
                    }
                }
            }
        }
    }
}

/// Common handling for the caller-initiated close path: best-effort
/// `Unsubscribe`, drop the dispatcher's operation record, deliver the
/// terminal `Dropped(Unsubscribed)` event, then ack the closer. Also
/// used when the control channel closes without an explicit `Close`
/// (the caller dropped its `Subscription` handle) — in that case there
/// is no ack to send and nobody left to deliver the terminal event to.
async fn close_subscription(
    dispatcher: &Dispatcher,
    correlation_id: Uuid,
    credentials: &Option<Credentials>,
    events_tx: &mpsc::Sender<SubscriptionEvent>,
    ctrl: Option<SubscriptionControl>,
) {
    dispatcher.send_raw(correlation_id, OutboundMessage::Unsubscribe, credentials.clone()).await;
    dispatcher.cancel(correlation_id).await;
    let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::Unsubscribed)).await;
    if let Some(SubscriptionControl::Close(ack)) = ctrl {
        let _ = ack.send(());
    }
}

/// What a catch-up subscription is reading/subscribing against. `$all`
/// catch-up dedups by [`Position`]; single-stream catch-up dedups by
/// event number (spec §4.E "De-duplication policy"). `from_exclusive` is
/// kept unresolved here — resolving `EventNumber::Last`/a `Position`
/// sentinel takes a network round trip and happens once, at the top of
/// [`run_catch_up`], not at construction time.
#[derive(Debug, Clone)]
pub enum CatchUpTarget {
    Stream { stream_id: StreamId, from_exclusive: Option<EventNumber> },
    All { from_exclusive: Option<Position> },
}

impl CatchUpTarget {
    pub fn stream(stream_id: StreamId, from_exclusive: Option<EventNumber>) -> Self {
        Self::Stream { stream_id, from_exclusive }
    }

    pub fn all(from_exclusive: Option<Position>) -> Self {
        Self::All { from_exclusive }
    }

    fn subscribe_message(&self, resolve_link_tos: bool) -> OutboundMessage {
        let stream_id = match self {
            Self::Stream { stream_id, .. } => stream_id.clone(),
            Self::All { .. } => StreamId::new("$all"),
        };
        OutboundMessage::SubscribeToStream { stream_id, resolve_link_tos }
    }
}

struct Page {
    events: Vec<ResolvedEvent>,
    next_event_number: u64,
    next_position: Position,
    is_end_of_stream: bool,
    count: usize,
}

async fn read_once(
    dispatcher: &Dispatcher,
    target: &CatchUpTarget,
    cursor_number: u64,
    cursor_position: Position,
    batch: u32,
    resolve_link_tos: bool,
    credentials: Option<Credentials>,
    timeout: Duration,
) -> Result<Page, ClientError> {
    let message = match target {
        CatchUpTarget::Stream { stream_id, .. } => OutboundMessage::ReadStreamEventsForward {
            stream_id: stream_id.clone(),
            from_event_number: cursor_number,
            max_count: batch,
            resolve_link_tos,
        },
        CatchUpTarget::All { .. } => OutboundMessage::ReadAllEventsForward {
            from_position: cursor_position,
            max_count: batch,
            resolve_link_tos,
        },
    };

    let (_, response_rx) = dispatcher.submit(message, credentials, timeout, 0).await?;
    let message = response_rx.await.map_err(|_| ClientError::ConnectionLost)??;

    match message {
        InboundMessage::ReadStreamEventsForwardCompleted { events, next_event_number, is_end_of_stream, .. } => {
            Ok(Page { count: events.len(), events, next_event_number, next_position: cursor_position, is_end_of_stream })
        }
        InboundMessage::ReadAllEventsForwardCompleted { events, next_position, is_end_of_stream } => {
            Ok(Page { count: events.len(), events, next_event_number: cursor_number, next_position, is_end_of_stream })
        }
        other => Err(ClientError::UnexpectedResponse(other.message_type())),
    }
}

fn should_emit(target: &CatchUpTarget, event: &ResolvedEvent, last_number: Option<u64>, last_position: Option<Position>) -> bool {
    match target {
        CatchUpTarget::Stream { .. } => {
            let number = event.dedup_event_number();
            last_number.map_or(true, |last| number > last)
        }
        CatchUpTarget::All { .. } => match event.dedup_position() {
            Some(position) => last_position.map_or(true, |last| position > last),
            None => true,
        },
    }
}

fn record_emitted(target: &CatchUpTarget, event: &ResolvedEvent, last_number: &mut Option<u64>, last_position: &mut Option<Position>) {
    match target {
        CatchUpTarget::Stream { .. } => *last_number = Some(event.dedup_event_number()),
        CatchUpTarget::All { .. } => {
            if let Some(position) = event.dedup_position() {
                *last_position = Some(position);
            }
        }
    }
}

fn to_drop_reason(err: ClientError) -> DropReason {
    match err {
        ClientError::AccessDenied => DropReason::AccessDenied,
        ClientError::StreamNotFound | ClientError::StreamDeleted | ClientError::EventNotFound => DropReason::NotFound,
        ClientError::SubscriptionDropped(reason) => reason,
        _ => DropReason::ConnectionLost,
    }
}

/// Resolve a single-stream catch-up's `from_exclusive` bound to a
/// concrete event number the caller has already observed, or `None` if
/// catching up from the very beginning. `EventNumber::First`/`Exact` are
/// already concrete; `EventNumber::Last` has no wire sentinel (unlike
/// `Position::LAST`) and is resolved by paging forward to the end of the
/// stream once, up front.
async fn resolve_stream_from_exclusive(
    dispatcher: &Dispatcher,
    stream_id: &StreamId,
    from_exclusive: Option<EventNumber>,
    batch: u32,
    resolve_link_tos: bool,
    credentials: Option<Credentials>,
    timeout: Duration,
) -> Result<Option<u64>, ClientError> {
    let Some(number) = from_exclusive else { return Ok(None) };
    if let Some(n) = number.exact() {
        return Ok(Some(n));
    }

    let mut cursor = 0u64;
    let mut last_seen: Option<u64> = None;
    loop {
        let message = OutboundMessage::ReadStreamEventsForward {
            stream_id: stream_id.clone(),
            from_event_number: cursor,
            max_count: batch,
            resolve_link_tos,
        };
        let (_, response_rx) = dispatcher.submit(message, credentials.clone(), timeout, 0).await?;
        let response = response_rx.await.map_err(|_| ClientError::ConnectionLost)??;
        match response {
            InboundMessage::ReadStreamEventsForwardCompleted { events, next_event_number, is_end_of_stream, .. } => {
                let count = events.len();
                if let Some(event) = events.last() {
                    last_seen = Some(event.dedup_event_number());
                }
                if is_end_of_stream || count < batch as usize {
                    break;
                }
                cursor = next_event_number;
            }
            other => return Err(ClientError::UnexpectedResponse(other.message_type())),
        }
    }
    Ok(last_seen)
}

/// Spawn a catch-up subscription: page historical events from `target`'s
/// starting point, then switch to live delivery without gaps or
/// duplicates (spec §4.E).
pub fn spawn_catch_up(
    dispatcher: Dispatcher,
    target: CatchUpTarget,
    resolve_link_tos: bool,
    read_batch_size: u32,
    credentials: Option<Credentials>,
    timeout: Duration,
) -> Subscription {
    let (events_tx, control_rx, handle) = new_handle();
    tokio::spawn(run_catch_up(dispatcher, target, resolve_link_tos, read_batch_size, credentials, timeout, events_tx, control_rx));
    handle
}

async fn run_catch_up(
    dispatcher: Dispatcher,
    target: CatchUpTarget,
    resolve_link_tos: bool,
    read_batch_size: u32,
    credentials: Option<Credentials>,
    timeout: Duration,
    events_tx: mpsc::Sender<SubscriptionEvent>,
    mut control_rx: mpsc::Receiver<SubscriptionControl>,
) {
    // Resolve the caller's from-exclusive bound to a concrete event
    // number the caller has already seen, if any. Seeding the dedup
    // state with it (rather than leaving it at `None`) is what stops a
    // resumed catch-up from re-delivering that boundary event — but it
    // must only happen when the caller actually supplied a bound, never
    // for the default start-from-the-beginning case, or event/position
    // zero would be wrongly filtered out.
    let resume_after_number = match &target {
        CatchUpTarget::Stream { stream_id, from_exclusive } => {
            match resolve_stream_from_exclusive(
                &dispatcher,
                stream_id,
                *from_exclusive,
                read_batch_size,
                resolve_link_tos,
                credentials.clone(),
                timeout,
            )
            .await
            {
                Ok(v) => v,
                Err(e) => {
                    let _ = events_tx.send(SubscriptionEvent::Dropped(to_drop_reason(e))).await;
                    return;
                }
            }
        }
        CatchUpTarget::All { .. } => None,
    };

    let mut last_number: Option<u64> = resume_after_number;
    let mut last_position: Option<Position> = match &target {
        CatchUpTarget::All { from_exclusive } => *from_exclusive,
        CatchUpTarget::Stream { .. } => None,
    };
    let mut cursor_number = match &target {
        CatchUpTarget::Stream { .. } => resume_after_number.unwrap_or(0),
        CatchUpTarget::All { .. } => 0,
    };
    let mut cursor_position = match &target {
        CatchUpTarget::All { from_exclusive } => from_exclusive.unwrap_or(Position::FIRST),
        CatchUpTarget::Stream { .. } => Position::FIRST,
    };

    // Phase 1: Reading. Page historical events until the server reports
    // end-of-stream or a short page (fewer than the requested batch).
    loop {
        tokio::select! {
            biased;

            ctrl = control_rx.recv() => {
                // No subscription correlation id exists yet during the
                // historical paging phase — nothing to Unsubscribe from.
                let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::Unsubscribed)).await;
                if let Some(SubscriptionControl::Close(ack)) = ctrl {
                    let _ = ack.send(());
                }
                return;
            }

            result = read_once(&dispatcher, &target, cursor_number, cursor_position, read_batch_size, resolve_link_tos, credentials.clone(), timeout) => {
                match result {
                    Ok(page) => {
                        for event in page.events {
                            if should_emit(&target, &event, last_number, last_position) {
                                record_emitted(&target, &event, &mut last_number, &mut last_position);
                                if events_tx.send(SubscriptionEvent::EventAppeared(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        cursor_number = page.next_event_number;
                        cursor_position = page.next_position;
                        if page.is_end_of_stream || page.count < read_batch_size as usize {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(to_drop_reason(e))).await;
                        return;
                    }
                }
            }
        }
    }

    // Phase 2: CatchingUp. Subscribe live, buffering pushes, while a
    // final paging pass drains any backlog written between the last
    // historical read and the subscribe confirmation.
    let (correlation_id, mut live_rx) = match dispatcher
        .submit_streaming(target.subscribe_message(resolve_link_tos), credentials.clone(), timeout, 0)
        .await
    {
        Ok(v) => v,
        Err(_) => {
            let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::ConnectionLost)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            biased;
            ctrl = control_rx.recv() => {
                close_subscription(&dispatcher, correlation_id, &credentials, &events_tx, ctrl).await;
                return;
            }
            msg = live_rx.recv() => {
                match msg {
                    Some(Ok(InboundMessage::SubscriptionConfirmed { .. })) => break,
                    Some(Ok(_)) => continue,
                    Some(Err(ClientError::SubscriptionDropped(reason))) => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(reason)).await;
                        return;
                    }
                    Some(Err(_)) | None => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::ConnectionLost)).await;
                        return;
                    }
                }
            }
        }
    }

    let mut live_buffer: VecDeque<ResolvedEvent> = VecDeque::new();

    'draining: loop {
        // Opportunistically buffer anything already pushed without
        // blocking the historical read loop behind it.
        while let Ok(msg) = live_rx.try_recv() {
            match msg {
                Ok(InboundMessage::StreamEventAppeared { event }) => live_buffer.push_back(event),
                Err(ClientError::SubscriptionDropped(reason)) => {
                    let _ = events_tx.send(SubscriptionEvent::Dropped(reason)).await;
                    return;
                }
                _ => {}
            }
        }

        tokio::select! {
            biased;
            ctrl = control_rx.recv() => {
                close_subscription(&dispatcher, correlation_id, &credentials, &events_tx, ctrl).await;
                return;
            }
            result = read_once(&dispatcher, &target, cursor_number, cursor_position, read_batch_size, resolve_link_tos, credentials.clone(), timeout) => {
                match result {
                    Ok(page) => {
                        for event in page.events {
                            if should_emit(&target, &event, last_number, last_position) {
                                record_emitted(&target, &event, &mut last_number, &mut last_position);
                                if events_tx.send(SubscriptionEvent::EventAppeared(event)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        cursor_number = page.next_event_number;
                        cursor_position = page.next_position;
                        if page.is_end_of_stream || page.count < read_batch_size as usize {
                            break 'draining;
                        }
                    }
                    Err(e) => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(to_drop_reason(e))).await;
                        dispatcher.cancel(correlation_id).await;
                        return;
                    }
                }
            }
        }
    }

    // Phase 3: LiveProcessing. Drain whatever was buffered, deduplicating
    // against the last emitted event, then forward subsequent pushes
    // directly.
    if events_tx.send(SubscriptionEvent::LiveProcessingStarted).await.is_err() {
        return;
    }
    for event in live_buffer.drain(..) {
        if should_emit(&target, &event, last_number, last_position) {
            record_emitted(&target, &event, &mut last_number, &mut last_position);
            if events_tx.send(SubscriptionEvent::EventAppeared(event)).await.is_err() {
                return;
            }
        }
    }

    loop {
        tokio::select! {
            biased;
            ctrl = control_rx.recv() => {
                close_subscription(&dispatcher, correlation_id, &credentials, &events_tx, ctrl).await;
                return;
            }
            msg = live_rx.recv() => {
                match msg {
                    Some(Ok(InboundMessage::StreamEventAppeared { event })) => {
                        if should_emit(&target, &event, last_number, last_position) {
                            record_emitted(&target, &event, &mut last_number, &mut last_position);
                            if events_tx.send(SubscriptionEvent::EventAppeared(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(ClientError::SubscriptionDropped(reason))) => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(reason)).await;
                        return;
                    }
                    Some(Err(_)) | None => {
                        let _ = events_tx.send(SubscriptionEvent::Dropped(DropReason::ConnectionLost)).await;
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ContentKind, EventRecord};
    use chrono::Utc;

    fn event(number: u64, position: Position) -> ResolvedEvent {
        ResolvedEvent {
            inner: EventRecord {
                stream_id: StreamId::new("s"),
                event_number: number,
                position: Some(position),
                event_id: Uuid::new_v4(),
                event_type: "t".into(),
                data: vec![],
                metadata: vec![],
                data_content: ContentKind::Binary,
                metadata_content: ContentKind::Binary,
                created_at: Utc::now(),
            },
            link: None,
        }
    }

    #[test]
    fn stream_dedup_drops_at_or_below_last_emitted() {
        let target = CatchUpTarget::stream(StreamId::new("s"), None);
        let e5 = event(5, Position::new(5, 5));
        assert!(!should_emit(&target, &e5, Some(5), None));
        assert!(should_emit(&target, &e5, Some(4), None));
        assert!(should_emit(&target, &e5, None, None));
    }

    #[test]
    fn all_dedup_drops_at_or_below_last_position() {
        let target = CatchUpTarget::all(None);
        let e = event(0, Position::new(10, 10));
        assert!(!should_emit(&target, &e, None, Some(Position::new(10, 10))));
        assert!(should_emit(&target, &e, None, Some(Position::new(9, 9))));
    }

    #[test]
    fn record_emitted_tracks_greatest_seen() {
        let target = CatchUpTarget::stream(StreamId::new("s"), None);
        let mut last_number = None;
        let mut last_position = None;
        record_emitted(&target, &event(3, Position::FIRST), &mut last_number, &mut last_position);
        assert_eq!(last_number, Some(3));
    }

    #[test]
    fn catch_up_targets_carry_the_unresolved_bound() {
        match CatchUpTarget::stream(StreamId::new("s"), Some(EventNumber::Exact(7))) {
            CatchUpTarget::Stream { from_exclusive, .. } => assert_eq!(from_exclusive, Some(EventNumber::Exact(7))),
            _ => panic!("wrong variant"),
        }
        match CatchUpTarget::all(None) {
            CatchUpTarget::All { from_exclusive } => assert_eq!(from_exclusive, None),
            _ => panic!("wrong variant"),
        }
    }
}
