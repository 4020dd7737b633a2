//! The connection manager: a single long-lived TCP session, run as a
//! dedicated reactor task that owns the socket exclusively. Mirrors
//! `hooteproto::client::reactor_task`'s "socket owned by dedicated
//! reactor task, everything else talks to it through channels" shape,
//! generalized to the state machine this protocol needs (`Idle` →
//! `Connecting` → `Connected`, reconnect loop, `Terminated`).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::ClientSettings;
use crate::error::ClientError;
use crate::frame::FrameCodec;
use crate::packet::{MessageType, Packet};
use crate::resolver::EndpointResolver;

/// Lifecycle notifications broadcast to the dispatcher and subscriptions.
/// This is the "message bus" spec §3 requires the dispatcher and
/// subscription engine to share instead of mutable state.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A fresh socket is up and the outbound stash has been flushed.
    Connected,
    /// The socket was lost; a reconnect attempt is in flight.
    Reconnecting,
    /// The reconnect budget is exhausted; this connection will not retry
    /// again. All in-flight operations and subscriptions should fail
    /// with `ConnectionLost`.
    Terminated,
    /// A stashed packet was dropped because the outbound stash was full;
    /// the operation owning this correlation id should be failed with
    /// `ConnectionLost`.
    StashOverflow(Uuid),
}

enum ConnectionCommand {
    Send(Packet),
    /// Drop the current socket and re-resolve the endpoint, without
    /// touching the reconnect budget or failing in-flight operations —
    /// used when the dispatcher learns the current endpoint is no longer
    /// master (spec §4.D).
    ForceReconnect,
    Shutdown,
}

/// Handle used by the dispatcher (and, indirectly, the public facade) to
/// talk to the connection manager's reactor task.
#[derive(Clone)]
pub struct ConnectionHandle {
    cmd_tx: mpsc::Sender<ConnectionCommand>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionHandle {
    pub async fn send(&self, packet: Packet) -> Result<(), ClientError> {
        self.cmd_tx
            .send(ConnectionCommand::Send(packet))
            .await
            .map_err(|_| ClientError::ConnectionLost)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    /// Force the connection manager to drop its current socket (if any)
    /// and re-resolve the endpoint before reconnecting.
    pub async fn force_reconnect(&self) {
        let _ = self.cmd_tx.send(ConnectionCommand::ForceReconnect).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ConnectionCommand::Shutdown).await;
    }
}

/// Spawn the connection manager and return a handle to it. Inbound
/// packets that are not heartbeats/pings are forwarded on `inbound_tx`
/// for the dispatcher to route by correlation id.
pub fn spawn(
    settings: ClientSettings,
    resolver: Arc<dyn EndpointResolver>,
    inbound_tx: mpsc::Sender<Packet>,
) -> ConnectionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (events_tx, _) = broadcast::channel(64);
    let task_events_tx = events_tx.clone();

    tokio::spawn(run(settings, resolver, cmd_rx, inbound_tx, task_events_tx));

    ConnectionHandle { cmd_tx, events_tx }
}

fn stash_packet(
    stash: &mut VecDeque<Packet>,
    packet: Packet,
    capacity: usize,
    events_tx: &broadcast::Sender<ConnectionEvent>,
) {
    if stash.len() >= capacity {
        if let Some(dropped) = stash.pop_front() {
            debug!(correlation_id = %dropped.correlation_id, "connection manager: outbound stash full, dropping oldest");
            let _ = events_tx.send(ConnectionEvent::StashOverflow(dropped.correlation_id));
        }
    }
    stash.push_back(packet);
}

async fn run(
    settings: ClientSettings,
    resolver: Arc<dyn EndpointResolver>,
    mut cmd_rx: mpsc::Receiver<ConnectionCommand>,
    inbound_tx: mpsc::Sender<Packet>,
    events_tx: broadcast::Sender<ConnectionEvent>,
) {
    let mut stash: VecDeque<Packet> = VecDeque::new();
    let mut reconnect_attempts: u32 = 0;

    'driver: loop {
        let _ = events_tx.send(ConnectionEvent::Reconnecting);
        let endpoint = resolver.next_endpoint().await;
        debug!(%endpoint, "connection manager: attempting connect");

        let connect_fut = tokio::time::timeout(
            settings.connection_timeout,
            TcpStream::connect((endpoint.host.as_str(), endpoint.port)),
        );
        tokio::pin!(connect_fut);

        let stream = 'connecting: loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnectionCommand::Send(packet)) => {
                            stash_packet(&mut stash, packet, settings.outbound_stash_capacity, &events_tx);
                        }
                        Some(ConnectionCommand::ForceReconnect) => {
                            // Already re-resolving and connecting fresh.
                        }
                        Some(ConnectionCommand::Shutdown) | None => {
                            info!("connection manager: shutdown requested while connecting");
                            break 'driver;
                        }
                    }
                }

                result = &mut connect_fut => {
                    break 'connecting result;
                }
            }
        };

        let stream = match stream {
            Ok(Ok(stream)) => stream,
            _ => {
                resolver.mark_failed(&endpoint).await;
                reconnect_attempts += 1;
                if !settings.max_reconnections.has_budget(reconnect_attempts) {
                    warn!("connection manager: reconnect budget exhausted, terminating");
                    let _ = events_tx.send(ConnectionEvent::Terminated);
                    break 'driver;
                }
                let delay = backoff_delay(&settings, reconnect_attempts);
                trace!(?delay, attempt = reconnect_attempts, "connection manager: retrying after delay");
                tokio::time::sleep(delay).await;
                continue 'driver;
            }
        };

        resolver.mark_reachable(&endpoint).await;
        reconnect_attempts = 0;

        let codec = FrameCodec::new(settings.backpressure.low, settings.backpressure.high, settings.backpressure.max);
        let mut framed = Framed::new(stream, codec);

        // Flush stashed outbound packets in enqueue order before
        // announcing Connected, per §4.C's Connecting -> Connected
        // transition.
        while let Some(packet) = stash.pop_front() {
            if framed.send(packet.encode()).await.is_err() {
                warn!("connection manager: failed to flush stashed packet, reconnecting");
                continue 'driver;
            }
        }

        let _ = events_tx.send(ConnectionEvent::Connected);
        info!(%endpoint, "connection manager: connected");

        let mut heartbeat_interval = tokio::time::interval(settings.heartbeat_interval);
        heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut heartbeat_deadline: Option<Instant> = None;
        let mut heartbeat_correlation: Option<Uuid> = None;
        let mut shutting_down = false;

        'connected: loop {
            let heartbeat_timeout = async {
                match heartbeat_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(ConnectionCommand::Send(packet)) => {
                            if framed.send(packet.encode()).await.is_err() {
                                warn!("connection manager: write failed, entering reconnect");
                                break 'connected;
                            }
                        }
                        Some(ConnectionCommand::ForceReconnect) => {
                            info!("connection manager: forced reconnect requested, closing socket");
                            break 'connected;
                        }
                        Some(ConnectionCommand::Shutdown) | None => {
                            info!("connection manager: shutting down");
                            shutting_down = true;
                            break 'connected;
                        }
                    }
                }

                inbound = framed.next() => {
                    match inbound {
                        Some(Ok(bytes)) => {
                            match Packet::decode(bytes) {
                                Ok(packet) => match packet.message_type {
                                    MessageType::HeartbeatRequest => {
                                        let reply = Packet::new(MessageType::HeartbeatResponse, packet.correlation_id, Bytes::new());
                                        let _ = framed.send(reply.encode()).await;
                                    }
                                    MessageType::Ping => {
                                        let reply = Packet::new(MessageType::Pong, packet.correlation_id, Bytes::new());
                                        let _ = framed.send(reply.encode()).await;
                                    }
                                    MessageType::Pong | MessageType::HeartbeatResponse => {
                                        if heartbeat_correlation == Some(packet.correlation_id) {
                                            heartbeat_deadline = None;
                                            heartbeat_correlation = None;
                                        }
                                    }
                                    _ => {
                                        if inbound_tx.send(packet).await.is_err() {
                                            warn!("connection manager: dispatcher channel closed");
                                        }
                                    }
                                },
                                Err(e) => {
                                    warn!(error = %e, "connection manager: invalid frame, closing socket");
                                    break 'connected;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "connection manager: frame error, closing socket");
                            break 'connected;
                        }
                        None => {
                            warn!("connection manager: socket closed by peer");
                            break 'connected;
                        }
                    }
                }

                _ = heartbeat_interval.tick() => {
                    // Only arm a fresh heartbeat when the last one was
                    // acknowledged; otherwise the deadline would keep
                    // getting pushed out every interval tick and
                    // heartbeat_timeout would never get a chance to fire
                    // against an unresponsive peer.
                    if heartbeat_correlation.is_none() {
                        let correlation_id = Uuid::new_v4();
                        let request = Packet::new(MessageType::HeartbeatRequest, correlation_id, Bytes::new());
                        if framed.send(request.encode()).await.is_err() {
                            warn!("connection manager: heartbeat send failed, closing socket");
                            break 'connected;
                        }
                        heartbeat_correlation = Some(correlation_id);
                        heartbeat_deadline = Some(Instant::now() + settings.heartbeat_timeout);
                    }
                }

                _ = heartbeat_timeout => {
                    warn!("connection manager: heartbeat timed out, closing socket");
                    break 'connected;
                }
            }
        }

        if shutting_down {
            break 'driver;
        }
        // Socket lost without exhausting the reconnect budget: loop back
        // around to Connecting without failing in-flight operations.
    }

    debug!("connection manager: reactor task exiting");
}

fn backoff_delay(settings: &ClientSettings, attempt: u32) -> Duration {
    let multiplier = 2u32.saturating_pow(attempt.saturating_sub(1));
    let delay = settings.reconnection_delay_min.saturating_mul(multiplier);
    std::cmp::min(delay, settings.reconnection_delay_max)
}
