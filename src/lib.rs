//! `logwire` — a client for the native TCP protocol of an append-only
//! event-log database: a long-lived multiplexed connection, a
//! correlation-id dispatcher with retry/timeout, and a catch-up
//! subscription engine that pages history and then switches to live
//! push delivery without gaps or duplicates.

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod packet;
pub mod resolver;
pub mod subscription;
pub mod types;

pub use client::Client;
pub use codec::{InboundMessage, JsonPayloadCodec, OutboundMessage, PayloadCodec};
pub use config::{BackpressureSettings, ClientSettings, ReconnectionBudget};
pub use error::{ClientError, DropReason};
pub use resolver::{Endpoint, EndpointResolver, StaticEndpointResolver};
pub use subscription::{CatchUpTarget, Subscription, SubscriptionEvent};
pub use types::{
    ContentKind, Credentials, EventData, EventNumber, EventRecord, ExpectedVersion, Position, ResolvedEvent,
    StreamId,
};
