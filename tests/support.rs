//! Shared helpers for the integration tests below: a raw-socket
//! packet reader/writer speaking the exact wire envelope from spec §6,
//! standing in for a real server the way `hooteproto`'s
//! `tests/client_concurrency.rs` mock ROUTER stands in for a ZMQ peer.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use logwire::{Client, ClientSettings, JsonPayloadCodec, StaticEndpointResolver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use logwire::packet::Packet;

static NEXT_PORT: AtomicU16 = AtomicU16::new(19_200);

pub async fn bind_listener() -> (TcpListener, String, u16) {
    let port = NEXT_PORT.fetch_add(1, Ordering::SeqCst);
    let listener = TcpListener::bind(("127.0.0.1", port)).await.expect("bind mock server");
    (listener, "127.0.0.1".to_string(), port)
}

pub async fn read_packet(stream: &mut TcpStream) -> Packet {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.expect("read length prefix");
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.expect("read packet body");
    Packet::decode(body.into()).expect("decode packet")
}

pub async fn write_packet(stream: &mut TcpStream, packet: &Packet) {
    let encoded = packet.encode();
    stream.write_u32_le(encoded.len() as u32).await.expect("write length prefix");
    stream.write_all(&encoded).await.expect("write packet body");
}

pub async fn connect_client(host: &str, port: u16) -> Arc<Client> {
    connect_client_with(ClientSettings::new(host, port)).await
}

pub async fn connect_client_with(settings: ClientSettings) -> Arc<Client> {
    let resolver = Arc::new(StaticEndpointResolver::new(settings.host.clone(), settings.port));
    Client::connect(settings, resolver, Arc::new(JsonPayloadCodec)).await
}
