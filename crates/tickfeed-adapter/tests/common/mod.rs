/*
[INPUT]:  Test configuration and mock server requirements
[OUTPUT]: Shared fixtures, wire builders and an in-process server
[POS]:    Test infrastructure - shared across all test modules
[UPDATE]: When adding new test patterns or fixtures
*/

//! Common test utilities for tickfeed-adapter tests

#![allow(dead_code)]

use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};

use tickfeed_adapter::{ReconnectPolicy, TickerConfig};

/// Bind an in-process WebSocket server on an ephemeral port
pub async fn start_server() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let url = format!("ws://{}", listener.local_addr().expect("local addr"));
    (listener, url)
}

/// Accept the next client connection and finish the WebSocket handshake
pub async fn accept_client(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept");
    accept_async(stream).await.expect("handshake")
}

/// Next text frame from the client, skipping pings and pongs
pub async fn next_text(server: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        match server.next().await {
            Some(Ok(Message::Text(text))) => return text.to_string(),
            Some(Ok(_)) => continue,
            other => panic!("client stream ended while waiting for text: {other:?}"),
        }
    }
}

/// Fast-paced client config pointed at the mock server
pub fn test_config(endpoint: &str) -> TickerConfig {
    let mut config = TickerConfig::new("test-key", "test-token");
    config.endpoint = endpoint.to_string();
    config.heartbeat_interval = Duration::from_millis(200);
    config.liveness_multiple = 100; // watchdog effectively disabled
    config.reconnect = ReconnectPolicy {
        base_delay: Duration::from_millis(50),
        max_delay: Duration::from_millis(200),
        growth_factor: 2.0,
        jitter: Duration::ZERO,
        max_attempts: Some(20),
    };
    config
}

/// Assemble a binary frame from packet bodies
pub fn frame(bodies: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(bodies.len() as u16).to_be_bytes());
    for body in bodies {
        out.extend_from_slice(&(body.len() as u16).to_be_bytes());
        out.extend_from_slice(body);
    }
    out
}

/// 8-byte last-price-only packet body
pub fn ltp_body(token: u32, last_price: i32) -> Vec<u8> {
    let mut body = Vec::with_capacity(8);
    body.extend_from_slice(&token.to_be_bytes());
    body.extend_from_slice(&last_price.to_be_bytes());
    body
}

/// 44-byte quote packet body
#[allow(clippy::too_many_arguments)]
pub fn quote_body(
    token: u32,
    last_price: i32,
    last_quantity: u32,
    average_price: i32,
    volume: u32,
    buy_quantity: u32,
    sell_quantity: u32,
    ohlc: [i32; 4],
) -> Vec<u8> {
    let mut body = ltp_body(token, last_price);
    body.extend_from_slice(&last_quantity.to_be_bytes());
    body.extend_from_slice(&average_price.to_be_bytes());
    body.extend_from_slice(&volume.to_be_bytes());
    body.extend_from_slice(&buy_quantity.to_be_bytes());
    body.extend_from_slice(&sell_quantity.to_be_bytes());
    for value in ohlc {
        body.extend_from_slice(&value.to_be_bytes());
    }
    debug_assert_eq!(body.len(), 44);
    body
}

/// 64-byte full packet body (no depth)
#[allow(clippy::too_many_arguments)]
pub fn full_body(
    token: u32,
    last_price: i32,
    last_quantity: u32,
    average_price: i32,
    volume: u32,
    buy_quantity: u32,
    sell_quantity: u32,
    ohlc: [i32; 4],
    last_trade_time: u32,
    open_interest: u32,
    oi_day_high: u32,
    oi_day_low: u32,
    exchange_time: u32,
) -> Vec<u8> {
    let mut body = quote_body(
        token,
        last_price,
        last_quantity,
        average_price,
        volume,
        buy_quantity,
        sell_quantity,
        ohlc,
    );
    body.extend_from_slice(&last_trade_time.to_be_bytes());
    body.extend_from_slice(&open_interest.to_be_bytes());
    body.extend_from_slice(&oi_day_high.to_be_bytes());
    body.extend_from_slice(&oi_day_low.to_be_bytes());
    body.extend_from_slice(&exchange_time.to_be_bytes());
    debug_assert_eq!(body.len(), 64);
    body
}

/// 184-byte full packet body with five depth levels per side.
///
/// `levels` is (quantity, price, orders), buys first.
pub fn full_depth_body(full: Vec<u8>, levels: &[(u32, i32, u16)]) -> Vec<u8> {
    assert_eq!(full.len(), 64, "depth extends a 64-byte full body");
    assert_eq!(levels.len(), 10, "five levels per side");
    let mut body = full;
    for &(quantity, price, orders) in levels {
        body.extend_from_slice(&quantity.to_be_bytes());
        body.extend_from_slice(&price.to_be_bytes());
        body.extend_from_slice(&orders.to_be_bytes());
        body.extend_from_slice(&[0u8; 2]);
    }
    debug_assert_eq!(body.len(), 184);
    body
}
