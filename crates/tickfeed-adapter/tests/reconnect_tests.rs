/*
[INPUT]:  Live client scenarios against an in-process WebSocket server
[OUTPUT]: Reconnection, replay and shutdown behavior verification
[POS]:    Integration test layer - network resilience
[UPDATE]: When changing reconnection, replay or shutdown logic
*/

mod common;

use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use tickfeed_adapter::{
    CloseReason, ConnectionState, EventKind, Mode, OrderUpdate, Tick, TickerClient, TickerEvent,
};

const WAIT: Duration = Duration::from_secs(5);

fn tick_channel(client: &TickerClient) -> mpsc::UnboundedReceiver<Vec<Tick>> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(EventKind::Tick, move |event| {
        if let TickerEvent::Ticks(ticks) = event {
            let _ = tx.send(ticks.clone());
        }
    });
    rx
}

fn connect_channel(client: &TickerClient) -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(EventKind::Connect, move |_| {
        let _ = tx.send(());
    });
    rx
}

fn close_channel(client: &TickerClient) -> mpsc::UnboundedReceiver<CloseReason> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(EventKind::Close, move |event| {
        if let TickerEvent::Closed(reason) = event {
            let _ = tx.send(*reason);
        }
    });
    rx
}

fn error_channel(client: &TickerClient) -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(EventKind::Error, move |event| {
        if let TickerEvent::Error(err) = event {
            let _ = tx.send(err.to_string());
        }
    });
    rx
}

fn reconnect_channel(client: &TickerClient) -> mpsc::UnboundedReceiver<u32> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(EventKind::Reconnect, move |event| {
        if let TickerEvent::Reconnecting { attempt } = event {
            let _ = tx.send(*attempt);
        }
    });
    rx
}

fn order_channel(client: &TickerClient) -> mpsc::UnboundedReceiver<OrderUpdate> {
    let (tx, rx) = mpsc::unbounded_channel();
    client.on(EventKind::OrderUpdate, move |event| {
        if let TickerEvent::OrderUpdate(update) = event {
            let _ = tx.send(update.clone());
        }
    });
    rx
}

#[tokio::test]
async fn subscribe_reaches_the_session_and_ticks_flow_back() {
    let (listener, url) = common::start_server().await;
    let mut client = TickerClient::new(common::test_config(&url)).unwrap();
    let mut connects = connect_channel(&client);
    let mut ticks = tick_channel(&client);

    client.subscribe(&[100, 200]).unwrap();
    client.connect().unwrap();

    let mut server = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    let control: Value = serde_json::from_str(&common::next_text(&mut server).await).unwrap();
    assert_eq!(control["a"], "subscribe");
    assert_eq!(control["v"], json!([100, 200]));

    let frame = common::frame(&[common::ltp_body(12345, 1_505_000)]);
    futures_util::SinkExt::send(&mut server, Message::Binary(frame.into()))
        .await
        .unwrap();

    let batch = timeout(WAIT, ticks.recv()).await.unwrap().unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].token, 12345);
    assert_eq!(batch[0].last_price.to_string(), "15050.00");

    client.stop().await;
}

#[tokio::test]
async fn registry_replays_on_the_next_session_after_a_drop() {
    let (listener, url) = common::start_server().await;
    let mut client = TickerClient::new(common::test_config(&url)).unwrap();
    let mut connects = connect_channel(&client);

    client.subscribe(&[100, 200]).unwrap();
    client.connect().unwrap();

    let mut first_session = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();
    let control: Value =
        serde_json::from_str(&common::next_text(&mut first_session).await).unwrap();
    assert_eq!(control["a"], "subscribe");

    drop(first_session);

    let mut second_session = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    let replay: Value =
        serde_json::from_str(&common::next_text(&mut second_session).await).unwrap();
    assert_eq!(replay["a"], "subscribe");
    assert_eq!(replay["v"], json!([100, 200]));

    client.stop().await;
}

#[tokio::test]
async fn replay_sends_one_frame_per_mode_group() {
    let (listener, url) = common::start_server().await;
    let mut client = TickerClient::new(common::test_config(&url)).unwrap();
    let mut connects = connect_channel(&client);

    client.subscribe(&[100]).unwrap();
    client.set_mode(Mode::Full, &[300]).unwrap();
    client.connect().unwrap();

    let mut first_session = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();
    // live commands, in caller order
    common::next_text(&mut first_session).await;
    common::next_text(&mut first_session).await;

    drop(first_session);

    let mut second_session = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    // replay groups by mode: quote tokens as a subscribe, full tokens as a mode frame
    let quote_group: Value =
        serde_json::from_str(&common::next_text(&mut second_session).await).unwrap();
    assert_eq!(quote_group["a"], "subscribe");
    assert_eq!(quote_group["v"], json!([100]));

    let full_group: Value =
        serde_json::from_str(&common::next_text(&mut second_session).await).unwrap();
    assert_eq!(full_group["a"], "mode");
    assert_eq!(full_group["v"], json!(["full", [300]]));

    client.stop().await;
}

#[tokio::test]
async fn subscription_made_during_backoff_replays_on_the_next_session() {
    let (listener, url) = common::start_server().await;
    let mut config = common::test_config(&url);
    config.reconnect.base_delay = Duration::from_millis(300);
    let mut client = TickerClient::new(config).unwrap();
    let mut connects = connect_channel(&client);
    let mut closes = close_channel(&client);

    client.connect().unwrap();
    let first_session = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    drop(first_session);
    timeout(WAIT, closes.recv()).await.unwrap().unwrap();

    // the reconnect gap: mutation must be recorded and replayed
    client.subscribe(&[700]).unwrap();

    let mut second_session = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    let replay: Value =
        serde_json::from_str(&common::next_text(&mut second_session).await).unwrap();
    assert_eq!(replay["a"], "subscribe");
    assert_eq!(replay["v"], json!([700]));

    client.stop().await;
}

#[tokio::test]
async fn stop_during_backoff_prevents_any_further_connect() {
    let (listener, url) = common::start_server().await;
    let mut config = common::test_config(&url);
    config.reconnect.base_delay = Duration::from_secs(5);
    let mut client = TickerClient::new(config).unwrap();
    let mut connects = connect_channel(&client);
    let mut closes = close_channel(&client);

    client.connect().unwrap();
    let first_session = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    drop(first_session);
    let reason = timeout(WAIT, closes.recv()).await.unwrap().unwrap();
    assert_eq!(reason, CloseReason::Error);

    // the worker now sits in its backoff wait; stop must cancel it
    client.stop().await;

    assert!(
        timeout(Duration::from_millis(300), listener.accept())
            .await
            .is_err(),
        "no reconnection attempt may follow stop()"
    );
    assert!(
        timeout(Duration::from_millis(200), connects.recv())
            .await
            .is_err(),
        "no connect event may follow stop()"
    );
    assert_eq!(*client.connection_state().borrow(), ConnectionState::Closed);
}

#[tokio::test]
async fn silent_connection_closes_with_timeout_reason() {
    let (listener, url) = common::start_server().await;
    let mut config = common::test_config(&url);
    config.heartbeat_interval = Duration::from_millis(50);
    config.liveness_multiple = 2;
    let mut client = TickerClient::new(config).unwrap();
    let mut closes = close_channel(&client);

    client.connect().unwrap();
    // hold the socket but never read or write: pongs never come back
    let first_session = common::accept_client(&listener).await;

    let reason = timeout(WAIT, closes.recv()).await.unwrap().unwrap();
    assert_eq!(reason, CloseReason::Timeout);

    drop(first_session);
    client.stop().await;
}

#[tokio::test]
async fn failed_connects_back_off_with_rising_attempts_then_give_up() {
    let (listener, url) = common::start_server().await;
    drop(listener); // connection refused from now on
    let mut config = common::test_config(&url);
    config.reconnect.max_attempts = Some(3);
    let mut client = TickerClient::new(config).unwrap();
    let mut reconnects = reconnect_channel(&client);
    let mut errors = error_channel(&client);

    client.connect().unwrap();

    for expected in 1..=3u32 {
        let attempt = timeout(WAIT, reconnects.recv()).await.unwrap().unwrap();
        assert_eq!(attempt, expected);
    }

    // terminal error after the ceiling
    let gave_up = timeout(WAIT, async {
        loop {
            let message = errors.recv().await.expect("error stream open");
            if message.contains("gave up reconnecting") {
                return message;
            }
        }
    })
    .await
    .unwrap();
    assert!(gave_up.contains('3'));

    let mut state_rx = client.connection_state();
    timeout(WAIT, async {
        while *state_rx.borrow() != ConnectionState::Closed {
            state_rx.changed().await.expect("state channel open");
        }
    })
    .await
    .unwrap();

    client.stop().await;
}

#[tokio::test]
async fn server_text_frames_surface_as_events() {
    let (listener, url) = common::start_server().await;
    let mut client = TickerClient::new(common::test_config(&url)).unwrap();
    let mut connects = connect_channel(&client);
    let mut orders = order_channel(&client);
    let mut errors = error_channel(&client);

    client.connect().unwrap();
    let mut server = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    let order = json!({
        "type": "order",
        "data": { "order_id": "230101000000001", "status": "COMPLETE", "symbol": "INFY" }
    });
    futures_util::SinkExt::send(&mut server, Message::Text(order.to_string().into()))
        .await
        .unwrap();

    let update = timeout(WAIT, orders.recv()).await.unwrap().unwrap();
    assert_eq!(update.order_id, "230101000000001");
    assert_eq!(update.status, "COMPLETE");

    let error = json!({ "type": "error", "data": "session expired" });
    futures_util::SinkExt::send(&mut server, Message::Text(error.to_string().into()))
        .await
        .unwrap();

    let message = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(message.contains("session expired"));

    client.stop().await;
}

#[tokio::test]
async fn unknown_packet_layout_yields_partial_tick_and_error_event() {
    let (listener, url) = common::start_server().await;
    let mut client = TickerClient::new(common::test_config(&url)).unwrap();
    let mut connects = connect_channel(&client);
    let mut ticks = tick_channel(&client);
    let mut errors = error_channel(&client);

    client.connect().unwrap();
    let mut server = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    let mut body = common::ltp_body(501, 220_000);
    body.resize(21, 0); // no layout has 21 bytes
    let frame = common::frame(&[body]);
    futures_util::SinkExt::send(&mut server, Message::Binary(frame.into()))
        .await
        .unwrap();

    let message = timeout(WAIT, errors.recv()).await.unwrap().unwrap();
    assert!(message.contains("unrecognized layout"));

    let batch = timeout(WAIT, ticks.recv()).await.unwrap().unwrap();
    assert_eq!(batch[0].token, 501);
    assert_eq!(batch[0].last_price.to_string(), "2200.00");

    client.stop().await;
}

#[tokio::test]
async fn clean_stop_sends_a_close_frame() {
    let (listener, url) = common::start_server().await;
    let mut client = TickerClient::new(common::test_config(&url)).unwrap();
    let mut connects = connect_channel(&client);
    let mut closes = close_channel(&client);

    client.connect().unwrap();
    let mut server = common::accept_client(&listener).await;
    timeout(WAIT, connects.recv()).await.unwrap().unwrap();

    client.stop().await;

    let saw_close = timeout(WAIT, async {
        loop {
            match server.next().await {
                Some(Ok(Message::Close(_))) | None => return true,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return false,
            }
        }
    })
    .await
    .unwrap();
    assert!(saw_close, "server should observe a close frame");

    let reason = timeout(WAIT, closes.recv()).await.unwrap().unwrap();
    assert_eq!(reason, CloseReason::Clean);
}
