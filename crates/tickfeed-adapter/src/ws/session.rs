/*
[INPUT]:  Handshake URL, heartbeat settings and outbound control frames
[OUTPUT]: Typed session events (binary ticks, text messages, close reason)
[POS]:    WebSocket layer - one physical connection and its liveness
[UPDATE]: When changing handshake, heartbeat or close semantics
*/

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{Bytes, Error as WsError, Message, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};
use url::Url;

use crate::error::TickerError;
use crate::types::enums::CloseReason;

const EVENT_BUFFER: usize = 128;
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWriter = SplitSink<WsStream, Message>;
type SocketReader = SplitStream<WsStream>;

/// What the socket task reports up to the controller
#[derive(Debug)]
pub(crate) enum SessionEvent {
    /// A binary tick frame (server heartbeats are filtered out)
    Binary(Bytes),
    /// A JSON text frame
    Text(Utf8Bytes),
    /// The session ended; always the last event of a session
    Closed(CloseReason),
}

/// One physical WebSocket connection.
///
/// The socket lives on its own task that multiplexes outbound control
/// frames, inbound frames and the heartbeat timer. Events arrive through
/// `next_event` strictly in receive order, so a tick can never outlive its
/// session's close notification.
#[derive(Debug)]
pub(crate) struct Session {
    outbound_tx: mpsc::UnboundedSender<Message>,
    event_rx: mpsc::Receiver<SessionEvent>,
    task: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Perform the handshake and start the socket task.
    ///
    /// An HTTP rejection of the upgrade is reported as an authentication
    /// error so callers can stop retrying and refresh their token.
    pub async fn connect(
        url: &Url,
        heartbeat_interval: Duration,
        liveness_timeout: Duration,
    ) -> Result<Self, TickerError> {
        let (stream, _response) = connect_async(url.as_str())
            .await
            .map_err(handshake_error)?;
        debug!("websocket handshake complete");

        let (writer, reader) = stream.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);

        let task = tokio::spawn(run_socket(
            writer,
            reader,
            outbound_rx,
            event_tx,
            heartbeat_interval,
            liveness_timeout,
        ));

        Ok(Self {
            outbound_tx,
            event_rx,
            task,
        })
    }

    /// Queue a text control frame for sending
    pub fn send(&self, payload: String) -> Result<(), TickerError> {
        self.outbound_tx
            .send(Message::Text(payload.into()))
            .map_err(|_| TickerError::Closed)
    }

    /// Next event, in receive order. `Closed` is final.
    pub async fn next_event(&mut self) -> SessionEvent {
        self.event_rx
            .recv()
            .await
            .unwrap_or(SessionEvent::Closed(CloseReason::Error))
    }

    /// Caller-initiated close: send a close frame and wait for the socket
    /// task to flush it
    pub async fn close(mut self) {
        let _ = self.outbound_tx.send(Message::Close(None));
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn handshake_error(err: WsError) -> TickerError {
    match err {
        WsError::Http(response) => {
            let status = response.status();
            if status.is_client_error() {
                TickerError::Authentication {
                    status: status.as_u16(),
                    message: status
                        .canonical_reason()
                        .unwrap_or("handshake rejected")
                        .to_string(),
                }
            } else {
                TickerError::Transport(WsError::Http(response))
            }
        }
        other => TickerError::Transport(other),
    }
}

async fn run_socket(
    mut writer: SocketWriter,
    mut reader: SocketReader,
    mut outbound_rx: mpsc::UnboundedReceiver<Message>,
    event_tx: mpsc::Sender<SessionEvent>,
    heartbeat_interval: Duration,
    liveness_timeout: Duration,
) {
    let mut ping_timer = tokio::time::interval(heartbeat_interval);
    ping_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_inbound = Instant::now();

    let reason = loop {
        tokio::select! {
            outbound = outbound_rx.recv() => match outbound {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(err) = writer.send(message).await {
                        warn!(error = %err, "websocket send failed");
                        break CloseReason::Error;
                    }
                    if closing {
                        break CloseReason::Clean;
                    }
                }
                None => {
                    let _ = writer.send(Message::Close(None)).await;
                    break CloseReason::Clean;
                }
            },
            _ = ping_timer.tick() => {
                if last_inbound.elapsed() >= liveness_timeout {
                    warn!(
                        silent_ms = last_inbound.elapsed().as_millis() as u64,
                        "no inbound traffic within the liveness window"
                    );
                    break CloseReason::Timeout;
                }
                if writer.send(Message::Ping(Bytes::new())).await.is_err() {
                    break CloseReason::Error;
                }
            },
            incoming = reader.next() => match incoming {
                Some(Ok(Message::Binary(payload))) => {
                    last_inbound = Instant::now();
                    // frames without a packet-count header are server heartbeats
                    if payload.len() >= 2
                        && event_tx.send(SessionEvent::Binary(payload)).await.is_err()
                    {
                        break CloseReason::Clean;
                    }
                }
                Some(Ok(Message::Text(payload))) => {
                    last_inbound = Instant::now();
                    if event_tx.send(SessionEvent::Text(payload)).await.is_err() {
                        break CloseReason::Clean;
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    last_inbound = Instant::now();
                    let _ = writer.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Pong(_))) => {
                    last_inbound = Instant::now();
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "server closed the connection");
                    break CloseReason::Error;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(error = %err, "websocket read failed");
                    break CloseReason::Error;
                }
                None => {
                    debug!("websocket stream ended");
                    break CloseReason::Error;
                }
            },
        }
    };

    let _ = event_tx.send(SessionEvent::Closed(reason)).await;
}
