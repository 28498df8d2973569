/*
[INPUT]:  Access credentials, stream endpoint and caller commands
[OUTPUT]: A supervised streaming connection emitting typed events
[POS]:    WebSocket layer - public client and reconnection controller
[UPDATE]: When changing the public API, replay or reconnect semantics
*/

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::TickerError;
use crate::types::enums::{CloseReason, ConnectionState, Mode};
use crate::ws::backoff::ExponentialBackoff;
use crate::ws::codec::{self, PacketDecode, PriceScales, ServerMessage};
use crate::ws::dispatcher::{Dispatcher, EventKind, EventQueue, TickerEvent};
use crate::ws::registry::SubscriptionRegistry;
use crate::ws::session::{Session, SessionEvent};

const DEFAULT_STREAM_URL: &str = "wss://stream.tickfeed.io/quote";

// Fidelity the server applies to a bare subscribe; richer modes need an
// explicit mode frame, which also subscribes new tokens implicitly.
const SERVER_DEFAULT_MODE: Mode = Mode::Quote;

/// Retry pacing for the reconnection controller
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub growth_factor: f64,
    pub jitter: Duration,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            growth_factor: 2.0,
            jitter: Duration::from_millis(250),
            max_attempts: Some(10),
        }
    }
}

/// Streaming client configuration
#[derive(Debug, Clone)]
pub struct TickerConfig {
    /// API key issued with the account
    pub api_key: String,
    /// Access token produced by the session/login component
    pub access_token: String,
    /// WebSocket endpoint; credentials are appended as query parameters
    pub endpoint: String,
    /// Mode applied by `subscribe` to tokens without one
    pub default_mode: Mode,
    pub heartbeat_interval: Duration,
    /// The session is dead after `heartbeat_interval x liveness_multiple`
    /// without inbound traffic
    pub liveness_multiple: u32,
    pub reconnect: ReconnectPolicy,
    /// Bounded dispatch queue between the read loop and handlers
    pub dispatch_capacity: usize,
    /// How long an emit may wait on a full queue before dropping the event
    pub dispatch_timeout: Duration,
    pub price_scales: PriceScales,
}

impl TickerConfig {
    pub fn new(api_key: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            access_token: access_token.into(),
            ..Self::default()
        }
    }
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            access_token: String::new(),
            endpoint: DEFAULT_STREAM_URL.to_string(),
            default_mode: Mode::Quote,
            heartbeat_interval: Duration::from_secs(3),
            liveness_multiple: 3,
            reconnect: ReconnectPolicy::default(),
            dispatch_capacity: 1024,
            dispatch_timeout: Duration::from_secs(1),
            price_scales: PriceScales::default(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(Vec<u32>),
    Unsubscribe(Vec<u32>),
    SetMode(Mode, Vec<u32>),
    Stop,
}

/// Resilient streaming client.
///
/// Owns the subscription registry and a worker task that opens sessions,
/// replays subscriptions after every reconnect and paces retries with
/// exponential backoff. Callers register handlers with [`on`](Self::on),
/// then call [`connect`](Self::connect); all later interaction goes through
/// the subscription methods and [`stop`](Self::stop).
#[derive(Debug)]
pub struct TickerClient {
    config: TickerConfig,
    url: Url,
    cmd_tx: mpsc::UnboundedSender<Command>,
    cmd_rx: Option<mpsc::UnboundedReceiver<Command>>,
    dispatcher: Dispatcher,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl TickerClient {
    /// Validate the configuration and build a client.
    ///
    /// Credential and endpoint problems are reported here, synchronously;
    /// they never enter the reconnect path.
    pub fn new(config: TickerConfig) -> Result<Self, TickerError> {
        if config.heartbeat_interval.is_zero() {
            return Err(TickerError::Configuration(
                "heartbeat_interval must be greater than zero".to_string(),
            ));
        }
        let url = stream_url(&config)?;
        let (state_tx, _state_rx) = watch::channel(ConnectionState::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let dispatcher = Dispatcher::new(config.dispatch_capacity, config.dispatch_timeout);

        Ok(Self {
            config,
            url,
            cmd_tx,
            cmd_rx: Some(cmd_rx),
            dispatcher,
            state_tx,
            shutdown: CancellationToken::new(),
            worker: None,
        })
    }

    /// Register a handler for one event kind.
    ///
    /// Handlers of the same kind run in registration order, on the dispatch
    /// task, never on the read loop.
    pub fn on<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&TickerEvent) + Send + Sync + 'static,
    {
        self.dispatcher.on(kind, Arc::new(handler));
    }

    /// Observe connection lifecycle transitions
    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Events dropped because handlers kept the dispatch queue full
    pub fn dropped_events(&self) -> u64 {
        self.dispatcher.dropped_events()
    }

    /// Start the worker task. Requires a running Tokio runtime.
    pub fn connect(&mut self) -> Result<(), TickerError> {
        if self.shutdown.is_cancelled() {
            return Err(TickerError::Closed);
        }
        let Some(cmd_rx) = self.cmd_rx.take() else {
            return Err(TickerError::Configuration(
                "client is already connected".to_string(),
            ));
        };
        if Handle::try_current().is_err() {
            self.cmd_rx = Some(cmd_rx);
            return Err(TickerError::Configuration(
                "connect requires a running Tokio runtime".to_string(),
            ));
        }

        self.dispatcher.start();

        let worker = ControllerWorker {
            config: self.config.clone(),
            url: self.url.clone(),
            registry: SubscriptionRegistry::new(self.config.default_mode),
            cmd_rx,
            events: self.dispatcher.queue(),
            state_tx: self.state_tx.clone(),
            shutdown: self.shutdown.clone(),
        };
        self.worker = Some(tokio::spawn(worker.run()));
        Ok(())
    }

    /// Stop the client, cancelling any in-flight handshake or backoff wait.
    ///
    /// Transitions to `Closed` and produces no new events afterwards; a
    /// clean close event is emitted if a session was open. Events already
    /// sitting in the dispatch queue still drain to handlers.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        let _ = self.cmd_tx.send(Command::Stop);
        if let Some(worker) = self.worker.take()
            && worker.await.is_err()
        {
            debug!("worker task ended abnormally");
        }
        let _ = self.state_tx.send(ConnectionState::Closed);
    }

    /// Subscribe tokens at the default mode.
    ///
    /// Recorded immediately; sent on the live session if one exists and
    /// replayed on every later reconnect.
    pub fn subscribe(&self, tokens: &[u32]) -> Result<(), TickerError> {
        validate_tokens(tokens)?;
        self.send_command(Command::Subscribe(tokens.to_vec()))
    }

    /// Remove tokens from the stream and the registry
    pub fn unsubscribe(&self, tokens: &[u32]) -> Result<(), TickerError> {
        validate_tokens(tokens)?;
        self.send_command(Command::Unsubscribe(tokens.to_vec()))
    }

    /// Set the fidelity for tokens, subscribing new ones implicitly
    pub fn set_mode(&self, mode: Mode, tokens: &[u32]) -> Result<(), TickerError> {
        validate_tokens(tokens)?;
        self.send_command(Command::SetMode(mode, tokens.to_vec()))
    }

    fn send_command(&self, command: Command) -> Result<(), TickerError> {
        if self.shutdown.is_cancelled() {
            return Err(TickerError::Closed);
        }
        self.cmd_tx.send(command).map_err(|_| TickerError::Closed)
    }
}

impl Drop for TickerClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn stream_url(config: &TickerConfig) -> Result<Url, TickerError> {
    if config.api_key.trim().is_empty() {
        return Err(TickerError::Configuration(
            "api_key must not be empty".to_string(),
        ));
    }
    if config.access_token.trim().is_empty() {
        return Err(TickerError::Configuration(
            "access_token must not be empty".to_string(),
        ));
    }
    let mut url = Url::parse(&config.endpoint)?;
    if !matches!(url.scheme(), "ws" | "wss") {
        return Err(TickerError::Configuration(format!(
            "endpoint scheme must be ws or wss, got {}",
            url.scheme()
        )));
    }
    url.query_pairs_mut()
        .append_pair("api_key", &config.api_key)
        .append_pair("access_token", &config.access_token);
    Ok(url)
}

fn validate_tokens(tokens: &[u32]) -> Result<(), TickerError> {
    if tokens.is_empty() {
        return Err(TickerError::Configuration(
            "no instrument tokens provided".to_string(),
        ));
    }
    if tokens.contains(&0) {
        return Err(TickerError::Configuration(
            "instrument token 0 is not a valid token".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamExit {
    Stop,
    Closed(CloseReason),
}

struct ControllerWorker {
    config: TickerConfig,
    url: Url,
    registry: SubscriptionRegistry,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    events: EventQueue,
    state_tx: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl ControllerWorker {
    async fn run(mut self) {
        let policy = self.config.reconnect.clone();
        let mut backoff = ExponentialBackoff::new(
            policy.base_delay,
            policy.max_delay,
            policy.growth_factor,
            policy.jitter,
        );
        debug!("ticker worker started");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            let connected = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = Session::connect(
                    &self.url,
                    self.config.heartbeat_interval,
                    self.liveness_timeout(),
                ) => result,
            };

            match connected {
                Ok(mut session) => {
                    backoff.reset();
                    self.set_state(ConnectionState::Connected);
                    info!("stream connected");
                    self.events.emit(TickerEvent::Connected).await;
                    self.replay_subscriptions(&session);

                    match self.stream_loop(&mut session).await {
                        StreamExit::Stop => {
                            session.close().await;
                            self.events.emit(TickerEvent::Closed(CloseReason::Clean)).await;
                            break;
                        }
                        StreamExit::Closed(reason) => {
                            warn!(%reason, "stream closed");
                            drop(session);
                            self.events.emit(TickerEvent::Closed(reason)).await;
                            if reason == CloseReason::Clean {
                                break;
                            }
                            if !self.wait_before_retry(&mut backoff).await {
                                break;
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(error = %err, "stream connect failed");
                    self.events.emit(TickerEvent::Error(err)).await;
                    self.events.emit(TickerEvent::Closed(CloseReason::Error)).await;
                    if !self.wait_before_retry(&mut backoff).await {
                        break;
                    }
                }
            }
        }

        self.set_state(ConnectionState::Closed);
        debug!("ticker worker stopped");
    }

    /// Connected phase: caller commands and session events race here.
    ///
    /// Registry mutations happen on this task only, so they can never be
    /// lost to a concurrent session swap.
    async fn stream_loop(&mut self, session: &mut Session) -> StreamExit {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return StreamExit::Stop,
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Subscribe(tokens)) => {
                        self.registry.subscribe(&tokens);
                        let frame = if self.config.default_mode == SERVER_DEFAULT_MODE {
                            codec::encode_subscribe(&tokens)
                        } else {
                            codec::encode_set_mode(self.config.default_mode, &tokens)
                        };
                        self.send_frame(session, frame);
                    }
                    Some(Command::SetMode(mode, tokens)) => {
                        self.registry.set_mode(mode, &tokens);
                        self.send_frame(session, codec::encode_set_mode(mode, &tokens));
                    }
                    Some(Command::Unsubscribe(tokens)) => {
                        self.registry.unsubscribe(&tokens);
                        self.send_frame(session, codec::encode_unsubscribe(&tokens));
                    }
                    Some(Command::Stop) | None => return StreamExit::Stop,
                },
                event = session.next_event() => match event {
                    SessionEvent::Binary(frame) => self.handle_binary(&frame).await,
                    SessionEvent::Text(text) => self.handle_text(text.as_str()).await,
                    SessionEvent::Closed(reason) => return StreamExit::Closed(reason),
                },
            }
        }
    }

    /// Backoff phase. Returns false when the worker should stop.
    ///
    /// Commands arriving mid-wait still mutate the registry so the next
    /// session replays them.
    async fn wait_before_retry(&mut self, backoff: &mut ExponentialBackoff) -> bool {
        let attempt = backoff.attempt() + 1;
        if let Some(max_attempts) = self.config.reconnect.max_attempts
            && attempt > max_attempts
        {
            warn!(max_attempts, "reconnect attempts exhausted; closing");
            self.events
                .emit(TickerEvent::Error(TickerError::RetriesExhausted {
                    attempts: max_attempts,
                }))
                .await;
            return false;
        }

        let delay = backoff.next_delay();
        self.set_state(ConnectionState::Reconnecting { attempt });
        self.events
            .emit(TickerEvent::Reconnecting { attempt })
            .await;
        info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");

        let wait = tokio::time::sleep(delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return false,
                _ = &mut wait => return true,
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Subscribe(tokens)) => self.registry.subscribe(&tokens),
                    Some(Command::SetMode(mode, tokens)) => self.registry.set_mode(mode, &tokens),
                    Some(Command::Unsubscribe(tokens)) => self.registry.unsubscribe(&tokens),
                    Some(Command::Stop) | None => return false,
                },
            }
        }
    }

    /// Replay every registry entry onto a fresh session, one frame per mode
    fn replay_subscriptions(&self, session: &Session) {
        let snapshot = self.registry.snapshot_by_mode();
        for (mode, tokens) in &snapshot {
            debug!(%mode, count = tokens.len(), "replaying subscriptions");
            let frame = if *mode == SERVER_DEFAULT_MODE {
                codec::encode_subscribe(tokens)
            } else {
                codec::encode_set_mode(*mode, tokens)
            };
            self.send_frame(session, frame);
        }
    }

    fn send_frame(&self, session: &Session, frame: String) {
        if session.send(frame).is_err() {
            // the session's close event is already on its way
            debug!("control frame not sent; session is closing");
        }
    }

    async fn handle_binary(&self, frame: &[u8]) {
        match codec::decode_ticks(frame, &self.config.price_scales) {
            Ok(packets) => {
                let partial = packets.iter().filter(|p| p.is_partial()).count();
                if partial > 0 {
                    debug!(partial, "packets with unrecognized layout; last price only");
                    self.events
                        .emit(TickerEvent::Error(TickerError::Decode(
                            codec::DecodeError::UnknownLayout { count: partial },
                        )))
                        .await;
                }
                let ticks: Vec<_> = packets
                    .into_iter()
                    .map(PacketDecode::into_tick)
                    .collect();
                if !ticks.is_empty() {
                    self.events.emit(TickerEvent::Ticks(ticks)).await;
                }
            }
            Err(err) => {
                warn!(error = %err, bytes = frame.len(), "dropping undecodable frame");
                self.events
                    .emit(TickerEvent::Error(TickerError::Decode(err)))
                    .await;
            }
        }
    }

    async fn handle_text(&self, raw: &str) {
        match codec::decode_text(raw) {
            Ok(ServerMessage::Order(update)) => {
                self.events.emit(TickerEvent::OrderUpdate(update)).await;
            }
            Ok(ServerMessage::Error(message)) => {
                warn!(%message, "server reported an error");
                self.events
                    .emit(TickerEvent::Error(TickerError::Server { message }))
                    .await;
            }
            Ok(ServerMessage::Message(value)) => {
                debug!(%value, "server broadcast");
            }
            Ok(ServerMessage::Other) => {
                debug!(bytes = raw.len(), "unrecognized text frame");
            }
            Err(err) => {
                debug!(error = %err, "text frame parse failed");
                self.events
                    .emit(TickerEvent::Error(TickerError::Serialization(err)))
                    .await;
            }
        }
    }

    fn liveness_timeout(&self) -> Duration {
        self.config.heartbeat_interval * self.config.liveness_multiple.max(1)
    }

    fn set_state(&self, state: ConnectionState) {
        let _ = self.state_tx.send(state);
    }
}
