/*
[INPUT]:  WebSocket configuration, subscriptions and wire frames
[OUTPUT]: Real-time tick stream with reconnect and event dispatch
[POS]:    WebSocket layer - streaming client and its parts
[UPDATE]: When adding modules or changing the streaming surface
*/

pub mod codec;
pub mod dispatcher;
pub mod registry;

pub(crate) mod backoff;
pub(crate) mod session;

pub mod client;

pub use client::{ReconnectPolicy, TickerClient, TickerConfig};
pub use codec::{DecodeError, PacketDecode, PriceScales, ServerMessage};
pub use dispatcher::{EventKind, TickerEvent};
pub use registry::SubscriptionRegistry;
