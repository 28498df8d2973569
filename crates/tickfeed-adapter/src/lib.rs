/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public tickfeed adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod error;
pub mod types;
pub mod ws;

// Re-export commonly used types from error
pub use error::{Result, TickerError};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    DecodeError,
    EventKind,
    PacketDecode,
    PriceScales,
    ReconnectPolicy,
    ServerMessage,
    SubscriptionRegistry,
    TickerClient,
    TickerConfig,
    TickerEvent,
};
