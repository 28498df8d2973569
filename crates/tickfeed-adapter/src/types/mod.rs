/*
[INPUT]:  Wire schema and API surface requirements
[OUTPUT]: Public domain types for the streaming client
[POS]:    Data layer - type definitions shared across the crate
[UPDATE]: When the wire schema or public surface changes
*/

pub mod enums;
pub mod models;

pub use enums::{CloseReason, ConnectionState, Mode};
pub use models::{DepthLevel, MarketDepth, Ohlc, OrderUpdate, Tick};
