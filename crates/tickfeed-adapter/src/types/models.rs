/*
[INPUT]:  Decoded wire fields and order-update payloads
[OUTPUT]: Structured tick and order records for caller consumption
[POS]:    Data layer - records produced by the stream
[UPDATE]: When the wire layouts gain fields or payloads change shape
*/

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::enums::Mode;

/// One market-data update for a single instrument.
///
/// Field presence follows the wire layout the packet arrived in: an LTP
/// packet fills only `token` and `last_price`, a quote packet adds the
/// traded-quantity and OHLC block, and a full packet adds timestamps, open
/// interest and (when the server sends it) five-level depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub token: u32,
    pub mode: Mode,
    pub last_price: Decimal,
    pub last_quantity: Option<u32>,
    pub average_price: Option<Decimal>,
    pub volume: Option<u32>,
    pub buy_quantity: Option<u32>,
    pub sell_quantity: Option<u32>,
    pub ohlc: Option<Ohlc>,
    /// Percent change of `last_price` against the previous close
    pub change_percent: Option<Decimal>,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub open_interest: Option<u32>,
    pub oi_day_high: Option<u32>,
    pub oi_day_low: Option<u32>,
    pub exchange_time: Option<DateTime<Utc>>,
    pub depth: Option<MarketDepth>,
}

impl Tick {
    /// A record holding only the fields every layout starts with
    pub fn ltp(token: u32, last_price: Decimal) -> Self {
        Self {
            token,
            mode: Mode::Ltp,
            last_price,
            last_quantity: None,
            average_price: None,
            volume: None,
            buy_quantity: None,
            sell_quantity: None,
            ohlc: None,
            change_percent: None,
            last_trade_time: None,
            open_interest: None,
            oi_day_high: None,
            oi_day_low: None,
            exchange_time: None,
            depth: None,
        }
    }
}

/// Session open/high/low and previous close
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ohlc {
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
}

/// One price level of the order book
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Decimal,
    pub quantity: u32,
    pub orders: u16,
}

/// Best bid/ask levels, five per side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketDepth {
    pub buy: Vec<DepthLevel>,
    pub sell: Vec<DepthLevel>,
}

/// Order lifecycle update pushed over the stream.
///
/// Venues attach extra fields freely; anything not modelled lands in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdate {
    #[serde(default)]
    pub order_id: String,
    #[serde(default)]
    pub exchange_order_id: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub transaction_type: String,
    #[serde(default)]
    pub quantity: u64,
    #[serde(default)]
    pub filled_quantity: u64,
    #[serde(default)]
    pub average_price: Decimal,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
