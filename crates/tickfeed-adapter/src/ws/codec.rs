/*
[INPUT]:  Raw binary tick frames and JSON text frames
[OUTPUT]: Decoded tick records and encoded control messages
[POS]:    WebSocket layer - pure wire codec, no I/O and no state
[UPDATE]: When the server adds packet layouts or control actions change
*/

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::types::enums::Mode;
use crate::types::models::{DepthLevel, MarketDepth, Ohlc, OrderUpdate, Tick};

/// Body length of a last-price-only packet
pub const LTP_PACKET_LEN: usize = 8;
/// Body length of a quote packet (LTP + quantities, volume, OHLC)
pub const QUOTE_PACKET_LEN: usize = 44;
/// Body length of a full packet without depth
pub const FULL_PACKET_LEN: usize = 64;
/// Body length of a full packet carrying five-level depth per side
pub const FULL_DEPTH_PACKET_LEN: usize = 184;

const DEPTH_LEVELS_PER_SIDE: usize = 5;

// Exchange segments quoting at sub-paise precision; everything else is
// two-decimal fixed point. The segment code lives in the token's low byte.
const SEGMENT_CDS: u8 = 3;
const SEGMENT_BCD: u8 = 6;
const CDS_DECIMALS: u32 = 7;
const BCD_DECIMALS: u32 = 4;
const DEFAULT_DECIMALS: u32 = 2;

/// Per-segment fixed-point scale table.
///
/// The instrument token's low byte selects how many decimal places the raw
/// integer price carries. Deployments validate the defaults against server
/// fixtures and override segments that differ.
#[derive(Debug, Clone)]
pub struct PriceScales {
    decimals_by_segment: HashMap<u8, u32>,
}

impl PriceScales {
    /// Override the decimal places used for one segment code
    pub fn set(&mut self, segment: u8, decimals: u32) {
        self.decimals_by_segment.insert(segment, decimals);
    }

    /// Decimal places applied to prices of the given instrument token
    pub fn decimals(&self, token: u32) -> u32 {
        let segment = (token & 0xff) as u8;
        self.decimals_by_segment
            .get(&segment)
            .copied()
            .unwrap_or(DEFAULT_DECIMALS)
    }
}

impl Default for PriceScales {
    fn default() -> Self {
        let mut decimals_by_segment = HashMap::new();
        decimals_by_segment.insert(SEGMENT_CDS, CDS_DECIMALS);
        decimals_by_segment.insert(SEGMENT_BCD, BCD_DECIMALS);
        Self {
            decimals_by_segment,
        }
    }
}

/// Binary frame decode failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("frame truncated: needed {expected} bytes at offset {offset}, frame has {actual}")]
    BufferTooShort {
        offset: usize,
        expected: usize,
        actual: usize,
    },

    #[error("packet {index} truncated: length field says {expected} bytes, {remaining} remain")]
    TruncatedPacket {
        index: usize,
        expected: usize,
        remaining: usize,
    },

    #[error("packet body of {actual} bytes is too short for an instrument header")]
    PacketTooShort { actual: usize },

    #[error("{count} packet(s) had an unrecognized layout; decoded last-price fields only")]
    UnknownLayout { count: usize },
}

/// Result of decoding one packet.
///
/// Unrecognized body lengths never fail: the leading last-price fields are
/// still decoded and the remainder ignored, so newer servers that append
/// trailing fields keep working against this client.
#[derive(Debug, Clone, PartialEq)]
pub enum PacketDecode {
    /// The body length matched a known layout and every field was read
    Full(Tick),
    /// Unknown body length; only the leading last-price fields were read
    PartialKnownPrefix(Tick),
}

impl PacketDecode {
    pub fn tick(&self) -> &Tick {
        match self {
            PacketDecode::Full(tick) | PacketDecode::PartialKnownPrefix(tick) => tick,
        }
    }

    pub fn into_tick(self) -> Tick {
        match self {
            PacketDecode::Full(tick) | PacketDecode::PartialKnownPrefix(tick) => tick,
        }
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, PacketDecode::PartialKnownPrefix(_))
    }
}

/// Sequential big-endian reader over a tick frame
struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    const fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    fn require(&self, n: usize) -> Result<(), DecodeError> {
        if self.remaining() < n {
            return Err(DecodeError::BufferTooShort {
                offset: self.pos,
                expected: n,
                actual: self.buf.len(),
            });
        }
        Ok(())
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.require(2)?;
        let value = u16::from_be_bytes([self.buf[self.pos], self.buf[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.require(4)?;
        let value = u32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.require(4)?;
        let value = i32::from_be_bytes([
            self.buf[self.pos],
            self.buf[self.pos + 1],
            self.buf[self.pos + 2],
            self.buf[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.require(n)?;
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.require(n)?;
        self.pos += n;
        Ok(())
    }
}

/// Decode one binary frame into its packets, in wire order.
///
/// Layout: u16-BE packet count, then per packet a u16-BE body length and the
/// body. Trailing bytes after the last packet are ignored. Frames shorter
/// than the count header (single-byte server heartbeats) are the caller's
/// concern; passing one here yields `BufferTooShort`.
pub fn decode_ticks(
    frame: &[u8],
    scales: &PriceScales,
) -> Result<Vec<PacketDecode>, DecodeError> {
    let mut cursor = ByteCursor::new(frame);
    let count = cursor.read_u16()? as usize;
    let mut packets = Vec::with_capacity(count);
    for index in 0..count {
        let len = cursor.read_u16()? as usize;
        let body = cursor
            .read_bytes(len)
            .map_err(|_| DecodeError::TruncatedPacket {
                index,
                expected: len,
                remaining: cursor.remaining(),
            })?;
        packets.push(decode_packet(body, scales)?);
    }
    Ok(packets)
}

fn decode_packet(body: &[u8], scales: &PriceScales) -> Result<PacketDecode, DecodeError> {
    if body.len() < LTP_PACKET_LEN {
        return Err(DecodeError::PacketTooShort { actual: body.len() });
    }

    let mut cursor = ByteCursor::new(body);
    let token = cursor.read_u32()?;
    let decimals = scales.decimals(token);
    let last_price = price(cursor.read_i32()?, decimals);
    let mut tick = Tick::ltp(token, last_price);

    match body.len() {
        LTP_PACKET_LEN => Ok(PacketDecode::Full(tick)),
        QUOTE_PACKET_LEN => {
            read_quote_fields(&mut cursor, &mut tick, decimals)?;
            tick.mode = Mode::Quote;
            Ok(PacketDecode::Full(tick))
        }
        FULL_PACKET_LEN => {
            read_quote_fields(&mut cursor, &mut tick, decimals)?;
            read_full_fields(&mut cursor, &mut tick)?;
            tick.mode = Mode::Full;
            Ok(PacketDecode::Full(tick))
        }
        FULL_DEPTH_PACKET_LEN => {
            read_quote_fields(&mut cursor, &mut tick, decimals)?;
            read_full_fields(&mut cursor, &mut tick)?;
            tick.depth = Some(read_depth(&mut cursor, decimals)?);
            tick.mode = Mode::Full;
            Ok(PacketDecode::Full(tick))
        }
        _ => Ok(PacketDecode::PartialKnownPrefix(tick)),
    }
}

fn read_quote_fields(
    cursor: &mut ByteCursor<'_>,
    tick: &mut Tick,
    decimals: u32,
) -> Result<(), DecodeError> {
    tick.last_quantity = Some(cursor.read_u32()?);
    tick.average_price = Some(price(cursor.read_i32()?, decimals));
    tick.volume = Some(cursor.read_u32()?);
    tick.buy_quantity = Some(cursor.read_u32()?);
    tick.sell_quantity = Some(cursor.read_u32()?);

    let ohlc = Ohlc {
        open: price(cursor.read_i32()?, decimals),
        high: price(cursor.read_i32()?, decimals),
        low: price(cursor.read_i32()?, decimals),
        close: price(cursor.read_i32()?, decimals),
    };
    if !ohlc.close.is_zero() {
        tick.change_percent =
            Some((tick.last_price - ohlc.close) * Decimal::ONE_HUNDRED / ohlc.close);
    }
    tick.ohlc = Some(ohlc);
    Ok(())
}

fn read_full_fields(cursor: &mut ByteCursor<'_>, tick: &mut Tick) -> Result<(), DecodeError> {
    tick.last_trade_time = timestamp(cursor.read_u32()?);
    tick.open_interest = Some(cursor.read_u32()?);
    tick.oi_day_high = Some(cursor.read_u32()?);
    tick.oi_day_low = Some(cursor.read_u32()?);
    tick.exchange_time = timestamp(cursor.read_u32()?);
    Ok(())
}

fn read_depth(cursor: &mut ByteCursor<'_>, decimals: u32) -> Result<MarketDepth, DecodeError> {
    let read_side = |cursor: &mut ByteCursor<'_>| -> Result<Vec<DepthLevel>, DecodeError> {
        let mut levels = Vec::with_capacity(DEPTH_LEVELS_PER_SIDE);
        for _ in 0..DEPTH_LEVELS_PER_SIDE {
            let quantity = cursor.read_u32()?;
            let level_price = price(cursor.read_i32()?, decimals);
            let orders = cursor.read_u16()?;
            cursor.skip(2)?; // alignment padding
            levels.push(DepthLevel {
                price: level_price,
                quantity,
                orders,
            });
        }
        Ok(levels)
    };

    let buy = read_side(cursor)?;
    let sell = read_side(cursor)?;
    Ok(MarketDepth { buy, sell })
}

fn price(raw: i32, decimals: u32) -> Decimal {
    Decimal::new(i64::from(raw), decimals)
}

fn timestamp(epoch_secs: u32) -> Option<DateTime<Utc>> {
    if epoch_secs == 0 {
        return None;
    }
    DateTime::from_timestamp(i64::from(epoch_secs), 0)
}

/// Control frame adding tokens at the server's default fidelity
pub fn encode_subscribe(tokens: &[u32]) -> String {
    json!({ "a": "subscribe", "v": tokens }).to_string()
}

/// Control frame removing tokens
pub fn encode_unsubscribe(tokens: &[u32]) -> String {
    json!({ "a": "unsubscribe", "v": tokens }).to_string()
}

/// Control frame setting the fidelity for tokens, subscribing them if new
pub fn encode_set_mode(mode: Mode, tokens: &[u32]) -> String {
    json!({ "a": "mode", "v": [mode.as_str(), tokens] }).to_string()
}

/// JSON text frames pushed by the server
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Order lifecycle update
    Order(OrderUpdate),
    /// Server-side error description
    Error(String),
    /// Informational broadcast
    Message(serde_json::Value),
    #[serde(other)]
    Other,
}

/// Parse a text frame into a [`ServerMessage`]
pub fn decode_text(raw: &str) -> Result<ServerMessage, serde_json::Error> {
    serde_json::from_str(raw)
}
