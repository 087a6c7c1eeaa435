//! The Order-Book Reconstructor (spec.md §4.6): per-venue stateful
//! transformers from raw slice messages to normalized trades and book
//! deltas, maintaining a sorted per-symbol bid/ask ladder.

pub mod bitmex;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::Result;
use crate::filter::Filter;

/// Which side of the book an update or trade belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Bid,
    Ask,
}

/// Trade aggressor side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

/// How a book-delta item should be applied to the in-memory ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookUpdateType {
    New,
    Change,
    Delete,
}

/// A single normalized trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub side: TradeSide,
    pub amount: f64,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// A single normalized book-ladder update.
#[derive(Debug, Clone, PartialEq)]
pub struct BookUpdate {
    pub symbol: String,
    pub side: Side,
    pub update_type: BookUpdateType,
    pub price_level: f64,
    pub amount: f64,
}

/// The payload of one raw venue message after normalization — either a
/// batch of trades or a batch of book-ladder updates (spec.md §4.6: "all
/// items in one raw message share a symbol").
#[derive(Debug, Clone, PartialEq)]
pub enum MarketMessage {
    Trades(Vec<Trade>),
    BookDelta(Vec<BookUpdate>),
}

/// A snapshot of one symbol's bid/ask ladder, price ascending.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBookSnapshot {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
}

/// One reconstructed, normalized market event (spec.md §4.6 `MarketResponse`).
#[derive(Debug, Clone, PartialEq)]
pub struct MarketResponse {
    pub local_timestamp: DateTime<Utc>,
    pub message: MarketMessage,
    pub order_book_state: OrderBookSnapshot,
}

/// Fixed-point price key (8 decimal places) used to key the sorted bid/ask
/// maps, avoiding floating-point `Ord`/hashing pitfalls for dense books
/// (spec.md §9 design note).
const PRICE_SCALE: f64 = 1e8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct PriceKey(i64);

impl From<f64> for PriceKey {
    fn from(price: f64) -> Self {
        PriceKey((price * PRICE_SCALE).round() as i64)
    }
}

impl PriceKey {
    fn as_f64(self) -> f64 {
        self.0 as f64 / PRICE_SCALE
    }
}

/// Per-symbol bid/ask ladder.
#[derive(Debug, Default)]
struct Ladder {
    bids: BTreeMap<PriceKey, f64>,
    asks: BTreeMap<PriceKey, f64>,
}

impl Ladder {
    fn side(&mut self, side: Side) -> &mut BTreeMap<PriceKey, f64> {
        match side {
            Side::Bid => &mut self.bids,
            Side::Ask => &mut self.asks,
        }
    }

    fn apply(&mut self, update: &BookUpdate) {
        let price_key = PriceKey::from(update.price_level);
        let book_side = self.side(update.side);
        match update.update_type {
            BookUpdateType::Delete => {
                book_side.remove(&price_key);
            }
            BookUpdateType::New | BookUpdateType::Change => {
                book_side.insert(price_key, update.amount);
            }
        }
    }

    fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            bids: self.bids.iter().map(|(k, v)| (k.as_f64(), *v)).collect(),
            asks: self.asks.iter().map(|(k, v)| (k.as_f64(), *v)).collect(),
        }
    }
}

/// A per-venue stateful transformer from raw decoded slice messages to
/// [`MarketResponse`]s, maintaining order-book state for the session.
pub trait MarketReconstructor: Send {
    /// The channel/symbol filters this reconstructor's venue needs fed into
    /// [`crate::client::TardisClient::replay`] (spec.md §4.6 "Derived filters").
    fn filters(&self) -> Vec<Filter>;

    /// Transform one raw decoded message. Returns `None` for messages this
    /// reconstructor ignores (unrecognized tables, trade `partial`s).
    fn reconstruct(
        &mut self,
        local_timestamp: DateTime<Utc>,
        message: &serde_json::Value,
    ) -> Result<Option<MarketResponse>>;
}

/// Construct the reconstructor registered for `venue`, seeded with the
/// requested `symbols`.
///
/// Mirrors `tardis_client.reconstructors.get_market_reconstructor`'s
/// dict-based registry in `examples/original_source/`.
pub fn reconstructor_for(
    venue: &str,
    symbols: Vec<String>,
) -> Result<Box<dyn MarketReconstructor>> {
    match venue {
        "bitmex" => Ok(Box::new(bitmex::BitmexReconstructor::new(symbols))),
        other => Err(crate::error::TardisError::Validation(format!(
            "no market reconstructor registered for venue '{other}'"
        ))),
    }
}
