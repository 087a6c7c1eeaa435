//! BitMEX reconstructor — direct port of
//! `examples/original_source/tardis_client/reconstructors/bitmex.py`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use super::{
    BookUpdate, BookUpdateType, Ladder, MarketMessage, MarketReconstructor, MarketResponse, Side,
    Trade, TradeSide,
};
use crate::error::{Result, TardisError};
use crate::filter::Filter;

/// BitMEX's `orderBookL2` update/delete messages carry only an `id`, not a
/// price — the reconstructor must remember each id's price from the
/// preceding `partial`/`insert` message to resolve later updates
/// (spec.md §3 "Order-Book State", §4.6).
pub struct BitmexReconstructor {
    symbols: HashSet<String>,
    books: HashMap<String, Ladder>,
    id_to_price: HashMap<u64, f64>,
}

impl BitmexReconstructor {
    pub fn new(symbols: Vec<String>) -> Self {
        let symbols: HashSet<String> = symbols.into_iter().collect();
        let books = symbols
            .iter()
            .map(|s| (s.clone(), Ladder::default()))
            .collect();
        Self {
            symbols,
            books,
            id_to_price: HashMap::new(),
        }
    }

    fn map_trade(&self, item: &Value) -> Result<Trade> {
        let symbol = item_str(item, "symbol")?;
        let side = if item_str(item, "side")? == "Buy" {
            TradeSide::Buy
        } else {
            TradeSide::Sell
        };
        let timestamp_str = item_str(item, "timestamp")?;
        // drop the trailing 'Z', matching `item["timestamp"][:-1]` in bitmex.py
        let trimmed = timestamp_str.trim_end_matches('Z');
        let naive =
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").map_err(|e| {
                TardisError::Logic(format!("invalid trade timestamp '{timestamp_str}': {e}"))
            })?;

        Ok(Trade {
            symbol,
            side,
            amount: item_f64(item, "size")?,
            price: item_f64(item, "price")?,
            timestamp: naive.and_utc(),
        })
    }

    fn map_book_update(&mut self, item: &Value, action: &str) -> Result<Option<BookUpdate>> {
        let symbol = item_str(item, "symbol")?;
        let id = item_u64(item, "id")?;

        if action == "partial" || action == "insert" {
            if let Ok(price) = item_f64(item, "price") {
                self.id_to_price.insert(id, price);
            }
        }

        let price_level = match item_f64(item, "price") {
            Ok(price) => price,
            // update/delete messages omit price; resolve via the id memo.
            // A miss means an update arrived before its partial after a
            // reconnect — documented hazard, silently dropped (spec.md §4.6).
            Err(_) => match self.id_to_price.get(&id) {
                Some(price) => *price,
                None => return Ok(None),
            },
        };

        let update_type = match action {
            "partial" | "insert" => BookUpdateType::New,
            "update" => BookUpdateType::Change,
            "delete" => BookUpdateType::Delete,
            other => {
                return Err(TardisError::Logic(format!(
                    "unexpected orderBookL2 action '{other}'"
                )))
            }
        };
        let side = if item_str(item, "side")? == "Buy" {
            Side::Bid
        } else {
            Side::Ask
        };
        let amount = if update_type == BookUpdateType::Delete {
            0.0
        } else {
            item_f64(item, "size")?
        };

        Ok(Some(BookUpdate {
            symbol,
            side,
            update_type,
            price_level,
            amount,
        }))
    }
}

impl MarketReconstructor for BitmexReconstructor {
    fn filters(&self) -> Vec<Filter> {
        let symbols: Vec<String> = self.symbols.iter().cloned().collect();
        vec![
            Filter::new("orderBookL2", symbols.clone()),
            Filter::new("trade", symbols),
        ]
    }

    fn reconstruct(
        &mut self,
        local_timestamp: DateTime<Utc>,
        message: &Value,
    ) -> Result<Option<MarketResponse>> {
        let table = item_str(message, "table").unwrap_or_default();
        let is_trade = table == "trade";
        let is_book_delta = table == "orderBookL2";
        if !is_trade && !is_book_delta {
            return Ok(None);
        }

        let action = item_str(message, "action")?;
        // trade `partial`s are ignored to avoid duplicated trades across reconnects
        if is_trade && action == "partial" {
            return Ok(None);
        }

        let data = message
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| TardisError::Logic("message.data is not an array".to_string()))?;

        let mut trades = Vec::new();
        let mut book_updates = Vec::new();
        let mut last_symbol: Option<String> = None;

        for item in data {
            let symbol = item_str(item, "symbol")?;
            if !self.symbols.contains(&symbol) {
                continue;
            }

            if is_trade {
                trades.push(self.map_trade(item)?);
                last_symbol = Some(symbol.clone());
            } else if let Some(update) = self.map_book_update(item, &action)? {
                last_symbol = Some(symbol.clone());
                if let Some(ladder) = self.books.get_mut(&update.symbol) {
                    ladder.apply(&update);
                }
                book_updates.push(update);
            }
        }

        let symbol = match last_symbol {
            Some(s) => s,
            // every item was filtered out (wrong symbol, or an update whose
            // id is unknown) — nothing to report.
            None => return Ok(None),
        };

        let order_book_state = self
            .books
            .get(&symbol)
            .map(|ladder| ladder.snapshot())
            .unwrap_or_default();

        let message = if is_trade {
            MarketMessage::Trades(trades)
        } else {
            MarketMessage::BookDelta(book_updates)
        };

        Ok(Some(MarketResponse {
            local_timestamp,
            message,
            order_book_state,
        }))
    }
}

fn item_str(value: &Value, key: &str) -> Result<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TardisError::Logic(format!("missing or non-string field '{key}'")))
}

fn item_f64(value: &Value, key: &str) -> Result<f64> {
    value
        .get(key)
        .and_then(Value::as_f64)
        .ok_or_else(|| TardisError::Logic(format!("missing or non-numeric field '{key}'")))
}

fn item_u64(value: &Value, key: &str) -> Result<u64> {
    value
        .get(key)
        .and_then(Value::as_u64)
        .ok_or_else(|| TardisError::Logic(format!("missing or non-integer field '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn orderbook_msg(action: &str, data: Value) -> Value {
        json!({"table": "orderBookL2", "action": action, "data": data})
    }

    #[test]
    fn insert_then_delete_same_id_returns_book_to_empty() {
        let mut reconstructor = BitmexReconstructor::new(vec!["XBTUSD".into()]);
        let ts = Utc::now();

        let insert = orderbook_msg(
            "insert",
            json!([{"symbol": "XBTUSD", "id": 1, "side": "Buy", "price": 9000.0, "size": 10.0}]),
        );
        let response = reconstructor.reconstruct(ts, &insert).unwrap().unwrap();
        assert_eq!(response.order_book_state.bids, vec![(9000.0, 10.0)]);

        let delete = orderbook_msg(
            "delete",
            json!([{"symbol": "XBTUSD", "id": 1, "side": "Buy"}]),
        );
        let response = reconstructor.reconstruct(ts, &delete).unwrap().unwrap();
        assert!(response.order_book_state.bids.is_empty());
    }

    #[test]
    fn trade_partial_is_ignored() {
        let mut reconstructor = BitmexReconstructor::new(vec!["XBTUSD".into()]);
        let msg = json!({
            "table": "trade",
            "action": "partial",
            "data": [{"symbol": "XBTUSD", "side": "Buy", "size": 1.0, "price": 9000.0, "timestamp": "2019-08-01T08:52:00.032Z"}],
        });
        assert_eq!(reconstructor.reconstruct(Utc::now(), &msg).unwrap(), None);
    }

    #[test]
    fn trade_produces_normalized_trade_and_timestamp() {
        let mut reconstructor = BitmexReconstructor::new(vec!["XBTUSD".into()]);
        let msg = json!({
            "table": "trade",
            "action": "insert",
            "data": [{"symbol": "XBTUSD", "side": "Sell", "size": 2.5, "price": 9001.5, "timestamp": "2019-08-01T08:52:00.032Z"}],
        });
        let response = reconstructor
            .reconstruct(Utc::now(), &msg)
            .unwrap()
            .unwrap();
        match response.message {
            MarketMessage::Trades(trades) => {
                assert_eq!(trades.len(), 1);
                assert_eq!(trades[0].side, TradeSide::Sell);
                assert_eq!(trades[0].amount, 2.5);
                assert_eq!(trades[0].price, 9001.5);
            }
            _ => panic!("expected Trades"),
        }
    }

    #[test]
    fn update_with_unknown_id_is_dropped_without_crash() {
        let mut reconstructor = BitmexReconstructor::new(vec!["XBTUSD".into()]);
        let msg = orderbook_msg(
            "update",
            json!([{"symbol": "XBTUSD", "id": 999, "side": "Buy", "size": 5.0}]),
        );
        assert_eq!(reconstructor.reconstruct(Utc::now(), &msg).unwrap(), None);
    }

    #[test]
    fn items_outside_requested_symbols_are_ignored() {
        let mut reconstructor = BitmexReconstructor::new(vec!["XBTUSD".into()]);
        let msg = orderbook_msg(
            "insert",
            json!([{"symbol": "ETHUSD", "id": 1, "side": "Buy", "price": 200.0, "size": 1.0}]),
        );
        assert_eq!(reconstructor.reconstruct(Utc::now(), &msg).unwrap(), None);
    }

    #[test]
    fn filters_derive_order_book_l2_and_trade_channels() {
        let reconstructor = BitmexReconstructor::new(vec!["XBTUSD".into(), "ETHUSD".into()]);
        let filters = reconstructor.filters();
        assert_eq!(filters.len(), 2);
        let channels: Vec<&str> = filters.iter().map(Filter::channel).collect();
        assert!(channels.contains(&"orderBookL2"));
        assert!(channels.contains(&"trade"));
    }
}
