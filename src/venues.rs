//! The known-venue catalog used by the Façade's argument validation
//! (spec.md §4.7). Treated as an opaque string set — per-venue channel
//! names are an external collaborator (spec.md §1) and are never
//! interpreted here.

const KNOWN_VENUES: &[&str] = &[
    "bitmex",
    "binance",
    "binance-futures",
    "binance-delivery",
    "binance-options",
    "deribit",
    "okex",
    "okex-futures",
    "okex-swap",
    "bitfinex",
    "bitfinex-derivatives",
    "coinbase",
    "cryptofacilities",
    "kraken",
    "bybit",
    "huobi",
    "huobi-dm",
    "huobi-dm-swap",
    "ftx",
    "gate-io-futures",
    "bitstamp",
];

/// Whether `venue` is a recognized exchange identifier.
pub fn is_known_venue(venue: &str) -> bool {
    KNOWN_VENUES.contains(&venue)
}
