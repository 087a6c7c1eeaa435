use serde::Serialize;
use sha2::{Digest, Sha256};

/// A single channel/symbol filter, e.g. `{channel: "trade", symbols: ["XBTUSD"]}`.
///
/// Symbols are sorted ascending on construction so two `Filter`s built from
/// differently-ordered symbol lists compare and serialize identically (spec.md
/// §3: "Symbols within a filter are sorted ascending"). Immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    channel: String,
    symbols: Vec<String>,
}

impl Filter {
    /// Build a filter, sorting `symbols` ascending.
    pub fn new(
        channel: impl Into<String>,
        symbols: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        symbols.sort();
        Self {
            channel: channel.into(),
            symbols,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }
}

/// Sort a filter list by channel name, as the caller-facing surface always
/// does before using a filter set for either cache keys or the API request
/// (spec.md §4.7: "Sorts the filter list by channel name before use").
pub fn sort_filters(filters: &mut [Filter]) {
    filters.sort_by(|a, b| a.channel.cmp(&b.channel));
}

/// The SHA-256 hex fingerprint of the empty filter list — `SHA256("[]")`.
/// Literal constant per spec.md §8 scenario 1.
pub const EMPTY_FILTER_FINGERPRINT: &str =
    "4f53cda18c2baa0c0354bb5f9a3ecbe5ed12ab4d8e11ba873c2f11161202b945";

/// Canonical JSON serialization of a (already channel-sorted, symbol-sorted)
/// filter list: a compact array of `{"channel":...,"symbols":[...]}` objects
/// with no whitespace. This is the exact string that gets hashed for the
/// cache fingerprint *and* URL-encoded into the request query string
/// (spec.md §4.1, §6) — the two must never diverge.
pub fn canonical_json(filters: &[Filter]) -> String {
    let mut sorted = filters.to_vec();
    sort_filters(&mut sorted);
    for f in &mut sorted {
        f.symbols.sort();
    }
    // serde_json's default map/struct ordering already emits `channel` then
    // `symbols` (declaration order) with no whitespace via `to_string`.
    serde_json::to_string(&sorted).expect("Filter serialization cannot fail")
}

/// The stable content fingerprint of a filter set (spec.md §4.1): SHA-256 of
/// [`canonical_json`], lowercase hex. Depends only on the filter-set
/// multiset — any permutation of filters, or of symbols within a filter,
/// yields an identical fingerprint.
pub fn fingerprint(filters: &[Filter]) -> String {
    let canonical = canonical_json(filters);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}
