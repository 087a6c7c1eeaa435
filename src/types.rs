use chrono::{DateTime, Utc};

/// One decoded or raw record yielded by [`crate::client::TardisClient::replay`]
/// (spec.md §3 `Response`).
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// `decode=true`: timestamp parsed to microsecond precision, payload
    /// parsed as JSON.
    Decoded {
        local_timestamp: DateTime<Utc>,
        message: serde_json::Value,
    },
    /// `decode=false`: both fields are the exact byte spans from the slice
    /// record, unparsed.
    Raw {
        local_timestamp: Vec<u8>,
        message: Vec<u8>,
    },
}
