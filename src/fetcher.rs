//! The Slice Fetcher (spec.md §4.3): one HTTP GET for one slice, with the
//! `Reliable` retry wrapper and atomic cache write.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::cache::{slice_path, write_stream_atomic, SliceCoordinate};
use crate::config::ClientConfig;
use crate::error::{Result, TardisError};
use crate::limiter::AdaptiveLimiter;

const MAX_ATTEMPTS: u32 = 5;
const THROTTLE_DELAY_SECS: f64 = 61.0;

/// Characters the data-feeds `filters` query parameter leaves unescaped,
/// beyond the usual alphanumerics/`_.-~`: matches
/// `urllib.parse.quote(..., safe="~()*!.'")` in
/// `examples/original_source/tardis_client/data_downloader.py` exactly
/// (spec.md §6).
const FILTERS_SAFE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'(')
    .remove(b')')
    .remove(b'*')
    .remove(b'!')
    .remove(b'\'');

/// Build the fetch URL for one `(venue, from, offset)` slice, with an
/// optional canonical-JSON filters query parameter (spec.md §6).
///
/// `from_iso` is embedded verbatim, unencoded — matching
/// `data_downloader.py`'s `f"...from={from_date.isoformat()}..."`, which
/// never percent-encodes the date (its characters are all query-safe).
pub fn build_url(
    endpoint: &str,
    venue: &str,
    from_iso: &str,
    offset: i64,
    filters_canonical_json: Option<&str>,
) -> String {
    let mut url = format!("{endpoint}/v1/data-feeds/{venue}?from={from_iso}&offset={offset}");
    if let Some(json) = filters_canonical_json {
        url.push_str("&filters=");
        url.push_str(&utf8_percent_encode(json, FILTERS_SAFE).to_string());
    }
    url
}

/// Fetch one slice if it is not already cached, retrying transient failures.
///
/// This is the `Reliable` wrapper from spec.md §4.3: up to [`MAX_ATTEMPTS`]
/// attempts, exponential backoff with jitter between attempts, a longer
/// fixed delay plus an adaptive-limiter throttle signal on HTTP 429, and
/// immediate propagation of fatal errors (400 without the whitelisted
/// substring, 401, or [`TardisError::Logic`]).
pub async fn fetch_slice_if_missing(
    http: &reqwest::Client,
    config: &ClientConfig,
    venue: &str,
    from_iso: &str,
    offset: i64,
    coord: &SliceCoordinate,
    filters_canonical_json: Option<&str>,
    limiter: &Arc<Mutex<AdaptiveLimiter>>,
) -> Result<()> {
    let cache_path = slice_path(config.cache_dir(), coord);
    if tokio::fs::try_exists(&cache_path).await.unwrap_or(false) {
        trace!(path = %cache_path.display(), "slice already cached");
        return Ok(());
    }

    let url = build_url(
        config.endpoint(),
        venue,
        from_iso,
        offset,
        filters_canonical_json,
    );
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        match fetch_and_cache_once(http, config, &url, &cache_path).await {
            Ok(()) => {
                debug!(%url, attempts, "fetched and cached slice");
                return Ok(());
            }
            Err(err) => {
                if err.is_throttle() {
                    limiter
                        .lock()
                        .expect("limiter mutex poisoned")
                        .on_throttle(Instant::now());
                }
                if attempts >= MAX_ATTEMPTS || !err.is_retryable() {
                    return Err(err);
                }

                let delay = if err.is_throttle() {
                    Duration::from_secs_f64(THROTTLE_DELAY_SECS)
                } else {
                    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
                    Duration::from_secs_f64(2f64.powi(attempts as i32) + jitter)
                };
                debug!(%url, attempts, ?delay, error = %err, "retrying slice fetch");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn fetch_and_cache_once(
    http: &reqwest::Client,
    config: &ClientConfig,
    url: &str,
    cache_path: &std::path::Path,
) -> Result<()> {
    let mut request = http.get(url).timeout(config.http_timeout());
    if let Some(key) = config.api_key() {
        request = request.bearer_auth(key);
    }

    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(TardisError::Api {
            status: status.as_u16(),
            url: url.to_string(),
            message,
        });
    }

    write_stream_atomic(cache_path, response.bytes_stream()).await
}
