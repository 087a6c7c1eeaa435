//! The Download Orchestrator (spec.md §4.4): enumerates every minute in
//! `[from, to)`, schedules fetches with an adaptive bounded parallelism,
//! propagates the first fatal error, and cancels cleanly.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::debug;

use crate::cache::SliceCoordinate;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::fetcher::fetch_slice_if_missing;
use crate::filter::{canonical_json, fingerprint, Filter};
use crate::limiter::AdaptiveLimiter;

/// Number of minute slices spanning `[from, to)`: `round((to - from) / 60s)`.
///
/// Python's `round()` is round-half-to-even (banker's rounding), unlike
/// `f64::round()`'s round-half-away-from-zero; `data_downloader.py` computes
/// `N = int(round((to - from).total_seconds() / 60))`, so a non-minute-aligned
/// range must pick the same N here to match spec.md §4.4.
fn minute_count(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    ((to - from).num_seconds() as f64 / 60.0).round_ties_even() as i64
}

/// Download every minute slice in `[from, to)` for `venue`/`filters` into
/// the configured cache, bounded by an adaptive concurrency limit.
///
/// Dropping this future (e.g. because the caller aborted the
/// [`tokio::task::JoinHandle`] it was spawned under) cancels every in-flight
/// fetch: the inner [`JoinSet`] aborts all of its tasks on drop, which is
/// how spec.md §5's cancellation-propagation guarantee is realized — no
/// `tokio::select!`/cancellation-token plumbing needed. A cancelled fetch
/// task's own [`TempFileGuard`](crate::cache) still runs its synchronous
/// cleanup as the task future is dropped.
pub async fn download_range(
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    venue: String,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    filters: Vec<Filter>,
) -> Result<()> {
    let minutes = minute_count(from, to);
    let fingerprint = fingerprint(&filters);
    let filters_json = if filters.is_empty() {
        None
    } else {
        Some(canonical_json(&filters))
    };
    let from_iso = from.format("%Y-%m-%dT%H:%M:%S").to_string();

    debug!(venue, %from, %to, minutes, "orchestrator started");

    let limiter = Arc::new(Mutex::new(AdaptiveLimiter::new(
        config.concurrency_ceiling(),
    )));
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();
    let mut offset = 0i64;

    while offset < minutes {
        let current_limit = limiter.lock().expect("limiter mutex poisoned").limit();
        while tasks.len() >= current_limit {
            match tasks.join_next().await {
                Some(Ok(Ok(()))) => {
                    limiter.lock().expect("limiter mutex poisoned").on_success();
                }
                Some(Ok(Err(err))) => return Err(err),
                Some(Err(join_err)) if join_err.is_cancelled() => {}
                Some(Err(join_err)) => std::panic::resume_unwind(join_err.into_panic()),
                None => break,
            }
        }

        let coord = SliceCoordinate {
            venue: venue.clone(),
            minute: from + chrono::Duration::seconds(offset * 60),
            fingerprint: fingerprint.clone(),
        };
        let http = http.clone();
        let config = Arc::clone(&config);
        let venue_owned = venue.clone();
        let from_iso = from_iso.clone();
        let filters_json = filters_json.clone();
        let limiter = Arc::clone(&limiter);

        tasks.spawn(async move {
            fetch_slice_if_missing(
                &http,
                &config,
                &venue_owned,
                &from_iso,
                offset,
                &coord,
                filters_json.as_deref(),
                &limiter,
            )
            .await
        });

        offset += 1;
    }

    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(join_err) if join_err.is_cancelled() => {}
            Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
        }
    }

    debug!(venue, "orchestrator finished");
    Ok(())
}
