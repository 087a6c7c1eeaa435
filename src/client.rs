//! The Client Façade (spec.md §4.7): validates arguments, runs the
//! Orchestrator concurrently with the Replay Iterator, and exposes the
//! venue-agnostic `replay`/`reconstruct_market`/`clear_cache` surface.

use chrono::{DateTime, NaiveDateTime, Utc};
use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use tracing::debug;

use crate::config::ClientConfig;
use crate::error::{Result, TardisError};
use crate::filter::{sort_filters, Filter};
use crate::orchestrator;
use crate::reconstruct::{reconstructor_for, MarketResponse};
use crate::types::Response;
use crate::venues::is_known_venue;

/// Async client for the Tardis.dev historical market-data API.
///
/// ```no_run
/// # async fn example() -> tardis_client::Result<()> {
/// use tardis_client::{TardisClient, Filter};
/// use futures::StreamExt;
///
/// let client = TardisClient::new();
/// let filters = vec![Filter::new("trade", ["XBTUSD"])];
/// let mut stream = client.replay("bitmex", "2020-01-01T00:00:00", "2020-01-01T00:03:00", filters, true);
/// while let Some(response) = stream.next().await {
///     let _response = response?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct TardisClient {
    config: Arc<ClientConfig>,
}

impl Default for TardisClient {
    fn default() -> Self {
        Self::new()
    }
}

impl TardisClient {
    /// Create a client with the default configuration (public endpoint, OS
    /// temp cache dir, no API key).
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a client with an explicit [`ClientConfig`].
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn build_http_client(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .user_agent(format!(
                "tardis-client/{} (+https://github.com/tardis-dev/tardis-python)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(self.config.http_timeout());
        if let Some(proxy) = self.config.http_proxy() {
            builder = builder.proxy(reqwest::Proxy::all(proxy)?);
        }
        Ok(builder.build()?)
    }

    /// Replay every record in `[from_date, to_date)` for `venue`, optionally
    /// restricted by `filters`, yielding [`Response`]s in ascending minute
    /// order.
    ///
    /// Spawns the [`orchestrator::download_range`] task to populate the
    /// local cache concurrently with the returned stream, which drives the
    /// [`crate::replay::replay_stream`] consumer. Dropping the stream before
    /// it's exhausted aborts the orchestrator task (spec.md §4.7, §5).
    pub fn replay(
        &self,
        venue: &str,
        from_date: &str,
        to_date: &str,
        mut filters: Vec<Filter>,
        decode: bool,
    ) -> impl Stream<Item = Result<Response>> + Unpin {
        let setup = self
            .validate_and_parse(venue, from_date, to_date)
            .and_then(|range| Ok((range, self.build_http_client()?)));
        sort_filters(&mut filters);

        let ((from, to), http) = match setup {
            Ok(setup) => setup,
            Err(err) => return futures::stream::once(async { Err(err) }).boxed(),
        };

        let fingerprint = crate::filter::fingerprint(&filters);
        debug!(venue, %from, %to, ?filters, "replay started");

        let config = Arc::clone(&self.config);
        let orchestrator_handle = tokio::spawn(orchestrator::download_range(
            http,
            config,
            venue.to_string(),
            from,
            to,
            filters,
        ));

        crate::replay::replay_stream(
            self.config.cache_dir().to_path_buf(),
            venue.to_string(),
            from,
            to,
            fingerprint,
            decode,
            orchestrator_handle,
        )
        .boxed()
    }

    /// Replay a venue's feed through its registered
    /// [`MarketReconstructor`](crate::reconstruct::MarketReconstructor),
    /// yielding only the non-null reconstructed events (spec.md §4.7).
    pub fn reconstruct_market(
        &self,
        venue: &str,
        from_date: &str,
        to_date: &str,
        symbols: Vec<String>,
    ) -> impl Stream<Item = Result<MarketResponse>> + Unpin {
        let reconstructor = match reconstructor_for(venue, symbols) {
            Ok(r) => r,
            Err(err) => return futures::stream::once(async { Err(err) }).boxed(),
        };
        let filters = reconstructor.filters();

        let responses = self.replay(venue, from_date, to_date, filters, true);
        futures::stream::unfold(
            (responses, reconstructor),
            |(mut responses, mut reconstructor)| async move {
                loop {
                    let response = match responses.next().await {
                        Some(Ok(response)) => response,
                        Some(Err(err)) => return Some((Err(err), (responses, reconstructor))),
                        None => return None,
                    };
                    let Response::Decoded {
                        local_timestamp,
                        message,
                    } = response
                    else {
                        continue;
                    };
                    match reconstructor.reconstruct(local_timestamp, &message) {
                        Ok(Some(market_response)) => {
                            return Some((Ok(market_response), (responses, reconstructor)))
                        }
                        Ok(None) => continue,
                        Err(err) => return Some((Err(err), (responses, reconstructor))),
                    }
                }
            },
        )
        .boxed()
    }

    /// Look up the exchange metadata catalog for `venue`
    /// (`GET https://api.tardis.dev/v1/exchanges/<venue>`). Channel-name
    /// schemas are treated as opaque — returned as raw parsed JSON
    /// (spec.md §1, §6).
    pub async fn exchange_details(&self, venue: &str) -> Result<serde_json::Value> {
        let http = self.build_http_client()?;
        let url = format!("https://api.tardis.dev/v1/exchanges/{venue}");
        let response = http.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TardisError::Api {
                status: status.as_u16(),
                url,
                message,
            });
        }
        Ok(response.json().await?)
    }

    /// Remove the entire local slice cache.
    pub fn clear_cache(&self) -> Result<()> {
        match std::fs::remove_dir_all(self.config.cache_dir()) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(TardisError::Cache(err)),
        }
    }

    fn validate_and_parse(
        &self,
        venue: &str,
        from_date: &str,
        to_date: &str,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        if !is_known_venue(venue) {
            return Err(TardisError::Validation(format!("unknown venue '{venue}'")));
        }

        let from = parse_iso_date(from_date).ok_or_else(|| {
            TardisError::Validation(format!("invalid 'from_date' argument: {from_date}"))
        })?;
        let to = parse_iso_date(to_date).ok_or_else(|| {
            TardisError::Validation(format!("invalid 'to_date' argument: {to_date}"))
        })?;

        if from >= to {
            return Err(TardisError::Validation(
                "'from_date' must be earlier than 'to_date'".to_string(),
            ));
        }

        Ok((from, to))
    }
}

fn parse_iso_date(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}
