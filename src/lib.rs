//! Async Rust client for the [Tardis.dev](https://docs.tardis.dev) historical
//! market-data API.
//!
//! Tardis.dev replays per-minute recorded feeds from dozens of cryptocurrency
//! venues. A caller requests a contiguous time range for one venue plus an
//! optional set of channel/symbol filters and gets back an ordered sequence
//! of `(local_timestamp, message)` pairs spanning that range.
//!
//! Internally the crate runs a **concurrent fetch-and-replay pipeline**: a
//! bounded-parallelism [orchestrator](orchestrator::download_range)
//! downloads gzipped per-minute slices into a content-addressed disk cache
//! while a single [replay iterator](replay::replay_stream) reads them back
//! in strict chronological order, the two coupled only through the
//! filesystem. A secondary [order-book reconstructor](reconstruct) turns a
//! venue's raw deltas into normalized trades and book snapshots.
//!
//! # Quick start
//!
//! ```no_run
//! # async fn example() -> tardis_client::Result<()> {
//! use tardis_client::{TardisClient, Filter};
//! use futures::StreamExt;
//!
//! let client = TardisClient::new();
//! let filters = vec![Filter::new("trade", ["XBTUSD"])];
//! let mut stream = client.replay(
//!     "bitmex",
//!     "2020-01-01T00:00:00",
//!     "2020-01-01T00:03:00",
//!     filters,
//!     true,
//! );
//! while let Some(response) = stream.next().await {
//!     let _response = response?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration
//!
//! Pass a [`ClientConfig`] to [`TardisClient::with_config`] to override the
//! endpoint, cache directory, API key, timeout, proxy, or concurrency
//! ceiling.

pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod filter;
pub mod limiter;
pub mod orchestrator;
pub mod reconstruct;
pub mod replay;
pub mod types;
pub mod venues;

pub use client::TardisClient;
pub use config::ClientConfig;
pub use error::{Result, TardisError};
pub use filter::Filter;
pub use types::Response;
