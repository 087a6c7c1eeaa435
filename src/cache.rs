//! Cache path resolution and atomic, crash-safe slice writes.
//!
//! Mirrors the temp-file-and-rename discipline in
//! `papers_openalex::DiskCache::set_inner`, generalized to the
//! content-addressed, never-expiring slice layout spec.md §3 describes
//! instead of the TTL'd single-file-per-key layout the teacher uses.

use chrono::{DateTime, Datelike, Timelike, Utc};
use futures::{Stream, StreamExt};
use rand::RngCore;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::{Result, TardisError};

/// Uniquely identifies one cached slice: a venue, a minute-aligned instant,
/// and a filter-set fingerprint (spec.md §3 `SliceCoordinate`).
#[derive(Debug, Clone)]
pub struct SliceCoordinate {
    pub venue: String,
    pub minute: DateTime<Utc>,
    pub fingerprint: String,
}

fn two_digit(n: u32) -> String {
    format!("{n:02}")
}

/// Resolve the on-disk path for a slice coordinate.
///
/// `<cache_root>/feeds/<venue>/<fingerprint>/<YYYY>/<MM>/<DD>/<HH>/<mm>.json.gz`,
/// with two-digit zero-padded components (spec.md §3 `SlicePath`). Pure —
/// performs no I/O and does not create any directories.
pub fn slice_path(cache_root: &Path, coord: &SliceCoordinate) -> PathBuf {
    cache_root
        .join("feeds")
        .join(&coord.venue)
        .join(&coord.fingerprint)
        .join(coord.minute.year().to_string())
        .join(two_digit(coord.minute.month()))
        .join(two_digit(coord.minute.day()))
        .join(two_digit(coord.minute.hour()))
        .join(format!("{}.json.gz", two_digit(coord.minute.minute())))
}

/// Truncate a timestamp down to its minute boundary (seconds and
/// sub-seconds dropped), per spec.md §4.2.
pub fn truncate_to_minute(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive()
        .and_hms_opt(t.hour(), t.minute(), 0)
        .expect("valid time components")
        .and_utc()
}

fn fresh_temp_path(final_path: &Path) -> PathBuf {
    let mut nonce = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut nonce);
    let mut s = final_path.as_os_str().to_owned();
    s.push(format!("{}.unconfirmed", hex::encode(nonce)));
    PathBuf::from(s)
}

/// Rename `temp_path` into `final_path`, treating "already committed by a
/// concurrent fetcher" as success (spec.md §4.3 step 3: both payloads are
/// equally valid, so the loser's is simply discarded).
async fn commit(temp_path: &Path, final_path: &Path, guard: &mut TempFileGuard) -> Result<()> {
    match tokio::fs::rename(temp_path, final_path).await {
        Ok(()) => {
            guard.disarm();
            Ok(())
        }
        Err(err) => {
            if tokio::fs::try_exists(final_path).await.unwrap_or(false) {
                Ok(())
            } else {
                Err(TardisError::Cache(err))
            }
        }
    }
}

/// Write `bytes` to `final_path` atomically: stream to a uniquely-named
/// `<final><16-hex-nonce>.unconfirmed` sibling, then rename into place.
///
/// The temp file is removed on every exit path — including when this future
/// is cancelled mid-write — via [`TempFileGuard`].
pub async fn write_slice_atomic(final_path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = fresh_temp_path(final_path);
    let mut guard = TempFileGuard::new(temp_path.clone());
    {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
    }

    commit(&temp_path, final_path, &mut guard).await
}

/// Stream `chunks` to `final_path` atomically, chunk-by-chunk, rather than
/// buffering the whole body in memory first (spec.md §4.3 step 3: "stream
/// the response body chunk-by-chunk"). Every `stream.next()` await is a
/// cooperative suspension point (spec.md §5).
///
/// The temp file is removed on every exit path — including when this future
/// is cancelled mid-write, or a chunk errors mid-stream — via
/// [`TempFileGuard`].
pub async fn write_stream_atomic<S, B, E>(final_path: &Path, mut chunks: S) -> Result<()>
where
    S: Stream<Item = std::result::Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: Into<TardisError>,
{
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let temp_path = fresh_temp_path(final_path);
    let mut guard = TempFileGuard::new(temp_path.clone());
    {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk.map_err(Into::into)?;
            file.write_all(chunk.as_ref()).await?;
        }
        file.flush().await?;
    }

    commit(&temp_path, final_path, &mut guard).await
}

/// Removes its temp file on drop unless [`disarm`](Self::disarm) was called.
///
/// Runs synchronously even if the owning future is cancelled mid-`.await`,
/// which is how spec.md §5's "partial `.unconfirmed` files are removed in a
/// scoped cleanup on every exit path" is realized under cooperative
/// cancellation in Rust.
struct TempFileGuard {
    path: PathBuf,
    armed: bool,
}

impl TempFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn path_is_deterministic_and_zero_padded() {
        let coord = SliceCoordinate {
            venue: "bitmex".into(),
            minute: Utc.with_ymd_and_hms(2019, 8, 1, 8, 52, 0).unwrap(),
            fingerprint: "abc123".into(),
        };
        let path = slice_path(Path::new("/cache"), &coord);
        assert_eq!(
            path,
            Path::new("/cache/feeds/bitmex/abc123/2019/08/01/08/52.json.gz")
        );
    }

    #[test]
    fn truncate_drops_seconds_and_subseconds() {
        let t = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 30).unwrap()
            + chrono::Duration::milliseconds(500);
        let truncated = truncate_to_minute(t);
        assert_eq!(
            truncated,
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn atomic_write_then_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("slice.json.gz");
        write_slice_atomic(&final_path, b"payload").await.unwrap();
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"payload");
        // no leftover temp files
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn stream_write_assembles_chunks_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("slice.json.gz");
        let chunks = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(b"pay".to_vec()),
            Ok(b"lo".to_vec()),
            Ok(b"ad".to_vec()),
        ]);
        write_stream_atomic(&final_path, chunks).await.unwrap();
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"payload");
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn stream_write_discards_temp_file_on_chunk_error() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("slice.json.gz");
        let chunks = futures::stream::iter(vec![
            Ok::<_, std::io::Error>(b"pay".to_vec()),
            Err(std::io::Error::other("connection reset")),
        ]);
        assert!(write_stream_atomic(&final_path, chunks).await.is_err());
        assert!(!tokio::fs::try_exists(&final_path).await.unwrap());
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_leave_exactly_one_committed_file() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("slice.json.gz");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let path = final_path.clone();
            handles.push(tokio::spawn(async move {
                write_slice_atomic(&path, b"same-payload").await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(tokio::fs::read(&final_path).await.unwrap(), b"same-payload");
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }
}
