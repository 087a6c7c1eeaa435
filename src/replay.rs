//! The Replay Iterator (spec.md §4.5): consumes cached slices strictly in
//! ascending minute order, detecting producer completion purely through
//! filesystem polling.

use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use futures::stream::{self, Stream};
use std::collections::VecDeque;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::cache::{slice_path, SliceCoordinate};
use crate::error::{Result, TardisError};
use crate::types::Response;

const READINESS_POLL: std::time::Duration = std::time::Duration::from_millis(100);
const TIMESTAMP_LEN: usize = 28;
const DECODED_TIMESTAMP_LEN: usize = 26;

struct ReplayState {
    cache_dir: PathBuf,
    venue: String,
    fingerprint: String,
    current_minute: DateTime<Utc>,
    end: DateTime<Utc>,
    decode: bool,
    orchestrator: Option<JoinHandle<Result<()>>>,
    pending: VecDeque<Response>,
    done: bool,
}

/// Yield every non-empty record from every minute slice in `[from, to)`, in
/// ascending minute order, waiting for the orchestrator to populate the
/// cache as needed (spec.md §4.5).
///
/// `orchestrator` is the [`JoinHandle`] of the concurrently running
/// [`crate::orchestrator::download_range`] task; its completion (success or
/// error) is checked on every readiness poll, and it is always awaited once
/// more after the last minute so a trailing error is never dropped.
pub fn replay_stream(
    cache_dir: PathBuf,
    venue: String,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    fingerprint: String,
    decode: bool,
    orchestrator: JoinHandle<Result<()>>,
) -> impl Stream<Item = Result<Response>> {
    let state = ReplayState {
        cache_dir,
        venue,
        fingerprint,
        current_minute: from,
        end: to,
        decode,
        orchestrator: Some(orchestrator),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(response) = state.pending.pop_front() {
                return Some((Ok(response), state));
            }

            if state.done {
                return None;
            }

            if state.current_minute >= state.end {
                if let Some(handle) = state.orchestrator.take() {
                    match handle.await {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return Some((Err(err), state)),
                        Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
                    }
                }
                return None;
            }

            match load_next_slice(&mut state).await {
                Ok(()) => continue,
                Err(err) => {
                    state.done = true;
                    return Some((Err(err), state));
                }
            }
        }
    })
}

async fn load_next_slice(state: &mut ReplayState) -> Result<()> {
    let coord = SliceCoordinate {
        venue: state.venue.clone(),
        minute: state.current_minute,
        fingerprint: state.fingerprint.clone(),
    };
    let path = slice_path(&state.cache_dir, &coord);

    loop {
        tokio::task::yield_now().await;

        if let Some(handle) = &state.orchestrator {
            if handle.is_finished() {
                let handle = state.orchestrator.take().expect("checked Some above");
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => return Err(err),
                    Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
                }
            }
        }

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            break;
        }
        trace!(path = %path.display(), "waiting for slice");
        tokio::time::sleep(READINESS_POLL).await;
    }

    let decode = state.decode;
    let path_for_blocking = path.clone();
    let records =
        match tokio::task::spawn_blocking(move || read_slice_records(&path_for_blocking, decode))
            .await
        {
            Ok(result) => result?,
            Err(join_err) => std::panic::resume_unwind(join_err.into_panic()),
        };

    state.pending.extend(records);
    state.current_minute += chrono::Duration::seconds(60);
    Ok(())
}

fn read_slice_records(path: &Path, decode: bool) -> Result<Vec<Response>> {
    let file = std::fs::File::open(path)?;
    let decoder = GzDecoder::new(file);
    let mut reader = std::io::BufReader::new(decoder);
    let mut records = Vec::new();
    let mut line = Vec::new();

    loop {
        line.clear();
        let bytes_read = reader.read_until(b'\n', &mut line)?;
        if bytes_read == 0 {
            break;
        }
        if line.len() <= 1 {
            continue;
        }
        records.push(parse_record(&line, decode)?);
    }

    Ok(records)
}

fn parse_record(line: &[u8], decode: bool) -> Result<Response> {
    if line.len() <= TIMESTAMP_LEN + 1 {
        return Err(TardisError::Logic(format!(
            "slice record too short: {} bytes",
            line.len()
        )));
    }

    if decode {
        let timestamp_str = std::str::from_utf8(&line[..DECODED_TIMESTAMP_LEN])
            .map_err(|e| TardisError::Logic(format!("invalid timestamp utf-8: {e}")))?;
        let naive = NaiveDateTime::parse_from_str(timestamp_str, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|e| TardisError::Logic(format!("invalid timestamp '{timestamp_str}': {e}")))?;
        let message_bytes = trim_trailing_newline(&line[TIMESTAMP_LEN + 1..]);
        let message = serde_json::from_slice(message_bytes)?;
        Ok(Response::Decoded {
            local_timestamp: naive.and_utc(),
            message,
        })
    } else {
        let local_timestamp = line[..TIMESTAMP_LEN].to_vec();
        let message = trim_trailing_newline(&line[TIMESTAMP_LEN + 1..]).to_vec();
        Ok(Response::Raw {
            local_timestamp,
            message,
        })
    }
}

fn trim_trailing_newline(bytes: &[u8]) -> &[u8] {
    if bytes.last() == Some(&b'\n') {
        &bytes[..bytes.len() - 1]
    } else {
        bytes
    }
}

/// Convenience wrapper used by tests to drain an already-populated cache
/// without an orchestrator: spawns a no-op task so [`replay_stream`] can
/// treat it uniformly.
#[cfg(test)]
pub(crate) fn noop_orchestrator() -> JoinHandle<Result<()>> {
    tokio::spawn(async { Ok(()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use futures::StreamExt;
    use std::io::Write;

    fn write_gz_slice(path: &Path, lines: &[&str]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::default());
        for line in lines {
            encoder.write_all(line.as_bytes()).unwrap();
            encoder.write_all(b"\n").unwrap();
        }
        encoder.finish().unwrap();
    }

    #[tokio::test]
    async fn replays_cached_slices_in_order_without_http() {
        let dir = tempfile::tempdir().unwrap();
        let venue = "bitmex".to_string();
        let fingerprint = crate::filter::EMPTY_FILTER_FINGERPRINT.to_string();
        let from = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let to = from + chrono::Duration::seconds(120);

        for offset in 0..2 {
            let coord = SliceCoordinate {
                venue: venue.clone(),
                minute: from + chrono::Duration::seconds(offset * 60),
                fingerprint: fingerprint.clone(),
            };
            let path = slice_path(dir.path(), &coord);
            write_gz_slice(
                &path,
                &[&format!(
                    "2019-08-01T08:52:00.0324272Z {{\"offset\":{offset}}}"
                )],
            );
        }

        let stream = replay_stream(
            dir.path().to_path_buf(),
            venue,
            from,
            to,
            fingerprint,
            true,
            noop_orchestrator(),
        );
        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 2);
        for (i, result) in results.into_iter().enumerate() {
            match result.unwrap() {
                Response::Decoded { message, .. } => {
                    assert_eq!(message["offset"], i as i64);
                }
                _ => panic!("expected decoded response"),
            }
        }
    }

    #[tokio::test]
    async fn raw_mode_preserves_exact_byte_spans() {
        let dir = tempfile::tempdir().unwrap();
        let venue = "bitmex".to_string();
        let fingerprint = crate::filter::EMPTY_FILTER_FINGERPRINT.to_string();
        let from = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let to = from + chrono::Duration::seconds(60);
        let coord = SliceCoordinate {
            venue: venue.clone(),
            minute: from,
            fingerprint: fingerprint.clone(),
        };
        let path = slice_path(dir.path(), &coord);
        write_gz_slice(&path, &["2019-08-01T08:52:00.0324272Z {\"a\":1}"]);

        let stream = replay_stream(
            dir.path().to_path_buf(),
            venue,
            from,
            to,
            fingerprint,
            false,
            noop_orchestrator(),
        );
        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 1);
        match results.into_iter().next().unwrap().unwrap() {
            Response::Raw {
                local_timestamp,
                message,
            } => {
                assert_eq!(local_timestamp, b"2019-08-01T08:52:00.0324272Z");
                assert_eq!(message, b"{\"a\":1}");
            }
            _ => panic!("expected raw response"),
        }
    }

    #[tokio::test]
    async fn empty_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let fingerprint = crate::filter::EMPTY_FILTER_FINGERPRINT.to_string();
        let from = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let to = from + chrono::Duration::seconds(60);
        let coord = SliceCoordinate {
            venue: "bitmex".into(),
            minute: from,
            fingerprint: fingerprint.clone(),
        };
        let path = slice_path(dir.path(), &coord);
        write_gz_slice(&path, &["", "2019-08-01T08:52:00.0324272Z {\"a\":1}", ""]);

        let stream = replay_stream(
            dir.path().to_path_buf(),
            "bitmex".into(),
            from,
            to,
            fingerprint,
            true,
            noop_orchestrator(),
        );
        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn orchestrator_error_propagates_to_consumer() {
        let dir = tempfile::tempdir().unwrap();
        let fingerprint = crate::filter::EMPTY_FILTER_FINGERPRINT.to_string();
        let from = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let to = from + chrono::Duration::seconds(60);

        let orchestrator: JoinHandle<Result<()>> = tokio::spawn(async {
            Err(TardisError::Api {
                status: 401,
                url: "http://x".into(),
                message: "unauthorized".into(),
            })
        });

        let stream = replay_stream(
            dir.path().to_path_buf(),
            "bitmex".into(),
            from,
            to,
            fingerprint,
            true,
            orchestrator,
        );
        let results: Vec<_> = stream.collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());
    }
}
