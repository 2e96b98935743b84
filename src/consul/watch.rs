//! Blocking-query watches.
//!
//! A watch repeatedly issues a blocking query and yields a notification on
//! the first answer and whenever the index moves. Errors are retried with
//! backoff, so the stream never ends on its own.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};

use crate::discovery::{CatalogError, Notification, WatchStream};
use crate::resilience::Backoff;

const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(60);

struct WatchState<F> {
    label: String,
    fetch: F,
    /// Index sent with the next query.
    query_index: u64,
    /// Index of the last notification, `None` before the first one.
    last_seen: Option<u64>,
    backoff: Backoff,
}

/// Turn `fetch(index) -> new_index` into a notification stream.
pub fn blocking_watch<F, Fut>(label: impl Into<String>, fetch: F) -> WatchStream
where
    F: Fn(u64) -> Fut + Send + 'static,
    Fut: Future<Output = Result<u64, CatalogError>> + Send + 'static,
{
    blocking_watch_with(label, fetch, Backoff::new(RETRY_BASE, RETRY_MAX))
}

pub(crate) fn blocking_watch_with<F, Fut>(label: impl Into<String>, fetch: F, backoff: Backoff) -> WatchStream
where
    F: Fn(u64) -> Fut + Send + 'static,
    Fut: Future<Output = Result<u64, CatalogError>> + Send + 'static,
{
    let state = WatchState {
        label: label.into(),
        fetch,
        query_index: 0,
        last_seen: None,
        backoff,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            match (state.fetch)(state.query_index).await {
                Ok(index) => {
                    state.backoff.reset();
                    // A zero index would make every query non-blocking; an
                    // index moving backwards means the server state was reset,
                    // so start over without blocking.
                    let next = index.max(1);
                    state.query_index = if next < state.query_index { 0 } else { next };

                    if state.last_seen != Some(index) {
                        state.last_seen = Some(index);
                        return Some((Notification { index }, state));
                    }
                }
                Err(e) => {
                    let delay = state.backoff.next_delay();
                    tracing::warn!(
                        watch = %state.label,
                        error = %e,
                        failures = state.backoff.failures(),
                        retry_in = ?delay,
                        "Watch query failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    })
    .boxed()
}
