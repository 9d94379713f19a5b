//! Call-site timing wrapper.
//!
//! Wraps any future in a tracing span and measures how long it took.
//! Composed explicitly where timing is wanted instead of being attached to
//! methods implicitly.

use std::{future::Future, time::Duration};

use tracing::{debug, info_span, Instrument};

/// Runs `future` inside an `operation` span and returns its output together
/// with the elapsed wall time.
pub async fn timed<F>(operation: &'static str, future: F) -> (F::Output, Duration)
where
    F: Future,
{
    let span = info_span!("timed", operation);
    async move {
        let start = std::time::Instant::now();
        let output = future.await;
        let elapsed = start.elapsed();
        debug!(operation, elapsed_ms = elapsed.as_millis(), "operation finished");
        (output, elapsed)
    }
    .instrument(span)
    .await
}
