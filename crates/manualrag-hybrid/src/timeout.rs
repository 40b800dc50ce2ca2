//! Bounded calls into external collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use anyhow::Result;

use manualrag_core::error::Error;

/// Workers allowed to run at once, including ones whose caller already
/// timed out.
const MAX_IN_FLIGHT: usize = 64;

static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

/// Runs `task`, giving up after `timeout` when one is set.
///
/// The task runs on its own thread; on timeout it is left to finish in the
/// background and its result is discarded. While `MAX_IN_FLIGHT` workers are
/// still running, new calls fail immediately instead of spawning more.
pub fn run_with_timeout<T, F>(label: &str, timeout: Option<Duration>, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    run_bounded(label, timeout, &IN_FLIGHT, MAX_IN_FLIGHT, task)
}

/// Releases a worker slot when the worker ends, panics included.
struct Slot(&'static AtomicUsize);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn run_bounded<T, F>(
    label: &str,
    timeout: Option<Duration>,
    in_flight: &'static AtomicUsize,
    cap: usize,
    task: F,
) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let Some(limit) = timeout else {
        return task();
    };
    if in_flight.fetch_add(1, Ordering::SeqCst) >= cap {
        in_flight.fetch_sub(1, Ordering::SeqCst);
        return Err(Error::Operation(format!("{label}: {cap} earlier calls are still running")).into());
    }
    let slot = Slot(in_flight);
    let (tx, rx) = mpsc::channel();
    thread::Builder::new()
        .name(format!("manualrag-{label}"))
        .spawn(move || {
            let _slot = slot;
            // the receiver may have given up already
            let _ = tx.send(task());
        })
        .map_err(|e| Error::Operation(format!("{label}: failed to spawn worker: {e}")))?;
    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            Err(Error::Operation(format!("{label} timed out after {} ms", limit.as_millis())).into())
        }
        Err(RecvTimeoutError::Disconnected) => Err(Error::Operation(format!("{label} worker exited without a result")).into()),
    }
}
