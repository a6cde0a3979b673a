//! Background thread that flushes the ingestion buffer on a timer.
//!
//! The flusher has no caller to report to: a failed flush is logged and the
//! records stay buffered, so the next tick retries naturally.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Sender};
use tracing::{debug, warn};

use super::IngestionBuffer;

/// Handle to the periodic flush thread. Dropping it stops the thread.
#[derive(Debug)]
pub struct Flusher {
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Flusher {
    /// Start ticking every `buffer.flush_interval()`.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn start(buffer: Arc<IngestionBuffer>) -> std::io::Result<Self> {
        let (tx, rx) = channel::bounded::<()>(1);
        let ticker = channel::tick(buffer.flush_interval());

        let thread = thread::Builder::new()
            .name("tandem-flush".to_owned())
            .spawn(move || {
                loop {
                    crossbeam::select! {
                        recv(ticker) -> _ => {
                            match buffer.flush_if_due(Instant::now()) {
                                Ok(Some(bytes)) => debug!(bytes, "periodic flush"),
                                Ok(None) => {}
                                Err(err) => warn!(error = %err, "periodic flush failed; will retry"),
                            }
                        }
                        recv(rx) -> _ => break,
                    }
                }
                debug!("flusher stopped");
            })?;

        Ok(Self {
            shutdown: Some(tx),
            thread: Some(thread),
        })
    }

    /// Stop the thread and wait for it to exit. Does not flush.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        // Dropping the sender disconnects the channel, which also wakes the
        // select if the send below races with a full buffer.
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.try_send(());
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("flusher thread panicked");
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.halt();
    }
}
