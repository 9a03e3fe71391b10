//! Output routing strategies.
//!
//! Each session is in exactly one of two modes. Line mode batches clean
//! text and merges it into the in-flight command block on a 50 ms cadence
//! (or immediately under pressure). Interactive mode forwards raw bytes,
//! escapes and all, straight to the display collaborator and suspends
//! block accumulation entirely. Switching modes is a single enum
//! replacement performed by the session manager.

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::block::CommandBlock;
use crate::session::OutputEvent;

/// Cadence of the periodic batch flush.
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(50);

/// Pending chunks beyond this force an immediate flush.
pub const PRESSURE_FLUSH_LEN: usize = 100;

/// The external display for interactive mode. The core does not dictate
/// how it renders.
pub trait RawPresenter: Send + Sync {
    fn present_raw(&self, text: &str);
}

/// A merged batch delivered to the manager's dispatch context, mirrored
/// into the flat message log in traditional view. `detached` is set when
/// no command block was in flight to absorb the text.
#[derive(Debug, Clone)]
pub struct BatchFlush {
    pub session_id: String,
    pub output: String,
    pub error: String,
    pub detached: bool,
    pub is_final: bool,
}

#[derive(Debug, Default)]
struct PendingChunks {
    output: Vec<String>,
    error: Vec<String>,
}

impl PendingChunks {
    fn len(&self) -> usize {
        self.output.len() + self.error.len()
    }

    fn is_empty(&self) -> bool {
        self.output.is_empty() && self.error.is_empty()
    }
}

/// Line-mode accumulator for one session.
pub struct LineBatcher {
    session_id: String,
    pending: Arc<Mutex<PendingChunks>>,
    /// The block currently absorbing output. Weak: the block's lifetime
    /// belongs to the session's block log, not to the output path.
    in_flight: Arc<Mutex<Weak<Mutex<CommandBlock>>>>,
    sink: mpsc::UnboundedSender<BatchFlush>,
    ticker: Option<JoinHandle<()>>,
}

impl LineBatcher {
    pub fn new(session_id: impl Into<String>, sink: mpsc::UnboundedSender<BatchFlush>) -> Self {
        Self {
            session_id: session_id.into(),
            pending: Arc::new(Mutex::new(PendingChunks::default())),
            in_flight: Arc::new(Mutex::new(Weak::new())),
            sink,
            ticker: None,
        }
    }

    /// Point the batcher at the block now absorbing output and start the
    /// periodic flush. Called by the manager at dispatch time.
    pub fn begin(&mut self, block: &Arc<Mutex<CommandBlock>>) {
        self.set_in_flight(Arc::downgrade(block));
        self.stop_ticker();

        let pending = Arc::clone(&self.pending);
        let in_flight = Arc::clone(&self.in_flight);
        let sink = self.sink.clone();
        let session_id = self.session_id.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                flush_pending(&session_id, &pending, &in_flight, &sink, false);
            }
        }));
    }

    /// Enqueue one decoded chunk. Triggers an early flush under pressure.
    pub fn enqueue(&self, clean: &str, is_error_channel: bool) {
        if clean.is_empty() {
            return;
        }
        let should_flush = {
            let mut pending = lock_unpoisoned(&self.pending);
            if is_error_channel {
                pending.error.push(clean.to_string());
            } else {
                pending.output.push(clean.to_string());
            }
            pending.len() >= PRESSURE_FLUSH_LEN
        };
        if should_flush {
            trace!(session_id = %self.session_id, "pressure flush");
            flush_pending(&self.session_id, &self.pending, &self.in_flight, &self.sink, false);
        }
    }

    /// Stop the ticker and force a final drain. Called when the dispatch
    /// completes; the in-flight reference is cleared afterwards.
    pub fn complete(&mut self) {
        self.stop_ticker();
        flush_pending(&self.session_id, &self.pending, &self.in_flight, &self.sink, true);
        self.set_in_flight(Weak::new());
    }

    fn set_in_flight(&self, block: Weak<Mutex<CommandBlock>>) {
        *lock_unpoisoned(&self.in_flight) = block;
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

impl Drop for LineBatcher {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn flush_pending(
    session_id: &str,
    pending: &Arc<Mutex<PendingChunks>>,
    in_flight: &Arc<Mutex<Weak<Mutex<CommandBlock>>>>,
    sink: &mpsc::UnboundedSender<BatchFlush>,
    is_final: bool,
) {
    let drained = {
        let mut guard = lock_unpoisoned(pending);
        if guard.is_empty() && !is_final {
            return;
        }
        std::mem::take(&mut *guard)
    };

    let output = drained.output.concat();
    let error = drained.error.concat();

    let block = lock_unpoisoned(in_flight).upgrade();
    let detached = match block {
        Some(block) => {
            let mut block = lock_unpoisoned(&block);
            block.append_output(&output);
            block.append_error(&error);
            false
        }
        None => true,
    };

    // Mirror into the manager's message log (and let it observe completion
    // even when the batch itself is empty).
    let _ = sink.send(BatchFlush {
        session_id: session_id.to_string(),
        output,
        error,
        detached,
        is_final,
    });
}

/// The strategy pair. Exactly one case is active per session.
pub enum OutputHandler {
    Line(LineBatcher),
    Interactive(Arc<dyn RawPresenter>),
}

impl OutputHandler {
    pub fn is_interactive(&self) -> bool {
        matches!(self, OutputHandler::Interactive(_))
    }

    /// Route one output event according to the active strategy.
    pub fn handle(&self, event: &OutputEvent) {
        match self {
            OutputHandler::Line(batcher) => batcher.enqueue(&event.clean, event.is_error_channel),
            OutputHandler::Interactive(presenter) => presenter.present_raw(&event.raw),
        }
    }
}
