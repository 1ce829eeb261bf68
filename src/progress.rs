// Progress reporting for uploads.
//
// The uploader only knows about `ProgressSink`: anything that can receive a
// byte-count increment. The terminal bar lives in `ui`; this module holds the
// bookkeeping and the non-visual sinks.

use tracing::{debug, info};

/// Receives progress events for one upload. Implementations run on the
/// uploading thread between chunks, so they must be quick and must not fail.
pub trait ProgressSink {
    /// Called once before any bytes move.
    fn begin(&mut self, _total: u64) {}

    /// Called after `bytes` more bytes were accepted by the store.
    fn advance(&mut self, bytes: u64);

    /// Called once after the last chunk, on success only.
    fn finish(&mut self) {}
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn advance(&mut self, _bytes: u64) {}
}

/// Emits progress as tracing events, for `--quiet` runs and non-tty output.
#[derive(Debug, Default)]
pub struct LogProgress {
    total: u64,
    done: u64,
}

impl ProgressSink for LogProgress {
    fn begin(&mut self, total: u64) {
        self.total = total;
        self.done = 0;
        debug!(total, "upload started");
    }

    fn advance(&mut self, bytes: u64) {
        self.done += bytes;
        debug!(done = self.done, total = self.total, "upload progress");
    }

    fn finish(&mut self) {
        info!(bytes = self.done, "upload finished");
    }
}

/// Total size and bytes transferred so far. `transferred` only grows and
/// never passes `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressState {
    total: u64,
    transferred: u64,
}

impl ProgressState {
    pub fn new(total: u64) -> Self {
        ProgressState { total, transferred: 0 }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn transferred(&self) -> u64 {
        self.transferred
    }

    pub fn is_complete(&self) -> bool {
        self.transferred == self.total
    }

    /// Record `bytes` more and return the increment actually applied, which
    /// is clamped at the total.
    pub fn record(&mut self, bytes: u64) -> u64 {
        let applied = bytes.min(self.total - self.transferred);
        self.transferred += applied;
        applied
    }
}

/// Couples a `ProgressState` with a sink so that the sink only ever sees
/// increments that keep the state consistent.
pub struct ProgressReporter<'a> {
    state: ProgressState,
    sink: &'a mut dyn ProgressSink,
}

impl<'a> ProgressReporter<'a> {
    pub fn start(total: u64, sink: &'a mut dyn ProgressSink) -> Self {
        sink.begin(total);
        ProgressReporter {
            state: ProgressState::new(total),
            sink,
        }
    }

    pub fn record(&mut self, bytes: u64) {
        let applied = self.state.record(bytes);
        if applied > 0 {
            self.sink.advance(applied);
        }
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    pub fn finish(self) {
        self.sink.finish();
    }
}
