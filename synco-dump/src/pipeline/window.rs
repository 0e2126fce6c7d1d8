use crate::error::{DumpError, Result};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Counts statements that were handed off but not yet executed, with
/// hysteresis: once `high` statements are in flight new hand-offs are held
/// until the count drains to `low`.
pub struct InFlightWindow {
    state: Mutex<WindowState>,
    drained: Condvar,
    high: usize,
    low: usize,
}

#[derive(Debug, Default)]
struct WindowState {
    in_flight: usize,
    held: bool,
    closed: bool,
    peak: usize,
    holds: u64,
}

impl InFlightWindow {
    pub fn new(high: usize) -> Self {
        Self::with_watermarks(high, 0)
    }

    pub fn with_watermarks(high: usize, low: usize) -> Self {
        let high = high.max(1);
        Self {
            state: Mutex::new(WindowState::default()),
            drained: Condvar::new(),
            high,
            low: low.min(high - 1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reserve a slot for one statement, blocking while the window is held.
    pub fn acquire(&self) -> Result<()> {
        let mut state = self.lock();
        while state.held && !state.closed {
            state = self
                .drained
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if state.closed {
            return Err(DumpError::Cancelled);
        }

        state.in_flight += 1;
        state.peak = state.peak.max(state.in_flight);
        if state.in_flight >= self.high {
            state.held = true;
            state.holds += 1;
        }
        Ok(())
    }

    /// Mark one statement as executed.
    pub fn release(&self) {
        let mut state = self.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.held && state.in_flight <= self.low {
            state.held = false;
            self.drained.notify_all();
        }
    }

    /// Fail every current and future [`acquire`](Self::acquire).
    pub fn close(&self) {
        let mut state = self.lock();
        state.closed = true;
        self.drained.notify_all();
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    /// Highest number of statements that were in flight at once.
    pub fn peak(&self) -> usize {
        self.lock().peak
    }

    /// How often the high watermark was reached.
    pub fn holds(&self) -> u64 {
        self.lock().holds
    }
}
