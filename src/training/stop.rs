//! Cooperative stop requests, checked by the trainer between steps

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared flag that asks a running trainer to stop at the next step boundary.
///
/// Clones share the flag, so one clone can live in a signal handler while
/// another is held by the trainer.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Why a run ended before its step budget was used up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Requested,
    Deadline,
}

/// Stop signal plus an optional wall-clock budget
#[derive(Debug, Clone)]
pub(crate) struct StopCheck {
    signal: StopSignal,
    deadline: Option<Instant>,
}

impl StopCheck {
    pub(crate) fn new(signal: StopSignal, budget: Option<Duration>) -> Self {
        Self {
            signal,
            deadline: budget.map(|b| Instant::now() + b),
        }
    }

    pub(crate) fn poll(&self) -> Option<StopReason> {
        if self.signal.is_requested() {
            return Some(StopReason::Requested);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StopReason::Deadline),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let signal = StopSignal::new();
        let handler_copy = signal.clone();
        assert!(!signal.is_requested());
        handler_copy.request_stop();
        assert!(signal.is_requested());
    }

    #[test]
    fn test_poll_reports_reason() {
        let signal = StopSignal::new();
        let check = StopCheck::new(signal.clone(), None);
        assert_eq!(check.poll(), None);
        signal.request_stop();
        assert_eq!(check.poll(), Some(StopReason::Requested));

        let expired = StopCheck::new(StopSignal::new(), Some(Duration::ZERO));
        assert_eq!(expired.poll(), Some(StopReason::Deadline));
    }
}
