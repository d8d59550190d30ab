//! Cooperative stop signal for the serve loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Flag {
    Shared(Arc<AtomicBool>),
    Static(&'static AtomicBool),
}

/// Cancellation token checked once per loop iteration
///
/// Cloning yields a handle to the same flag. Signal handlers can only
/// touch statics, so a token can also wrap a `static AtomicBool`.
#[derive(Debug, Clone)]
pub struct StopToken {
    flag: Flag,
}

impl StopToken {
    pub fn new() -> Self {
        Self {
            flag: Flag::Shared(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Token backed by a process-wide flag (e.g. set from a signal handler)
    pub fn from_static(flag: &'static AtomicBool) -> Self {
        Self {
            flag: Flag::Static(flag),
        }
    }

    fn atomic(&self) -> &AtomicBool {
        match &self.flag {
            Flag::Shared(flag) => flag,
            Flag::Static(flag) => flag,
        }
    }

    /// Request the loop to stop after its current iteration
    pub fn stop(&self) {
        self.atomic().store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.atomic().load(Ordering::Relaxed)
    }
}

impl Default for StopToken {
    fn default() -> Self {
        Self::new()
    }
}
