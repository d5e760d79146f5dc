use super::core::Core;
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-wide shutdown request flag.
///
/// Set once by the signal dispatch thread (or by the main loop on an
/// unrecoverable error) and observed by the trigger loop and the main idle
/// loop. Never cleared.
pub struct ShutdownFlag(AtomicBool);

impl ShutdownFlag {
    pub fn new() -> ShutdownFlag {
        ShutdownFlag(AtomicBool::new(false))
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownFlag {
    fn default() -> Self {
        ShutdownFlag::new()
    }
}

/// Ordered, idempotent teardown.
///
/// Runs at most once; a second terminating signal arriving mid-shutdown
/// re-enters `run` and returns immediately. Each step is safe even when an
/// earlier one partially failed.
pub struct ShutdownSequencer {
    started: AtomicBool,
}

impl ShutdownSequencer {
    pub fn new() -> ShutdownSequencer {
        ShutdownSequencer {
            started: AtomicBool::new(false),
        }
    }

    pub fn run(&self, core: &Core) {
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress");
            return;
        }

        core.flag().request();
        core.trigger().stop();
        warn!("Cleaning up and exiting...");
        // Late messages fall back to stderr once the sink is closed.
        core.sink().close();
        core.supervisor().release_channel();
        core.pid_file().remove();
    }
}

impl Default for ShutdownSequencer {
    fn default() -> Self {
        ShutdownSequencer::new()
    }
}
