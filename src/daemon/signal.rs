use crate::daemon::Core;
use crate::logger::{mask_from_str, LEVEL_DEBUG, LEVEL_INFO};
use log::{error, warn};
use signal_hook::iterator::Signals;
use signal_hook::{SIGCHLD, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use std::error::Error;
use std::sync::Arc;

/// Installs the daemon's signal dispatch.
///
/// The actual OS handlers only enqueue; the dedicated thread spawned here
/// drains them and does the real work in normal context, so reaping,
/// logging, config reloads and level changes never run inside an async
/// signal handler.
pub fn setup_signal_handlers(core: Arc<Core>) -> Result<(), Box<dyn Error>> {
    let signals =
        Signals::new(&[SIGCHLD, SIGINT, SIGTERM, SIGUSR1, SIGUSR2])?;

    std::thread::Builder::new()
        .name("signal-dispatch".to_string())
        .spawn(move || {
            for sig in signals.forever() {
                match sig {
                    SIGCHLD => {
                        core.supervisor().reap();
                    }
                    SIGINT | SIGTERM => {
                        let name =
                            if sig == SIGINT { "SIGINT" } else { "SIGTERM" };
                        warn!("Detected {}, cleaning up...", name);
                        core.shutdown();
                        std::process::exit(0);
                    }
                    SIGUSR1 => {
                        warn!("Detected SIGUSR1, toggling info/debug logging");
                        // Two independent flips, not one combined flag.
                        core.sink().toggle(LEVEL_INFO);
                        core.sink().toggle(LEVEL_DEBUG);
                    }
                    SIGUSR2 => {
                        warn!("Detected SIGUSR2, reloading config...");
                        match core.config().reload() {
                            Ok(()) => {
                                // The only live-tunable value is the log
                                // level; the trigger period was consumed
                                // at thread start.
                                let level = core.config().get_str("log.level");
                                core.sink().set_mask(mask_from_str(&level));
                            }
                            Err(e) => {
                                error!("Config reload failed: {:#}", e)
                            }
                        }
                    }
                    _ => unreachable!("unregistered signal delivered"),
                }
            }
        })?;
    Ok(())
}
