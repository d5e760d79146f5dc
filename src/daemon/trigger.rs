use super::error::DaemonError;
use super::shutdown::ShutdownFlag;
use super::supervisor::CaptureProcessHandle;
use crate::config::Config;
use log::{debug, info};
use nix::sys::signal::{kill, Signal};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Upper bound on how long the trigger loop sleeps without checking the
/// shutdown flag.
const POLL_SLICE: Duration = Duration::from_millis(250);

/// Cadence of capture requests, read once at thread start.
///
/// The period is deliberately not hot-reloaded; a config reload only
/// affects the log level.
#[derive(Clone, Copy)]
pub struct TriggerCadence {
    pub period: Duration,
    pub warmup: Duration,
    pub signal: Signal,
}

impl TriggerCadence {
    /// Reads the cadence from configuration. `capture.frequency` must be a
    /// positive number of seconds; a missing value is a startup failure.
    pub fn from_config(config: &Config) -> Result<TriggerCadence, DaemonError> {
        let frequency = config.get_int("capture.frequency");
        if frequency <= 0 {
            return Err(DaemonError::MissingConfig(
                "capture.frequency".to_string(),
            ));
        }
        let warmup = config.get_int("capture.warmup").max(0);

        let name = config.get_str("capture.trigger_signal");
        let signal = if name.is_empty() {
            // Distinct from the daemon's own SIGUSR1 log toggle.
            Signal::SIGUSR2
        } else {
            parse_signal(&name).ok_or_else(|| DaemonError::InvalidConfig {
                key: "capture.trigger_signal".to_string(),
                value: name.clone(),
            })?
        };

        Ok(TriggerCadence {
            period: Duration::from_secs(frequency as u64),
            warmup: Duration::from_secs(warmup as u64),
            signal,
        })
    }
}

fn parse_signal(name: &str) -> Option<Signal> {
    match name.trim().to_ascii_uppercase().as_str() {
        "SIGUSR1" | "USR1" => Some(Signal::SIGUSR1),
        "SIGUSR2" | "USR2" => Some(Signal::SIGUSR2),
        "SIGHUP" | "HUP" => Some(Signal::SIGHUP),
        "SIGALRM" | "ALRM" => Some(Signal::SIGALRM),
        "SIGCONT" | "CONT" => Some(Signal::SIGCONT),
        _ => None,
    }
}

/// Background thread requesting captures at a fixed cadence.
///
/// A plain worker around a closure; stop is requested through the shared
/// shutdown flag and completes within one poll slice.
pub struct TriggerThread {
    shutdown: Arc<ShutdownFlag>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TriggerThread {
    pub fn new(shutdown: Arc<ShutdownFlag>) -> TriggerThread {
        TriggerThread {
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Starts the trigger loop. Must only be called after the PID handoff
    /// has completed, which the startup sequence guarantees.
    pub fn start(
        &self,
        cadence: TriggerCadence,
        handle: Arc<CaptureProcessHandle>,
    ) -> Result<(), DaemonError> {
        let shutdown = Arc::clone(&self.shutdown);
        let worker = thread::Builder::new()
            .name("capture-trigger".to_string())
            .spawn(move || {
                debug!(
                    "Trigger period read as {}s (warm-up {}s)",
                    cadence.period.as_secs(),
                    cadence.warmup.as_secs()
                );
                run_loop(&cadence, &shutdown, || {
                    send_trigger(&handle, cadence.signal)
                });
            })
            .map_err(|source| DaemonError::ThreadStart { source })?;

        *self.worker.lock() = Some(worker);
        Ok(())
    }

    /// Requests the loop to stop and waits for it to finish its current
    /// iteration. Calling a second time is a no-op.
    pub fn stop(&self) {
        self.shutdown.request();
        if let Some(worker) = self.worker.lock().take() {
            worker.join().ok();
            info!("Capture trigger thread stopped");
        }
    }
}

/// The trigger loop proper. The first tick happens after the warm-up when
/// one is configured, otherwise after one full period; every tick after
/// that is one period apart until shutdown is requested.
fn run_loop<F: FnMut()>(
    cadence: &TriggerCadence,
    shutdown: &ShutdownFlag,
    mut tick: F,
) {
    if cadence.warmup > Duration::from_secs(0) {
        if !sleep_unless_shutdown(cadence.warmup, shutdown) {
            return;
        }
        tick();
    }
    loop {
        if !sleep_unless_shutdown(cadence.period, shutdown) {
            return;
        }
        tick();
    }
}

/// Sleeps for the given duration in slices, polling the shutdown flag.
/// Returns false as soon as shutdown is observed.
fn sleep_unless_shutdown(duration: Duration, shutdown: &ShutdownFlag) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.is_requested() {
            return false;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining == Duration::from_secs(0) {
            return true;
        }
        thread::sleep(remaining.min(POLL_SLICE));
    }
}

fn send_trigger(handle: &CaptureProcessHandle, signal: Signal) {
    match handle.pid() {
        Some(pid) if !handle.is_reaped() => {
            debug!("Requesting capture from process ({})", pid);
            if let Err(e) = kill(pid, signal) {
                info!("Capture request to process ({}) failed: {}", pid, e);
            }
        }
        Some(pid) => {
            debug!("Capture process ({}) already reaped, skipping", pid)
        }
        None => debug!("Capture PID not yet known, skipping"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cadence(period_ms: u64, warmup_ms: u64) -> TriggerCadence {
        TriggerCadence {
            period: Duration::from_millis(period_ms),
            warmup: Duration::from_millis(warmup_ms),
            signal: Signal::SIGUSR2,
        }
    }

    #[test]
    fn first_tick_waits_one_full_period_without_warmup() {
        let shutdown = ShutdownFlag::new();
        let start = Instant::now();
        let mut first_tick = None;
        run_loop(&cadence(50, 0), &shutdown, || {
            first_tick.get_or_insert_with(Instant::now);
            shutdown.request();
        });
        assert!(first_tick.unwrap() - start >= Duration::from_millis(50));
    }

    #[test]
    fn warmup_delays_only_the_first_tick() {
        let shutdown = ShutdownFlag::new();
        let start = Instant::now();
        let mut first_tick = None;
        run_loop(&cadence(500, 50), &shutdown, || {
            first_tick.get_or_insert_with(Instant::now);
            shutdown.request();
        });
        let elapsed = first_tick.unwrap() - start;
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[test]
    fn ticks_exactly_once_per_period_until_shutdown() {
        // Three periods, then shutdown: exactly three ticks.
        let shutdown = Arc::new(ShutdownFlag::new());
        let ticks = Arc::new(AtomicU32::new(0));

        let loop_flag = Arc::clone(&shutdown);
        let loop_ticks = Arc::clone(&ticks);
        let start = Instant::now();
        let worker = thread::spawn(move || {
            run_loop(&cadence(30, 0), &loop_flag, || {
                if loop_ticks.fetch_add(1, Ordering::SeqCst) + 1 == 3 {
                    loop_flag.request();
                }
            });
        });
        worker.join().unwrap();

        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[test]
    fn loop_exits_within_a_poll_slice_of_shutdown() {
        let shutdown = Arc::new(ShutdownFlag::new());
        let loop_flag = Arc::clone(&shutdown);

        let worker = thread::spawn(move || {
            // Long period; only the shutdown flag can end this quickly.
            run_loop(&cadence(60_000, 0), &loop_flag, || {});
        });
        thread::sleep(Duration::from_millis(50));
        let requested = Instant::now();
        shutdown.request();
        worker.join().unwrap();
        assert!(requested.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn stop_twice_is_a_noop() {
        let trigger = TriggerThread::new(Arc::new(ShutdownFlag::new()));
        trigger.stop();
        trigger.stop();
    }

    #[test]
    fn triggering_without_a_pid_is_a_noop() {
        let handle = CaptureProcessHandle::new();
        send_trigger(&handle, Signal::SIGUSR2);
    }

    #[test]
    fn triggering_a_reaped_handle_does_not_signal() {
        let handle = CaptureProcessHandle::new();
        handle.store_pid(nix::unistd::getpid());
        handle.mark_reaped();
        // Sending SIGKILL to a reaped handle must be skipped, or this
        // test would bring the harness down.
        send_trigger(&handle, Signal::SIGKILL);
    }

    #[test]
    fn signal_names_parse_with_and_without_prefix() {
        assert_eq!(parse_signal("SIGUSR1"), Some(Signal::SIGUSR1));
        assert_eq!(parse_signal("usr2"), Some(Signal::SIGUSR2));
        assert_eq!(parse_signal("bogus"), None);
    }
}
