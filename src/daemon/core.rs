use super::pidfile::PidFile;
use super::shutdown::{ShutdownFlag, ShutdownSequencer};
use super::supervisor::Supervisor;
use super::trigger::TriggerThread;
use crate::config::Config;
use crate::logger::LogSink;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_PID_FILE: &str = "shutterd.pid";

/// The daemon's service context.
///
/// Built once at startup and passed explicitly to whatever needs it; there
/// are no ambient singletons. The signal dispatch thread holds an `Arc` to
/// it so every handler action goes through the same components.
pub struct Core {
    config: Arc<Config>,
    sink: Arc<LogSink>,
    flag: Arc<ShutdownFlag>,
    supervisor: Supervisor,
    trigger: TriggerThread,
    sequencer: ShutdownSequencer,
    pid_file: PidFile,
}

impl Core {
    pub fn new(config: Arc<Config>, sink: Arc<LogSink>) -> Core {
        let flag = Arc::new(ShutdownFlag::new());
        let pid_path = match config.get_str("daemon.pid_file") {
            ref path if path.is_empty() => PathBuf::from(DEFAULT_PID_FILE),
            path => PathBuf::from(path),
        };

        Core {
            supervisor: Supervisor::new(),
            trigger: TriggerThread::new(Arc::clone(&flag)),
            sequencer: ShutdownSequencer::new(),
            pid_file: PidFile::new(pid_path),
            config,
            sink,
            flag,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sink(&self) -> &LogSink {
        &self.sink
    }

    pub fn flag(&self) -> &ShutdownFlag {
        &self.flag
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn trigger(&self) -> &TriggerThread {
        &self.trigger
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }

    /// Runs the shutdown sequence. Safe to call from any thread, any
    /// number of times.
    pub fn shutdown(&self) {
        self.sequencer.run(self);
    }
}
