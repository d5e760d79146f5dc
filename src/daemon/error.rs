use thiserror::Error;

/// Enumerates the failure modes of the supervisor daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Forking the capture child failed. Fatal at startup; a retry is not
    /// meaningful without diagnosing the resource exhaustion behind it.
    #[error("Failed to fork capture process: {0}")]
    Fork(nix::Error),

    /// The PID handoff channel could not be created.
    #[error("Failed to create PID handoff channel: {0}")]
    HandoffSetup(nix::Error),

    /// The child's PID could not be read from the handoff channel. Without
    /// it no capture can ever be triggered, so this is a startup failure.
    #[error("PID handoff failed: {0}")]
    Handoff(String),

    /// A second capture child was requested. The daemon supervises at most
    /// one capture process per lifetime.
    #[error("Capture process already spawned")]
    AlreadySpawned,

    /// A mandatory configuration key is missing or empty.
    #[error("Missing required configuration key '{0}'")]
    MissingConfig(String),

    /// A configuration key holds a value we cannot use.
    #[error("Invalid value {value:?} for configuration key '{key}'")]
    InvalidConfig { key: String, value: String },

    /// The capture trigger thread could not be started.
    #[error("Failed to start capture trigger thread")]
    ThreadStart { source: std::io::Error },

    /// Represents all other cases of `std::io::Error`.
    #[error(transparent)]
    IOError(#[from] std::io::Error),
}
