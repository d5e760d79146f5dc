use super::error::DaemonError;
use crate::config::Settings;
use std::ffi::CString;

/// Argument vector for the capture program.
///
/// The capture program has a fixed-shape command line: it is started once,
/// told to wait for a signal before each capture, and handed the encoding,
/// quality, geometry, ISO and output template from the configuration. All
/// spawn paths build their arguments here so the shape exists in one place.
pub struct CaptureCommand {
    argv: Vec<String>,
}

impl CaptureCommand {
    /// Builds the command from the given settings.
    ///
    /// Fails if `capture.program` is not configured; every other value is
    /// passed through as-is, letting the capture program reject what it
    /// does not like.
    pub fn from_settings(settings: &Settings) -> Result<CaptureCommand, DaemonError> {
        let capture = &settings.capture;
        if capture.program.is_empty() {
            return Err(DaemonError::MissingConfig(
                "capture.program".to_string(),
            ));
        }

        let argv = vec![
            capture.program.clone(),
            "-n".to_string(), // no preview
            "-s".to_string(), // wait for a signal before each capture
            "-e".to_string(),
            capture.encoding.clone(),
            "-q".to_string(),
            capture.jpg_quality.to_string(),
            "-fs".to_string(),
            "1".to_string(),
            "-w".to_string(),
            capture.hres.to_string(),
            "-h".to_string(),
            capture.vres.to_string(),
            "-ISO".to_string(),
            capture.iso.to_string(),
            "-o".to_string(),
            capture.output_template.clone(),
        ];

        Ok(CaptureCommand { argv })
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Returns the argv as C strings for `execvp`.
    ///
    /// Built ahead of the fork so the child branch performs no allocation
    /// between `fork` and `exec`.
    pub fn to_cstrings(&self) -> Result<Vec<CString>, DaemonError> {
        self.argv
            .iter()
            .map(|arg| {
                CString::new(arg.as_str()).map_err(|_| {
                    DaemonError::InvalidConfig {
                        key: "capture.program".to_string(),
                        value: arg.clone(),
                    }
                })
            })
            .collect()
    }
}

impl std::fmt::Display for CaptureCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}
