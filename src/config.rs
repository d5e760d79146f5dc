use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Settings for the external capture program and the trigger cadence.
#[derive(Deserialize, Clone)]
#[serde(default)]
pub struct CaptureSettings {
    /// Path to the capture executable.
    pub program: String,
    /// Output image encoding (e.g. "jpg").
    pub encoding: String,
    pub jpg_quality: i64,
    /// Horizontal resolution in pixels.
    pub hres: i64,
    /// Vertical resolution in pixels.
    pub vres: i64,
    pub iso: i64,
    /// Template for the output filename, passed through to the capture
    /// program verbatim.
    pub output_template: String,
    /// Seconds between successive capture requests.
    pub frequency: i64,
    /// Seconds to wait before the first capture request, giving the
    /// capture program time to initialise.
    #[serde(default = "default_warmup")]
    pub warmup: i64,
    /// Signal sent to the capture process to request a capture. Kept
    /// distinct from the daemon's own SIGUSR1 log toggle.
    pub trigger_signal: String,
}

fn default_warmup() -> i64 {
    10
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings {
            program: String::new(),
            encoding: String::new(),
            jpg_quality: 0,
            hres: 0,
            vres: 0,
            iso: 0,
            output_template: String::new(),
            frequency: 0,
            warmup: default_warmup(),
            trigger_signal: String::new(),
        }
    }
}

#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct LogSettings {
    /// Log file path. Empty means log to stderr.
    pub filename: String,
    /// Comma separated list of enabled levels, e.g. "info,error,fatal".
    pub level: String,
}

#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct DaemonSettings {
    /// When set, the PID handoff uses a named FIFO at this path instead of
    /// an anonymous pipe. The FIFO is unlinked during shutdown.
    pub handoff_fifo: String,
    /// Path of the PID file. Empty means `shutterd.pid` in the working
    /// directory.
    pub pid_file: String,
}

#[derive(Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
    pub capture: CaptureSettings,
    pub log: LogSettings,
    pub daemon: DaemonSettings,
}

/// Process-wide configuration, constructed once at startup and passed
/// explicitly to the components that need it.
///
/// The backing file is TOML. Absent string keys read as the empty string
/// and absent integer keys read as zero, so callers can decide which keys
/// are mandatory. `reload` re-parses the same file in place.
pub struct Config {
    path: PathBuf,
    settings: RwLock<Settings>,
}

impl Config {
    /// Reads the configuration from the given path.
    pub fn from_path(path: &Path) -> Result<Config> {
        let settings = parse_file(path)?;
        Ok(Config {
            path: path.to_owned(),
            settings: RwLock::new(settings),
        })
    }

    /// Re-reads the configuration file this `Config` was created from.
    ///
    /// On parse failure the previous settings are kept.
    pub fn reload(&self) -> Result<()> {
        let settings = parse_file(&self.path)?;
        *self.settings.write() = settings;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the current settings.
    pub fn snapshot(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Looks up a string value by dotted key, returning the empty string
    /// for absent or unknown keys.
    pub fn get_str(&self, key: &str) -> String {
        let s = self.settings.read();
        match key {
            "capture.program" => s.capture.program.clone(),
            "capture.encoding" => s.capture.encoding.clone(),
            "capture.output_template" => s.capture.output_template.clone(),
            "capture.trigger_signal" => s.capture.trigger_signal.clone(),
            "log.filename" => s.log.filename.clone(),
            "log.level" => s.log.level.clone(),
            "daemon.handoff_fifo" => s.daemon.handoff_fifo.clone(),
            "daemon.pid_file" => s.daemon.pid_file.clone(),
            _ => String::new(),
        }
    }

    /// Looks up an integer value by dotted key, returning zero for absent
    /// or unknown keys.
    pub fn get_int(&self, key: &str) -> i64 {
        let s = self.settings.read();
        match key {
            "capture.jpg_quality" => s.capture.jpg_quality,
            "capture.hres" => s.capture.hres,
            "capture.vres" => s.capture.vres,
            "capture.iso" => s.capture.iso,
            "capture.frequency" => s.capture.frequency,
            "capture.warmup" => s.capture.warmup,
            _ => 0,
        }
    }

    /// Prints the effective configuration to stdout.
    pub fn dump(&self) {
        let s = self.settings.read();
        println!("capture.program = {:?}", s.capture.program);
        println!("capture.encoding = {:?}", s.capture.encoding);
        println!("capture.jpg_quality = {}", s.capture.jpg_quality);
        println!("capture.hres = {}", s.capture.hres);
        println!("capture.vres = {}", s.capture.vres);
        println!("capture.iso = {}", s.capture.iso);
        println!("capture.output_template = {:?}", s.capture.output_template);
        println!("capture.frequency = {}", s.capture.frequency);
        println!("capture.warmup = {}", s.capture.warmup);
        println!("capture.trigger_signal = {:?}", s.capture.trigger_signal);
        println!("log.filename = {:?}", s.log.filename);
        println!("log.level = {:?}", s.log.level);
        println!("daemon.handoff_fifo = {:?}", s.daemon.handoff_fifo);
        println!("daemon.pid_file = {:?}", s.daemon.pid_file);
    }

    #[cfg(test)]
    pub(crate) fn from_toml_str(content: &str) -> Result<Config> {
        let settings = toml::from_str::<Settings>(content)
            .with_context(|| "Failed to parse TOML config")?;
        Ok(Config {
            path: PathBuf::from("<inline>"),
            settings: RwLock::new(settings),
        })
    }
}

fn parse_file(path: &Path) -> Result<Settings> {
    let toml_content = fs::read_to_string(path).with_context(|| {
        format!("Failed to read config file {}", path.display())
    })?;
    let settings = toml::from_str::<Settings>(&toml_content)
        .with_context(|| {
            format!("Failed to parse config file {}", path.display())
        })?;
    Ok(settings)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn absent_keys_default_to_empty_and_zero() {
        let config = Config::from_toml_str("[capture]\nprogram = \"cam\"")
            .unwrap();
        assert_eq!(config.get_str("capture.program"), "cam");
        assert_eq!(config.get_str("capture.encoding"), "");
        assert_eq!(config.get_str("log.level"), "");
        assert_eq!(config.get_int("capture.frequency"), 0);
        assert_eq!(config.get_int("capture.iso"), 0);
    }

    #[test]
    fn unknown_keys_default_to_empty_and_zero() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.get_str("capture.nonsense"), "");
        assert_eq!(config.get_int("capture.nonsense"), 0);
    }

    #[test]
    fn warmup_defaults_to_ten_seconds() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.get_int("capture.warmup"), 10);
    }

    #[test]
    fn parses_all_capture_settings() {
        let config = Config::from_toml_str(
            r#"
            [capture]
            program = "raspistill"
            encoding = "jpg"
            jpg_quality = 85
            hres = 1920
            vres = 1080
            iso = 400
            output_template = "still_%04d.jpg"
            frequency = 300
            warmup = 0

            [log]
            filename = "/var/log/shutterd.log"
            level = "info,error"
            "#,
        )
        .unwrap();
        assert_eq!(config.get_str("capture.program"), "raspistill");
        assert_eq!(config.get_int("capture.jpg_quality"), 85);
        assert_eq!(config.get_int("capture.frequency"), 300);
        assert_eq!(config.get_int("capture.warmup"), 0);
        assert_eq!(config.get_str("log.level"), "info,error");
    }

    #[test]
    fn reload_picks_up_file_edits() {
        let mut path = std::env::temp_dir();
        path.push(format!("shutterd-config-test-{}", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[log]\nlevel = \"info\"").unwrap();
        drop(file);

        let config = Config::from_path(&path).unwrap();
        assert_eq!(config.get_str("log.level"), "info");

        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[log]\nlevel = \"debug,info\"").unwrap();
        drop(file);

        config.reload().unwrap();
        assert_eq!(config.get_str("log.level"), "debug,info");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn failed_reload_keeps_previous_settings() {
        let mut path = std::env::temp_dir();
        path.push(format!("shutterd-config-bad-{}", std::process::id()));
        std::fs::write(&path, "[log]\nlevel = \"info\"").unwrap();

        let config = Config::from_path(&path).unwrap();
        std::fs::write(&path, "not valid toml [").unwrap();

        assert!(config.reload().is_err());
        assert_eq!(config.get_str("log.level"), "info");
        std::fs::remove_file(&path).ok();
    }
}
