use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use parking_lot::Mutex;
use std::fmt::Arguments;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const LEVEL_DEBUG: u32 = 1 << 0;
pub const LEVEL_INFO: u32 = 1 << 1;
pub const LEVEL_STATUS: u32 = 1 << 2;
pub const LEVEL_ERROR: u32 = 1 << 3;
pub const LEVEL_FATAL: u32 = 1 << 4;

/// Levels enabled when no `log.level` is configured.
pub const DEFAULT_MASK: u32 =
    LEVEL_INFO | LEVEL_STATUS | LEVEL_ERROR | LEVEL_FATAL;

/// Derives a level mask from a comma separated list of level names.
///
/// An empty string yields [DEFAULT_MASK]; unrecognised names are skipped so
/// the derivation is deterministic for any input.
pub fn mask_from_str(levels: &str) -> u32 {
    if levels.trim().is_empty() {
        return DEFAULT_MASK;
    }
    let mut mask = 0;
    for name in levels.split(|c| c == ',' || c == '|') {
        match name.trim().to_ascii_lowercase().as_str() {
            "debug" => mask |= LEVEL_DEBUG,
            "info" => mask |= LEVEL_INFO,
            "status" => mask |= LEVEL_STATUS,
            "error" => mask |= LEVEL_ERROR,
            "fatal" => mask |= LEVEL_FATAL,
            _ => {}
        }
    }
    mask
}

fn level_bits(level: Level) -> u32 {
    match level {
        Level::Error => LEVEL_ERROR | LEVEL_FATAL,
        Level::Warn => LEVEL_STATUS,
        Level::Info => LEVEL_INFO,
        Level::Debug | Level::Trace => LEVEL_DEBUG,
    }
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "ERROR",
        Level::Warn => "STATUS",
        Level::Info => "INFO",
        Level::Debug | Level::Trace => "DEBUG",
    }
}

/// Leveled log sink writing to a file or stderr.
///
/// The enabled levels are held in an atomic bitmask so the signal dispatch
/// thread can flip levels while any other thread is emitting. `log::Warn`
/// records are treated as always-interesting operational status messages
/// and carry the `STATUS` tag.
pub struct LogSink {
    mask: AtomicU32,
    out: Mutex<Option<File>>,
}

impl LogSink {
    /// Creates a sink that writes to stderr.
    pub fn new(mask: u32) -> LogSink {
        LogSink {
            mask: AtomicU32::new(mask),
            out: Mutex::new(None),
        }
    }

    /// Creates a sink appending to the given file.
    pub fn with_file(path: &Path, mask: u32) -> io::Result<LogSink> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(LogSink {
            mask: AtomicU32::new(mask),
            out: Mutex::new(Some(file)),
        })
    }

    pub fn mask(&self) -> u32 {
        self.mask.load(Ordering::SeqCst)
    }

    pub fn set_mask(&self, mask: u32) {
        self.mask.store(mask, Ordering::SeqCst);
    }

    /// Flips the given level bit, returning the new mask. Each bit is an
    /// independent toggle; callers toggling several levels flip them one
    /// at a time.
    pub fn toggle(&self, bit: u32) -> u32 {
        self.mask.fetch_xor(bit, Ordering::SeqCst) ^ bit
    }

    pub fn is_enabled(&self, bits: u32) -> bool {
        self.mask() & bits != 0
    }

    fn write_line(&self, tag: &str, args: &Arguments) {
        let line = format!(
            "{} [{}] {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            tag,
            args
        );
        let mut out = self.out.lock();
        match out.as_mut() {
            Some(file) => {
                file.write_all(line.as_bytes()).ok();
            }
            None => {
                io::stderr().write_all(line.as_bytes()).ok();
            }
        }
    }

    pub fn flush(&self) {
        if let Some(file) = self.out.lock().as_mut() {
            file.flush().ok();
        }
    }

    /// Flushes and drops the log file. Output after close falls back to
    /// stderr, so late shutdown messages are not lost. Closing twice is a
    /// no-op.
    pub fn close(&self) {
        if let Some(mut file) = self.out.lock().take() {
            file.flush().ok();
        }
    }
}

struct SinkLogger(Arc<LogSink>);

impl log::Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.0.is_enabled(level_bits(metadata.level()))
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.0.write_line(level_tag(record.level()), record.args());
        }
    }

    fn flush(&self) {
        self.0.flush();
    }
}

/// Installs the sink as the process-wide `log` backend.
pub fn init(sink: Arc<LogSink>) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(SinkLogger(sink)))?;
    log::set_max_level(LevelFilter::Trace);
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn toggle_twice_is_involution() {
        let sink = LogSink::new(DEFAULT_MASK);
        let before = sink.mask();
        sink.toggle(LEVEL_INFO);
        sink.toggle(LEVEL_DEBUG);
        sink.toggle(LEVEL_INFO);
        sink.toggle(LEVEL_DEBUG);
        assert_eq!(sink.mask(), before);
    }

    #[test]
    fn toggle_flips_bits_independently() {
        // INFO set, DEBUG clear: one flip clears INFO and sets DEBUG.
        let sink = LogSink::new(LEVEL_INFO | LEVEL_ERROR);
        sink.toggle(LEVEL_INFO);
        sink.toggle(LEVEL_DEBUG);
        assert_eq!(sink.mask(), LEVEL_DEBUG | LEVEL_ERROR);
    }

    #[test]
    fn toggle_leaves_other_bits_alone() {
        let sink = LogSink::new(LEVEL_ERROR | LEVEL_FATAL | LEVEL_STATUS);
        sink.toggle(LEVEL_INFO);
        sink.toggle(LEVEL_DEBUG);
        assert!(sink.is_enabled(LEVEL_ERROR));
        assert!(sink.is_enabled(LEVEL_FATAL));
        assert!(sink.is_enabled(LEVEL_STATUS));
    }

    #[test]
    fn mask_derivation_is_deterministic() {
        assert_eq!(mask_from_str("info,debug"), LEVEL_INFO | LEVEL_DEBUG);
        assert_eq!(mask_from_str("info,debug"), mask_from_str("debug|info"));
        assert_eq!(mask_from_str(""), DEFAULT_MASK);
        assert_eq!(mask_from_str("garbage"), 0);
        assert_eq!(
            mask_from_str("Error, FATAL"),
            LEVEL_ERROR | LEVEL_FATAL
        );
    }

    #[test]
    fn set_mask_overwrites_toggle_state() {
        let sink = LogSink::new(DEFAULT_MASK);
        sink.toggle(LEVEL_INFO);
        sink.toggle(LEVEL_DEBUG);
        sink.set_mask(mask_from_str("info,error"));
        assert_eq!(sink.mask(), LEVEL_INFO | LEVEL_ERROR);
    }

    #[test]
    fn close_is_idempotent() {
        let sink = LogSink::new(DEFAULT_MASK);
        sink.close();
        sink.close();
    }
}
