use chrono::Local;
use std::convert::TryFrom;

/// Returns the current UNIX timestamp in whole seconds.
///
/// Used to record when the capture child was spawned. Panics on a clock
/// set before 1970, which this daemon does not support.
pub fn epoch_now() -> u64 {
    u64::try_from(Local::now().timestamp())
        .expect("Got date before 1970, this is unsupported by epoch_now")
}
