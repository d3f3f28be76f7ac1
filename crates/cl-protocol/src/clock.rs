//! Monotonic microsecond clock for intra-pipeline ordering.
//!
//! Frames are ordered by a monotonic counter so that wall-clock steps
//! (NTP, GPS sync) never reorder the pipeline. Wall-clock time is carried
//! separately for external emission.

use std::sync::OnceLock;
use std::time::Instant;

static PROCESS_EPOCH: OnceLock<Instant> = OnceLock::new();

/// Microseconds elapsed since the first call in this process.
///
/// Monotonic and strictly non-decreasing across threads.
pub fn monotonic_micros() -> u64 {
    PROCESS_EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_never_decreases() {
        let a = monotonic_micros();
        let b = monotonic_micros();
        let c = monotonic_micros();
        assert!(a <= b && b <= c);
    }
}
