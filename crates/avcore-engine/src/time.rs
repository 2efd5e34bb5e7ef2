// crates/avcore-engine/src/time.rs
//
// Monotonic "seconds since the first call" reading used everywhere a clock
// formula asks for `now`. Never wall-clock-of-day — only ever compared
// against another reading from this same function.

use std::sync::OnceLock;
use std::time::Instant;

pub(crate) fn monotonic_now() -> f64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_is_nondecreasing() {
        let a = monotonic_now();
        let b = monotonic_now();
        assert!(b >= a);
    }
}
