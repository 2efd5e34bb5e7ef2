// crates/avcore-engine/src/clock.rs
//
// A monotonic PTS estimator with speed, pause, and serial gating.
// Three instances live in a Player: audio, video,
// external — the scheduler reads whichever is currently the master.

use crate::serial::SerialRef;
use crate::time::monotonic_now;

pub struct Clock {
    pts: f64,
    pts_drift: f64,
    last_updated: f64,
    speed: f64,
    serial: i64,
    paused: bool,
    queue_serial: SerialRef,
}

impl Clock {
    /// `queue_serial` is the owning queue's generation counter — reading
    /// this clock while it disagrees with `serial` means the decoded data
    /// this clock was set from belongs to a generation nothing can still
    /// act on, so `get()` reports NaN rather than a stale number.
    pub fn new(queue_serial: SerialRef) -> Self {
        Self {
            pts: f64::NAN,
            pts_drift: 0.0,
            last_updated: monotonic_now(),
            speed: 1.0,
            serial: -1,
            paused: false,
            queue_serial,
        }
    }

    pub fn serial(&self) -> i64 {
        self.serial
    }

    pub fn paused(&self) -> bool {
        self.paused
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    /// Raw last-set pts, regardless of staleness or pause — used by the
    /// scheduler's frame-duration math, which wants the frame's own stamped
    /// value rather than the extrapolated "now" reading.
    pub fn pts(&self) -> f64 {
        self.pts
    }

    pub fn get(&self) -> f64 {
        if self.queue_serial.get() != self.serial {
            return f64::NAN;
        }
        if self.paused {
            return self.pts;
        }
        let now = monotonic_now();
        self.pts_drift + now - (now - self.last_updated) * (1.0 - self.speed)
    }

    pub fn set_at(&mut self, pts: f64, serial: i64, wall_time: f64) {
        self.pts = pts;
        self.last_updated = wall_time;
        self.pts_drift = pts - wall_time;
        self.serial = serial;
    }

    pub fn set(&mut self, pts: f64, serial: i64) {
        let now = monotonic_now();
        self.set_at(pts, serial, now);
    }

    /// Freeze the current readout, then change speed, so the timeline stays
    /// continuous across the transition instead of jumping.
    pub fn set_speed(&mut self, speed: f64) {
        let current = self.get();
        self.set(current, self.serial);
        self.speed = speed;
    }

    /// Adopt `slave`'s reading if this clock is invalid or has drifted from
    /// it by more than `no_sync_threshold`. Used to tether the external
    /// clock to whichever stream is actually producing frames.
    pub fn sync_to_slave(&mut self, slave: &Clock, no_sync_threshold: f64) {
        let this_val = self.get();
        let slave_val = slave.get();
        if !slave_val.is_nan() && (this_val.is_nan() || (this_val - slave_val).abs() > no_sync_threshold) {
            self.set(slave_val, slave.serial);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_serial_reads_nan() {
        let q = SerialRef::new();
        let mut c = Clock::new(q.clone());
        c.set(1.0, 0);
        assert!(!c.get().is_nan());
        q.bump();
        assert!(c.get().is_nan(), "clock serial no longer matches queue generation");
    }

    #[test]
    fn paused_clock_freezes() {
        let q = SerialRef::new();
        let mut c = Clock::new(q);
        c.set(5.0, 0);
        c.set_paused(true);
        let a = c.get();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = c.get();
        assert_eq!(a, b);
        assert_eq!(a, 5.0);
    }

    #[test]
    fn unpaused_clock_advances_with_wall_time() {
        let q = SerialRef::new();
        let mut c = Clock::new(q);
        c.set(0.0, 0);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(c.get() > 0.01);
    }

    #[test]
    fn sync_to_slave_adopts_when_invalid() {
        let q = SerialRef::new();
        let mut master = Clock::new(q.clone());
        let mut slave = Clock::new(q);
        slave.set(3.0, 0);
        master.sync_to_slave(&slave, 0.01);
        assert!((master.get() - 3.0).abs() < 0.01);
        assert_eq!(master.serial(), 0);
    }

    #[test]
    fn sync_to_slave_ignores_small_drift() {
        let q = SerialRef::new();
        let mut master = Clock::new(q.clone());
        let mut slave = Clock::new(q);
        master.set(1.0, 0);
        slave.set(1.005, 0);
        master.sync_to_slave(&slave, 0.01);
        assert!((master.get() - 1.0).abs() < 0.01, "drift under threshold must not resync");
    }
}
