// crates/avcore-engine/src/player/sync.rs
//
// The pure arithmetic behind master-clock selection, external-clock speed
// adaptation, and audio drift correction. Kept free of queue/thread state
// so it can be exercised without a real demuxer.

use avcore_types::SyncType;

pub const AV_NOSYNC_THRESHOLD: f64 = 10.0;
pub const AV_SYNC_THRESHOLD_MIN: f64 = 0.04;
pub const AV_SYNC_THRESHOLD_MAX: f64 = 0.1;
pub const AV_SYNC_FRAMEDUP_THRESHOLD: f64 = 0.1;
pub const EXTERNAL_CLOCK_MIN_SPEED: f64 = 0.900;
pub const EXTERNAL_CLOCK_MAX_SPEED: f64 = 1.010;
pub const EXTERNAL_CLOCK_SPEED_STEP: f64 = 0.001;
pub const EXTERNAL_CLOCK_SPEED_DRIFT: f64 = 0.01;

/// `TS_DISCONT`-flagged containers get a generous ceiling; everything else
/// is held to a strict one so a single bad PTS can't stall playback.
pub fn max_frame_duration(ts_discont: bool) -> f64 {
    if ts_discont { 10.0 } else { 3600.0 }
}

/// `last.pts -> frame.pts` gap, clamped into `(0, max]`; falls back to the
/// last frame's own stamped duration when the gap is out of range.
pub fn frame_duration(last_pts: f64, frame_pts: f64, last_duration: f64, max: f64) -> f64 {
    if !last_pts.is_finite() || !frame_pts.is_finite() {
        return last_duration;
    }
    let gap = frame_pts - last_pts;
    if gap > 0.0 && gap <= max {
        gap
    } else {
        last_duration
    }
}

/// Resolves the configured sync type against which streams actually exist.
pub fn resolve_master(requested: SyncType, has_video: bool, has_audio: bool) -> SyncType {
    match requested {
        SyncType::Audio if !has_audio => SyncType::External,
        SyncType::Video if !has_video => SyncType::Audio,
        other => other,
    }
}

/// Step 6 of `acquire_video_frame`: the delay to hold `last` on screen for,
/// adjusted toward (or away from) the master clock when video isn't master.
pub fn compute_target_delay(delay: f64, video_clock: f64, master_clock: f64, is_master: bool, max_frame_duration: f64) -> f64 {
    if is_master {
        return delay;
    }
    let diff = video_clock - master_clock;
    if !diff.is_finite() {
        return delay;
    }
    let sync_threshold = delay.clamp(AV_SYNC_THRESHOLD_MIN, AV_SYNC_THRESHOLD_MAX);
    if diff.abs() >= max_frame_duration {
        return delay;
    }
    if diff <= -sync_threshold {
        (delay + diff).max(0.0)
    } else if diff >= sync_threshold && delay > AV_SYNC_FRAMEDUP_THRESHOLD {
        delay + diff
    } else if diff >= sync_threshold {
        delay * 2.0
    } else {
        delay
    }
}

/// Every scheduler tick when master=EXTERNAL and the source is realtime:
/// nudge `speed` based on how starved the packet queues are.
pub fn adapt_external_clock_speed(speed: f64, min_packet_count: usize, max_packet_count: usize) -> f64 {
    if min_packet_count <= 2 {
        (speed - EXTERNAL_CLOCK_SPEED_STEP).max(EXTERNAL_CLOCK_MIN_SPEED)
    } else if max_packet_count > 10 {
        (speed + EXTERNAL_CLOCK_SPEED_STEP).min(EXTERNAL_CLOCK_MAX_SPEED)
    } else if speed != 1.0 {
        speed + EXTERNAL_CLOCK_SPEED_STEP * (1.0 - speed).signum()
    } else {
        speed
    }
}

/// Running-average drift accumulator feeding the audio resampler's stretch
/// target.
pub struct AudioDriftCorrector {
    diff_cum: f64,
    diff_avg_coef: f64,
    diff_avg_count: u32,
    diff_threshold: f64,
}

impl AudioDriftCorrector {
    pub fn new(diff_threshold: f64) -> Self {
        Self {
            diff_cum: 0.0,
            diff_avg_coef: (0.01_f64.ln() / 20.0).exp(),
            diff_avg_count: 0,
            diff_threshold,
        }
    }

    /// Updated once the host's hardware buffer size is known (it isn't at
    /// construction time, since `Player` doesn't own the audio device).
    pub fn set_diff_threshold(&mut self, diff_threshold: f64) {
        self.diff_threshold = diff_threshold;
    }

    /// Returns the sample count the resampler should stretch/compress to,
    /// or `nb_samples` unchanged when no correction is warranted yet.
    pub fn wanted_sample_count(&mut self, nb_samples: i32, diff: f64, src_freq: i32) -> i32 {
        if !diff.is_finite() || diff.abs() >= AV_NOSYNC_THRESHOLD {
            self.diff_avg_count = 0;
            self.diff_cum = 0.0;
            return nb_samples;
        }

        self.diff_cum = diff + self.diff_avg_coef * self.diff_cum;
        if self.diff_avg_count < 20 {
            self.diff_avg_count += 1;
            return nb_samples;
        }

        let avg = self.diff_cum * (1.0 - self.diff_avg_coef);
        if avg.abs() < self.diff_threshold {
            return nb_samples;
        }
        let wanted = nb_samples as f64 + diff * src_freq as f64;
        wanted.clamp(nb_samples as f64 * 0.9, nb_samples as f64 * 1.1).round() as i32
    }
}

/// Nearest-neighbor interleaved-frame retarget from `from_samples` to
/// `to_samples`, applied to already-resampled interleaved S16 audio. Stands
/// in for a resampler's compensation knob (see DESIGN.md): duplicates or
/// drops whole sample frames rather than filtering, so it reproduces
/// `wanted_sample_count`'s stretch effect without it.
pub fn stretch_s16(data: &[u8], from_samples: i32, to_samples: i32, channels: usize) -> Vec<u8> {
    let frame_bytes = channels * std::mem::size_of::<i16>();
    if from_samples <= 0 || to_samples == from_samples || channels == 0 || frame_bytes == 0 {
        return data.to_vec();
    }
    let from = from_samples as usize;
    let to = to_samples.max(0) as usize;
    let mut out = Vec::with_capacity(to * frame_bytes);
    for i in 0..to {
        let src = (i * from / to.max(1)).min(from.saturating_sub(1));
        let start = src * frame_bytes;
        let end = (start + frame_bytes).min(data.len());
        if start < end {
            out.extend_from_slice(&data[start..end]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_audio_falls_through_to_external_without_audio() {
        assert_eq!(resolve_master(SyncType::Audio, true, false), SyncType::External);
    }

    #[test]
    fn master_video_falls_through_to_audio_without_video() {
        assert_eq!(resolve_master(SyncType::Video, false, true), SyncType::Audio);
    }

    #[test]
    fn master_external_is_left_alone() {
        assert_eq!(resolve_master(SyncType::External, true, true), SyncType::External);
    }

    #[test]
    fn frame_duration_uses_gap_when_in_range() {
        assert_eq!(frame_duration(1.0, 1.04, 0.02, 3600.0), 0.04);
    }

    #[test]
    fn frame_duration_falls_back_on_negative_gap() {
        assert_eq!(frame_duration(1.0, 0.5, 0.02, 3600.0), 0.02);
    }

    #[test]
    fn frame_duration_falls_back_on_nonfinite_pts() {
        assert_eq!(frame_duration(f64::NAN, 1.0, 0.03, 3600.0), 0.03);
    }

    #[test]
    fn target_delay_unchanged_when_master() {
        assert_eq!(compute_target_delay(0.04, 1.0, 0.5, true, 3600.0), 0.04);
    }

    #[test]
    fn target_delay_hurries_when_behind() {
        let d = compute_target_delay(0.04, 1.0, 1.2, false, 3600.0);
        assert!(d < 0.04);
    }

    #[test]
    fn target_delay_ignored_beyond_max_frame_duration() {
        let d = compute_target_delay(0.04, 100.0, 0.0, false, 3600.0);
        assert_eq!(d, 0.04);
    }

    #[test]
    fn external_speed_clamped_to_floor() {
        let mut speed = EXTERNAL_CLOCK_MIN_SPEED;
        for _ in 0..5 {
            speed = adapt_external_clock_speed(speed, 1, 0);
        }
        assert_eq!(speed, EXTERNAL_CLOCK_MIN_SPEED);
    }

    #[test]
    fn external_speed_clamped_to_ceiling() {
        let mut speed = EXTERNAL_CLOCK_MAX_SPEED;
        for _ in 0..5 {
            speed = adapt_external_clock_speed(speed, 99, 99);
        }
        assert_eq!(speed, EXTERNAL_CLOCK_MAX_SPEED);
    }

    #[test]
    fn drift_corrector_ignores_until_warmed_up() {
        let mut c = AudioDriftCorrector::new(0.05);
        for _ in 0..19 {
            assert_eq!(c.wanted_sample_count(1024, 0.2, 44100), 1024);
        }
    }

    #[test]
    fn drift_corrector_resets_on_large_diff() {
        let mut c = AudioDriftCorrector::new(0.05);
        assert_eq!(c.wanted_sample_count(1024, 50.0, 44100), 1024);
    }

    #[test]
    fn drift_corrector_clamps_to_ten_percent() {
        let mut c = AudioDriftCorrector::new(0.0001);
        let mut last = 1024;
        for _ in 0..25 {
            last = c.wanted_sample_count(1024, 0.01, 44100);
        }
        assert!((last as f64) <= 1024.0 * 1.1);
        assert!((last as f64) >= 1024.0 * 0.9);
    }

    #[test]
    fn stretch_identity_when_counts_match() {
        let data = vec![1u8, 2, 3, 4];
        assert_eq!(stretch_s16(&data, 1, 1, 2), data);
    }

    #[test]
    fn stretch_upsamples_by_duplicating_frames() {
        // Two mono i16 frames -> stretch to four.
        let data: Vec<u8> = vec![0, 0, 1, 0]; // frame0=0, frame1=1 (i16 LE)
        let out = stretch_s16(&data, 2, 4, 1);
        assert_eq!(out.len(), 4 * 2);
    }

    #[test]
    fn stretch_downsamples_by_dropping_frames() {
        let data: Vec<u8> = vec![0, 0, 1, 0, 2, 0, 3, 0];
        let out = stretch_s16(&data, 4, 2, 1);
        assert_eq!(out.len(), 2 * 2);
    }
}
