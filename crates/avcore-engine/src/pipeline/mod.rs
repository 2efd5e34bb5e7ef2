// crates/avcore-engine/src/pipeline/mod.rs
//
// Shared filter-graph plumbing for the video and audio stream pipelines.
// ffmpeg-the-third's `filter::Graph` has no precedent anywhere in the
// retrieved corpus, so the graph-construction code here is written from the
// crate's documented API shape rather than adapted from an example — see
// DESIGN.md.

pub mod audio;
pub mod video;

/// Per-generation key used to decide whether the filter graph needs to be
/// torn down and rebuilt. Two frames with an equal key can share a graph.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct VideoGraphKey {
    pub width: i32,
    pub height: i32,
    pub format: i32,
    pub serial: i64,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AudioGraphKey {
    pub format: i32,
    pub channel_layout: u64,
    pub sample_rate: i32,
    pub serial: i64,
}

/// Angle snapped to the nearest multiple of 90 degrees within tolerance, or
/// `None` if the source carries no rotation worth acting on.
fn snap_to_quarter_turn(angle_deg: f64, tolerance_deg: f64) -> Option<i32> {
    let normalized = ((angle_deg % 360.0) + 360.0) % 360.0;
    for candidate in [0, 90, 180, 270] {
        if (normalized - candidate as f64).abs() <= tolerance_deg {
            return Some(candidate);
        }
    }
    None
}

/// Reads a display-matrix rotation angle (as returned by
/// `av_display_rotation_get`, degrees, clockwise-positive-means-CCW-matrix
/// convention) and returns the `libavfilter` filter chain needed to
/// present the frame upright, or an empty chain if no matrix is attached
/// or its angle isn't within ±1° of a quarter turn.
pub fn autorotate_filters(display_matrix_angle_deg: Option<f64>) -> Vec<&'static str> {
    let Some(angle) = display_matrix_angle_deg else { return Vec::new() };
    match snap_to_quarter_turn(angle, 1.0) {
        Some(90) => vec!["transpose=clock"],
        Some(180) => vec!["hflip", "vflip"],
        Some(270) => vec!["transpose=cclock"],
        _ => Vec::new(),
    }
}

/// Builds the `libavfilter` graph spec string chaining autorotate and any
/// user-supplied filters, ending in a `format` filter that pins the output
/// to one of `allowed_pix_fmts`.
pub fn video_filter_spec(autorotate: &[&str], user_filters: &[String], allowed_pix_fmts: &[&str]) -> String {
    let mut stages: Vec<String> = autorotate.iter().map(|s| s.to_string()).collect();
    stages.extend(user_filters.iter().cloned());
    if !allowed_pix_fmts.is_empty() {
        stages.push(format!("format=pix_fmts={}", allowed_pix_fmts.join(":")));
    }
    if stages.is_empty() {
        "null".to_string()
    } else {
        stages.join(",")
    }
}

/// Audio-side equivalent: always ends in a `format` filter honoring
/// `force_output_format` by pinning to an exact layout/rate, or otherwise
/// only constraining the sample format.
pub fn audio_filter_spec(user_filters: &[String], sample_fmt: &str, channel_layout: Option<&str>, sample_rate: Option<i32>) -> String {
    let mut stages: Vec<String> = user_filters.to_vec();
    let mut format_opts = vec![format!("sample_fmts={sample_fmt}")];
    if let Some(layout) = channel_layout {
        format_opts.push(format!("channel_layouts={layout}"));
    }
    if let Some(rate) = sample_rate {
        format_opts.push(format!("sample_rates={rate}"));
    }
    stages.push(format!("aformat={}", format_opts.join(":")));
    stages.join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_matrix_means_no_autorotate() {
        assert!(autorotate_filters(None).is_empty());
    }

    #[test]
    fn ninety_degrees_within_tolerance_snaps() {
        assert_eq!(autorotate_filters(Some(89.3)), vec!["transpose=clock"]);
    }

    #[test]
    fn one_eighty_snaps_to_double_flip() {
        assert_eq!(autorotate_filters(Some(180.6)), vec!["hflip", "vflip"]);
    }

    #[test]
    fn two_seventy_snaps_to_cclock() {
        assert_eq!(autorotate_filters(Some(269.5)), vec!["transpose=cclock"]);
    }

    #[test]
    fn off_axis_angle_is_ignored() {
        assert!(autorotate_filters(Some(45.0)).is_empty());
    }

    #[test]
    fn negative_angle_wraps_before_snapping() {
        assert_eq!(autorotate_filters(Some(-90.2)), vec!["transpose=cclock"]);
    }

    #[test]
    fn video_spec_falls_back_to_null_with_nothing_to_do() {
        assert_eq!(video_filter_spec(&[], &[], &[]), "null");
    }

    #[test]
    fn video_spec_chains_autorotate_then_user_then_format() {
        let spec = video_filter_spec(&["hflip", "vflip"], &["eq=brightness=0.1".to_string()], &["yuv420p"]);
        assert_eq!(spec, "hflip,vflip,eq=brightness=0.1,format=pix_fmts=yuv420p");
    }

    #[test]
    fn audio_spec_pins_format_when_forced() {
        let spec = audio_filter_spec(&[], "s16", Some("stereo"), Some(48000));
        assert_eq!(spec, "aformat=sample_fmts=s16:channel_layouts=stereo:sample_rates=48000");
    }

    #[test]
    fn audio_spec_only_constrains_format_when_not_forced() {
        let spec = audio_filter_spec(&[], "s16", None, None);
        assert_eq!(spec, "aformat=sample_fmts=s16");
    }
}
