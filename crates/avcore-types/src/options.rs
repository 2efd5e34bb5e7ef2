// crates/avcore-types/src/options.rs
//
// Everything a host can configure about a Player, gathered in one struct:
// construct it, hand it to `open`, done. No serde: there is nothing to
// persist between sessions.

use crate::audio::{AudioParams, NegotiatedAudioParams};
use crate::error::ErrorKind;

pub type OnErrorCb = Box<dyn Fn(ErrorKind, String) + Send + Sync>;
pub type VideoMetaCb = Box<dyn Fn(u32, u32, f32) + Send + Sync>;
pub type AudioMetaCb = Box<dyn Fn(AudioParams) -> NegotiatedAudioParams + Send + Sync>;

/// Options accepted by `Player::open`. Fields with no sensible default are
/// `None`/`false`; everything else has a sensible default for playback.
pub struct PlayerOptions {
    pub audio_disable: bool,
    pub seek_by_bytes: Option<bool>,
    pub start_time: Option<i64>,
    pub duration: Option<i64>,
    pub genpts: bool,
    pub loop_playback: bool,
    pub find_stream_info: bool,
    pub autorotate: bool,
    pub reorder_pts: bool,
    pub audio_volume: i32,
    pub run_sync: bool,

    pub on_error: Option<OnErrorCb>,
    pub video_meta_cb: Option<VideoMetaCb>,
    pub audio_meta_cb: Option<AudioMetaCb>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            audio_disable: false,
            seek_by_bytes: None,
            start_time: None,
            duration: None,
            genpts: false,
            loop_playback: false,
            find_stream_info: true,
            autorotate: true,
            reorder_pts: true,
            audio_volume: 100,
            run_sync: false,
            on_error: None,
            video_meta_cb: None,
            audio_meta_cb: None,
        }
    }
}

impl std::fmt::Debug for PlayerOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerOptions")
            .field("audio_disable", &self.audio_disable)
            .field("seek_by_bytes", &self.seek_by_bytes)
            .field("start_time", &self.start_time)
            .field("duration", &self.duration)
            .field("genpts", &self.genpts)
            .field("loop_playback", &self.loop_playback)
            .field("find_stream_info", &self.find_stream_info)
            .field("autorotate", &self.autorotate)
            .field("reorder_pts", &self.reorder_pts)
            .field("audio_volume", &self.audio_volume)
            .field("run_sync", &self.run_sync)
            .field("on_error", &self.on_error.is_some())
            .field("video_meta_cb", &self.video_meta_cb.is_some())
            .field("audio_meta_cb", &self.audio_meta_cb.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible_for_playback() {
        let opts = PlayerOptions::default();
        assert!(!opts.audio_disable);
        assert!(opts.seek_by_bytes.is_none());
        assert!(!opts.loop_playback);
        assert!(opts.find_stream_info);
        assert!(opts.autorotate);
        assert!(opts.reorder_pts);
        assert_eq!(opts.audio_volume, 100);
        assert!(!opts.run_sync);
    }
}
