// crates/avcore-types/src/audio.rs
//
// Audio format description crossing the engine/host boundary during device
// negotiation (`audio_meta_cb`). Deliberately plain — `channel_layout_mask`
// is the raw ffmpeg channel-layout bitmask so this crate never needs to
// know about `ffmpeg_the_third::util::channel_layout`.

/// What the engine proposes based on the codec's own parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioParams {
    pub sample_rate: i32,
    pub channels: i32,
    pub channel_layout_mask: u64,
}

/// What the host actually negotiated with the audio device. The engine
/// rebuilds its output filter graph pinned to this exact format.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NegotiatedAudioParams {
    pub sample_rate: i32,
    pub channels: i32,
    pub channel_layout_mask: u64,
    /// Bytes of one second of audio at this format — used by the drift
    /// corrector's `diff_threshold` and by `sync_audio`'s buffer-delay math.
    pub bytes_per_sec: i32,
}
