// crates/avcore-types/src/error.rs
//
// Error *kinds*, not error types — ffmpeg_the_third::Error and anyhow::Error
// already say what failed; ErrorKind says how the core should react to it.
// Each kind maps to one reaction: break the loop, retry, log, or reconfigure.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Allocation failure, cannot open the URL, no playable stream found.
    /// Ends the thread's main loop and is reported through `on_error`.
    FatalSetup,
    /// EAGAIN/EOF while reading packets. Sleep briefly and retry; never reported.
    SoftDemuxStall,
    /// A seek request failed. Logged, playback continues at the current position.
    SeekFailed,
    /// Codec parameters changed mid-stream (new IDR with different dimensions,
    /// a new sample rate, …). Normal flow — the filter graph rebuilds on the
    /// next frame.
    DecoderMismatch,
    /// Both send_packet and receive_frame returned "try again" in the same
    /// iteration. Logged once; the packet is retried on the next call.
    RunawayCodec,
    /// `abort_request` was observed. Not an error — unwind the loop cleanly.
    Aborted,
}

impl ErrorKind {
    /// True when this should break a worker's main loop rather than continue.
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::FatalSetup | ErrorKind::Aborted)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::FatalSetup => "fatal-setup",
            ErrorKind::SoftDemuxStall => "soft-demux-stall",
            ErrorKind::SeekFailed => "seek-failed",
            ErrorKind::DecoderMismatch => "decoder-mismatch",
            ErrorKind::RunawayCodec => "runaway-codec",
            ErrorKind::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// A classified failure surfaced from a worker thread, carrying the
/// underlying cause chain for logging even though `on_error` callbacks
/// only receive the kind and a flattened message.
#[derive(Debug)]
pub struct CoreError {
    pub kind: ErrorKind,
    pub source: anyhow::Error,
}

impl CoreError {
    pub fn new(kind: ErrorKind, source: impl Into<anyhow::Error>) -> Self {
        Self { kind, source: source.into() }
    }

    pub fn aborted() -> Self {
        Self::new(ErrorKind::Aborted, anyhow::anyhow!("abort_request observed"))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.source)
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.source()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_kinds() {
        assert!(ErrorKind::FatalSetup.is_fatal());
        assert!(ErrorKind::Aborted.is_fatal());
        assert!(!ErrorKind::SoftDemuxStall.is_fatal());
        assert!(!ErrorKind::SeekFailed.is_fatal());
        assert!(!ErrorKind::DecoderMismatch.is_fatal());
        assert!(!ErrorKind::RunawayCodec.is_fatal());
    }

    #[test]
    fn display_carries_cause() {
        let e = CoreError::new(ErrorKind::FatalSetup, anyhow::anyhow!("no such file"));
        assert_eq!(e.to_string(), "[fatal-setup] no such file");
    }
}
