// crates/avcore-engine/src/decoder.rs
//
// A cooperative decode step driven by a PacketQueue: the send_packet/
// receive_frame shape ffmpeg-the-third exposes directly, generalized over
// video and audio codec contexts via the `Codec` trait and folded into one
// step function instead of a blocking loop, so a worker thread can
// interleave decode with queue backpressure and abort checks between calls.

use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;
use ffmpeg_the_third::ffi;

use crate::packet_queue::{PacketGet, PacketQueue};
use crate::player::demux::WakeHandle;

/// Bridges `ffmpeg::codec::decoder::Video` and `::Audio`, which already
/// expose this exact shape but don't share a trait in ffmpeg-the-third.
pub trait Codec {
    type Frame;

    fn new_frame(&self) -> Self::Frame;
    fn codec_send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<(), ffmpeg::Error>;
    fn codec_send_eof(&mut self) -> Result<(), ffmpeg::Error>;
    fn codec_receive_frame(&mut self, frame: &mut Self::Frame) -> Result<(), ffmpeg::Error>;
    fn codec_flush(&mut self);
}

impl Codec for ffmpeg::codec::decoder::Video {
    type Frame = ffmpeg::util::frame::video::Video;

    fn new_frame(&self) -> Self::Frame {
        ffmpeg::util::frame::video::Video::empty()
    }
    fn codec_send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<(), ffmpeg::Error> {
        self.send_packet(packet)
    }
    fn codec_send_eof(&mut self) -> Result<(), ffmpeg::Error> {
        self.send_eof()
    }
    fn codec_receive_frame(&mut self, frame: &mut Self::Frame) -> Result<(), ffmpeg::Error> {
        self.receive_frame(frame)
    }
    fn codec_flush(&mut self) {
        self.flush();
    }
}

impl Codec for ffmpeg::codec::decoder::Audio {
    type Frame = ffmpeg::util::frame::audio::Audio;

    fn new_frame(&self) -> Self::Frame {
        ffmpeg::util::frame::audio::Audio::empty()
    }
    fn codec_send_packet(&mut self, packet: &ffmpeg::codec::packet::Packet) -> Result<(), ffmpeg::Error> {
        self.send_packet(packet)
    }
    fn codec_send_eof(&mut self) -> Result<(), ffmpeg::Error> {
        self.send_eof()
    }
    fn codec_receive_frame(&mut self, frame: &mut Self::Frame) -> Result<(), ffmpeg::Error> {
        self.receive_frame(frame)
    }
    fn codec_flush(&mut self) {
        self.flush();
    }
}

/// Outcome of one `Decoder::decode` call.
pub enum DecodeStep<F> {
    /// A frame is ready; its packet-queue-generation is attached so the
    /// caller can tag the `Frame` it builds from this.
    Ready(F, i64),
    /// No packet was available this call and nothing was pending in the
    /// codec; the caller should back off and try again later.
    Empty,
    /// The paired packet queue delivered its end-of-stream marker and the
    /// codec has drained everything it was holding.
    End,
    Aborted,
}

pub struct Decoder<C: Codec> {
    codec: C,
    packet_queue: std::sync::Arc<PacketQueue>,
    empty_queue_wake: Arc<WakeHandle>,
    reorder_pts: bool,
    pkt_serial: i64,
    finished: bool,
    packet_pending: Option<ffmpeg::codec::packet::Packet>,
}

impl<C: Codec> Decoder<C> {
    pub fn new(codec: C, packet_queue: std::sync::Arc<PacketQueue>, empty_queue_wake: Arc<WakeHandle>, reorder_pts: bool) -> Self {
        Self { codec, packet_queue, empty_queue_wake, reorder_pts, pkt_serial: -1, finished: false, packet_pending: None }
    }

    pub fn packet_queue(&self) -> &std::sync::Arc<PacketQueue> {
        &self.packet_queue
    }

    /// Whether video pts selection should prefer the codec's best-effort
    /// timestamp over the frame's raw, unreordered one. Stored here rather
    /// than threaded separately into `StreamPipeline` since it travels with
    /// the same decoder the pipeline already owns.
    pub fn reorder_pts(&self) -> bool {
        self.reorder_pts
    }

    /// Advances the decode state machine by at most one packet's worth of
    /// work and returns immediately — never blocks. `blocking` controls
    /// whether the underlying packet pull may block when the codec needs
    /// more input and none is queued yet.
    pub fn decode(&mut self, blocking: bool) -> DecodeStep<C::Frame> {
        loop {
            let mut frame = self.codec.new_frame();
            match self.codec.codec_receive_frame(&mut frame) {
                Ok(()) => return DecodeStep::Ready(frame, self.pkt_serial),
                Err(ffmpeg::Error::Eof) => {
                    self.codec.codec_flush();
                    return DecodeStep::End;
                }
                Err(ffmpeg::Error::Other { errno }) if errno == ffi::EAGAIN => {}
                Err(_) => return DecodeStep::End,
            }

            if self.finished {
                return DecodeStep::End;
            }

            let packet = if let Some(p) = self.packet_pending.take() {
                p
            } else {
                // The demuxer's backpressure wait parks on this handle; wake
                // it here so it re-checks queue levels instead of riding out
                // the full timed wait while this decoder is starved.
                self.empty_queue_wake.notify();
                match self.packet_queue.get(blocking) {
                    PacketGet::Packet(pkt) => {
                        // A serial jump means a flush landed between the last
                        // packet we sent and this one — discard whatever the
                        // codec still has buffered from the old generation
                        // before feeding it anything new.
                        if pkt.serial != self.pkt_serial {
                            self.codec.codec_flush();
                            self.finished = false;
                        }
                        self.pkt_serial = pkt.serial;
                        if pkt.is_null() {
                            if self.codec.codec_send_eof().is_ok() {
                                self.finished = true;
                            }
                            continue;
                        }
                        pkt.data.expect("non-null packet carries data")
                    }
                    PacketGet::Empty => return DecodeStep::Empty,
                    PacketGet::Aborted => return DecodeStep::Aborted,
                }
            };

            match self.codec.codec_send_packet(&packet) {
                Ok(()) => {}
                Err(ffmpeg::Error::Other { errno }) if errno == ffi::EAGAIN => {
                    self.packet_pending = Some(packet);
                    return DecodeStep::Empty;
                }
                Err(_) => {}
            }
        }
    }

    /// Drop anything queued or pending in the codec — called on seek and on
    /// stream close, in lockstep with the paired `PacketQueue::flush`.
    pub fn flush(&mut self) {
        self.codec.codec_flush();
        self.packet_pending = None;
        self.finished = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeCodec {
        // Queue of scripted responses consumed by receive_frame.
        to_emit: std::collections::VecDeque<Result<u32, ffmpeg::Error>>,
        sent: usize,
        flushed: usize,
    }

    impl Codec for FakeCodec {
        type Frame = u32;

        fn new_frame(&self) -> Self::Frame {
            0
        }
        fn codec_send_packet(&mut self, _packet: &ffmpeg::codec::packet::Packet) -> Result<(), ffmpeg::Error> {
            self.sent += 1;
            Ok(())
        }
        fn codec_send_eof(&mut self) -> Result<(), ffmpeg::Error> {
            self.to_emit.push_back(Err(ffmpeg::Error::Eof));
            Ok(())
        }
        fn codec_receive_frame(&mut self, frame: &mut Self::Frame) -> Result<(), ffmpeg::Error> {
            match self.to_emit.pop_front() {
                Some(Ok(v)) => {
                    *frame = v;
                    Ok(())
                }
                Some(Err(e)) => Err(e),
                None => Err(ffmpeg::Error::Other { errno: ffi::EAGAIN }),
            }
        }
        fn codec_flush(&mut self) {
            self.flushed += 1;
        }
    }

    fn queue_with(packets: Vec<crate::packet_queue::Packet>) -> std::sync::Arc<PacketQueue> {
        let q = std::sync::Arc::new(PacketQueue::new());
        q.start();
        for p in packets {
            q.put(p);
        }
        q
    }

    fn wake() -> Arc<WakeHandle> {
        Arc::new(WakeHandle::new())
    }

    #[test]
    fn empty_queue_nonblocking_reports_empty() {
        let q = queue_with(vec![]);
        let codec = FakeCodec { to_emit: Default::default(), sent: 0, flushed: 0 };
        let mut dec = Decoder::new(codec, q, wake(), true);
        assert!(matches!(dec.decode(false), DecodeStep::Empty));
    }

    #[test]
    fn null_packet_drains_to_end() {
        let q = queue_with(vec![crate::packet_queue::Packet::null(0)]);
        let codec = FakeCodec { to_emit: Default::default(), sent: 0, flushed: 0 };
        let mut dec = Decoder::new(codec, q, wake(), true);
        assert!(matches!(dec.decode(false), DecodeStep::End));
        assert_eq!(dec.codec.flushed, 1);
    }

    #[test]
    fn aborted_queue_reports_aborted() {
        let q = std::sync::Arc::new(PacketQueue::new());
        // never started => aborted
        let codec = FakeCodec { to_emit: Default::default(), sent: 0, flushed: 0 };
        let mut dec = Decoder::new(codec, q, wake(), true);
        assert!(matches!(dec.decode(false), DecodeStep::Aborted));
    }

    #[test]
    fn reorder_pts_flag_round_trips() {
        let q = queue_with(vec![]);
        let codec = FakeCodec { to_emit: Default::default(), sent: 0, flushed: 0 };
        let dec = Decoder::new(codec, q, wake(), false);
        assert!(!dec.reorder_pts());
    }

    #[test]
    fn serial_jump_between_pulls_flushes_codec() {
        let q = std::sync::Arc::new(PacketQueue::new());
        q.start();
        q.put(crate::packet_queue::Packet::new(ffmpeg::codec::packet::Packet::empty(), 0));
        let codec = FakeCodec { to_emit: Default::default(), sent: 0, flushed: 0 };
        let mut dec = Decoder::new(codec, q.clone(), wake(), true);
        // First packet ever pulled always transitions away from the -1
        // sentinel, so it counts as a jump too — flushing an untouched
        // codec is harmless.
        assert!(matches!(dec.decode(false), DecodeStep::Empty));
        assert_eq!(dec.codec.flushed, 1);

        q.put(crate::packet_queue::Packet::new(ffmpeg::codec::packet::Packet::empty(), 0));
        assert!(matches!(dec.decode(false), DecodeStep::Empty));
        assert_eq!(dec.codec.flushed, 1, "same generation must not re-flush");

        q.flush(); // a seek: bumps the live serial
        q.put(crate::packet_queue::Packet::new(ffmpeg::codec::packet::Packet::empty(), 0));
        assert!(matches!(dec.decode(false), DecodeStep::Empty));
        assert_eq!(dec.codec.flushed, 2, "new generation must flush stale codec state");
    }

    #[test]
    fn flush_resets_pending_and_finished() {
        let q = queue_with(vec![]);
        let codec = FakeCodec { to_emit: Default::default(), sent: 0, flushed: 0 };
        let mut dec = Decoder::new(codec, q, wake(), true);
        dec.finished = true;
        dec.flush();
        assert!(!dec.finished);
        assert!(dec.packet_pending.is_none());
        assert_eq!(dec.codec.flushed, 1);
    }
}
