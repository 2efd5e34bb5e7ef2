// crates/avcore-engine/src/packet_queue.rs
//
// Unbounded FIFO of compressed packets with serial, size, duration, abort.
// One instance per stream (audio, video); the demux
// thread is the sole producer, the paired Decoder the sole consumer.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use ffmpeg_the_third as ffmpeg;

use crate::serial::SerialRef;

/// Per-entry bookkeeping overhead added to a packet's own byte size when
/// accounting toward the 15 MiB backpressure ceiling — mirrors counting the
/// list-node allocation alongside the payload, not just the payload itself.
const PACKET_QUEUE_OVERHEAD: usize = 48;

/// A compressed unit tagged with the queue generation it was inserted under.
/// `data = None` is the null packet: end-of-stream marker for `stream_index`.
pub struct Packet {
    pub data: Option<ffmpeg::codec::packet::Packet>,
    pub stream_index: usize,
    pub serial: i64,
}

impl Packet {
    pub fn new(data: ffmpeg::codec::packet::Packet, stream_index: usize) -> Self {
        Self { data: Some(data), stream_index, serial: 0 }
    }

    pub fn null(stream_index: usize) -> Self {
        Self { data: None, stream_index, serial: 0 }
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    fn size(&self) -> usize {
        self.data.as_ref().map(|p| p.size()).unwrap_or(0) + PACKET_QUEUE_OVERHEAD
    }

    /// Duration in the owning stream's time base — callers rescale to
    /// seconds with that stream's `time_base` when comparing against a
    /// wall-clock threshold.
    fn duration_ticks(&self) -> i64 {
        self.data.as_ref().map(|p| p.duration()).unwrap_or(0)
    }
}

/// Three-way outcome of `get`, mirroring the C convention of -1/0/1 return
/// codes but without overloading a single integer.
pub enum PacketGet {
    Packet(Packet),
    Empty,
    Aborted,
}

pub struct PacketQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    serial: SerialRef,
}

struct QueueState {
    packets: VecDeque<Packet>,
    size: usize,
    duration: i64,
    aborted: bool,
}

impl PacketQueue {
    /// Freshly created: aborted, serial 0. Must be `start`-ed before any
    /// producer may insert.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                packets: VecDeque::new(),
                size: 0,
                duration: 0,
                aborted: true,
            }),
            cond: Condvar::new(),
            serial: SerialRef::new(),
        }
    }

    pub fn serial_ref(&self) -> SerialRef {
        self.serial.clone()
    }

    pub fn serial(&self) -> i64 {
        self.serial.get()
    }

    pub fn packet_count(&self) -> usize {
        self.state.lock().unwrap().packets.len()
    }

    pub fn size_bytes(&self) -> usize {
        self.state.lock().unwrap().size
    }

    pub fn duration(&self) -> i64 {
        self.state.lock().unwrap().duration
    }

    pub fn aborted(&self) -> bool {
        self.state.lock().unwrap().aborted
    }

    pub fn start(&self) {
        let mut g = self.state.lock().unwrap();
        g.aborted = false;
        self.serial.bump();
        self.cond.notify_all();
    }

    pub fn abort(&self) {
        let mut g = self.state.lock().unwrap();
        g.aborted = true;
        self.cond.notify_all();
    }

    /// Drop every queued packet and bump the generation so consumers can
    /// tell old in-flight work apart from what follows the flush.
    pub fn flush(&self) {
        let mut g = self.state.lock().unwrap();
        g.packets.clear();
        g.size = 0;
        g.duration = 0;
        self.serial.bump();
    }

    /// Takes ownership of `packet`. Returns `false` if the queue is aborted
    /// (the caller should stop producing).
    pub fn put(&self, mut packet: Packet) -> bool {
        let mut g = self.state.lock().unwrap();
        if g.aborted {
            return false;
        }
        packet.serial = self.serial.get();
        g.size += packet.size();
        g.duration += packet.duration_ticks();
        g.packets.push_back(packet);
        self.cond.notify_one();
        true
    }

    pub fn put_null(&self, stream_index: usize) -> bool {
        self.put(Packet::null(stream_index))
    }

    /// `blocking = true` waits for a packet or an abort; `false` returns
    /// `Empty` immediately when there is nothing queued.
    pub fn get(&self, blocking: bool) -> PacketGet {
        let mut g = self.state.lock().unwrap();
        loop {
            if g.aborted {
                return PacketGet::Aborted;
            }
            if let Some(pkt) = g.packets.pop_front() {
                g.size -= pkt.size();
                g.duration -= pkt.duration_ticks();
                return PacketGet::Packet(pkt);
            }
            if !blocking {
                return PacketGet::Empty;
            }
            g = self.cond.wait(g).unwrap();
        }
    }
}

impl Default for PacketQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn empty_packet() -> ffmpeg::codec::packet::Packet {
        ffmpeg::codec::packet::Packet::empty()
    }

    #[test]
    fn starts_aborted_with_serial_zero() {
        let q = PacketQueue::new();
        assert!(q.aborted());
        assert_eq!(q.serial(), 0);
    }

    #[test]
    fn put_before_start_is_rejected() {
        let q = PacketQueue::new();
        assert!(!q.put(Packet::new(empty_packet(), 0)));
        assert_eq!(q.packet_count(), 0);
    }

    #[test]
    fn put_and_get_round_trip() {
        let q = PacketQueue::new();
        q.start();
        assert!(q.put(Packet::new(empty_packet(), 0)));
        assert_eq!(q.packet_count(), 1);
        match q.get(false) {
            PacketGet::Packet(p) => assert_eq!(p.stream_index, 0),
            _ => panic!("expected a packet"),
        }
        assert_eq!(q.packet_count(), 0);
    }

    #[test]
    fn get_nonblocking_on_empty_queue_is_empty() {
        let q = PacketQueue::new();
        q.start();
        match q.get(false) {
            PacketGet::Empty => {}
            _ => panic!("expected Empty"),
        }
    }

    #[test]
    fn flush_bumps_serial_and_drops_packets() {
        let q = PacketQueue::new();
        q.start();
        q.put(Packet::new(empty_packet(), 0));
        let before = q.serial();
        q.flush();
        assert_eq!(q.serial(), before + 1);
        assert_eq!(q.packet_count(), 0);
    }

    #[test]
    fn put_tags_current_serial() {
        let q = PacketQueue::new();
        q.start();
        q.flush();
        let expect_serial = q.serial();
        q.put(Packet::new(empty_packet(), 0));
        match q.get(false) {
            PacketGet::Packet(p) => assert_eq!(p.serial, expect_serial),
            _ => panic!("expected a packet"),
        }
    }

    #[test]
    fn abort_wakes_blocking_get() {
        let q = Arc::new(PacketQueue::new());
        q.start();
        let q2 = Arc::clone(&q);
        let handle = thread::spawn(move || matches!(q2.get(true), PacketGet::Aborted));
        thread::sleep(Duration::from_millis(20));
        q.abort();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn null_packet_carries_no_data() {
        let p = Packet::null(2);
        assert!(p.is_null());
        assert_eq!(p.stream_index, 2);
    }
}
