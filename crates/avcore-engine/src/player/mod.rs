// crates/avcore-engine/src/player/mod.rs
//
// Player: the public-facing orchestrator. Owns the clocks and queues,
// spawns the demux/decode worker threads on `open`, and exposes the
// scheduler entry points a host's presentation loop and audio callback
// drive.

pub mod demux;
pub mod sync;

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::Context as _;
use crossbeam_channel::{Receiver, Sender};
use ffmpeg_the_third as ffmpeg;
use ffmpeg::media::Type;
use uuid::Uuid;

use avcore_types::{AudioParams, CoreError, ErrorKind, OnErrorCb, PlayerOptions, SyncType};

use crate::clock::Clock;
use crate::decoder::Decoder;
use crate::frame_queue::{Frame, FrameQueue, AUDIO_QUEUE_SIZE, VIDEO_QUEUE_SIZE};
use crate::packet_queue::PacketQueue;
use crate::pipeline::audio::AudioPipeline;
use crate::pipeline::video::VideoPipeline;
use demux::{has_enough_packets, Demuxer, WakeHandle};
use sync::{adapt_external_clock_speed, compute_target_delay, frame_duration, max_frame_duration, resolve_master, stretch_s16, AudioDriftCorrector};

#[derive(Clone, Copy, Default)]
pub struct StreamMeta {
    pub duration_secs: Option<f64>,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: f32,
}

struct SeekRequest {
    target_secs: f64,
    relative: bool,
}

/// Messages routed to the demux thread — it's the only thread holding the
/// open `ffmpeg::format::context::Input`, so anything that needs the
/// container (seeking, chapter/stream enumeration) has to go through here.
enum ControlRequest {
    Seek(SeekRequest),
    CycleChannel { kind: Type, stream_index: usize },
}

pub struct Player {
    id: Uuid,
    errors_tx: Sender<CoreError>,
    errors_rx: Receiver<CoreError>,

    abort_request: Arc<AtomicBool>,
    wake: Arc<WakeHandle>,
    paused: Arc<AtomicBool>,
    step: Arc<AtomicBool>,
    force_refresh: Arc<AtomicBool>,
    eof: Arc<AtomicBool>,

    av_sync_type: Arc<Mutex<SyncType>>,
    video_clock: Arc<Mutex<Clock>>,
    audio_clock: Arc<Mutex<Clock>>,
    external_clock: Arc<Mutex<Clock>>,
    realtime: bool,

    video_queue: Option<Arc<PacketQueue>>,
    audio_queue: Option<Arc<PacketQueue>>,
    picture_queue: Option<Arc<FrameQueue>>,
    sample_queue: Option<Arc<FrameQueue>>,
    stream_list: Vec<(usize, Type)>,
    active_video_stream: Option<usize>,
    active_audio_stream: Option<usize>,

    control_req: Arc<Mutex<Option<ControlRequest>>>,
    volume: Arc<AtomicI32>,

    frame_timer: f64,
    drift: AudioDriftCorrector,
    audio_clock_value: f64,
    audio_params: Option<AudioParams>,
    audio_scratch: Vec<u8>,

    threads: Vec<JoinHandle<()>>,
    meta: Arc<Mutex<StreamMeta>>,
    options: Arc<PlayerOptions>,
}

impl Player {
    pub fn new() -> Self {
        let video_serial = crate::serial::SerialRef::new();
        let audio_serial = crate::serial::SerialRef::new();
        let external_serial = crate::serial::SerialRef::new();
        let (errors_tx, errors_rx) = crossbeam_channel::unbounded();
        Self {
            id: Uuid::new_v4(),
            errors_tx,
            errors_rx,
            abort_request: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(WakeHandle::new()),
            paused: Arc::new(AtomicBool::new(false)),
            step: Arc::new(AtomicBool::new(false)),
            force_refresh: Arc::new(AtomicBool::new(false)),
            eof: Arc::new(AtomicBool::new(false)),
            av_sync_type: Arc::new(Mutex::new(SyncType::Audio)),
            video_clock: Arc::new(Mutex::new(Clock::new(video_serial))),
            audio_clock: Arc::new(Mutex::new(Clock::new(audio_serial))),
            external_clock: Arc::new(Mutex::new(Clock::new(external_serial))),
            realtime: false,
            video_queue: None,
            audio_queue: None,
            picture_queue: None,
            sample_queue: None,
            stream_list: Vec::new(),
            active_video_stream: None,
            active_audio_stream: None,
            control_req: Arc::new(Mutex::new(None)),
            volume: Arc::new(AtomicI32::new(100)),
            frame_timer: 0.0,
            drift: AudioDriftCorrector::new(0.0),
            audio_clock_value: f64::NAN,
            audio_params: None,
            audio_scratch: Vec::new(),
            threads: Vec::new(),
            meta: Arc::new(Mutex::new(StreamMeta::default())),
            options: Arc::new(PlayerOptions::default()),
        }
    }

    /// Opens `url`, probes its streams, and spawns the demux and decode
    /// worker threads. Fatal failures (no playable stream, cannot open) are
    /// `ErrorKind::FatalSetup` and also routed to `options.on_error` if set.
    pub fn open(&mut self, url: &str, options: PlayerOptions) -> Result<(), CoreError> {
        let volume = options.audio_volume.clamp(0, 100);
        self.volume.store(volume, Ordering::Relaxed);

        let report_fatal = |on_error: &Option<OnErrorCb>, err: CoreError| -> CoreError {
            if let Some(cb) = on_error {
                cb(err.kind, err.to_string());
            }
            err
        };

        let mut ictx = match ffmpeg::format::input(url).with_context(|| format!("opening input {url}")) {
            Ok(ictx) => ictx,
            Err(e) => return Err(report_fatal(&options.on_error, CoreError::new(ErrorKind::FatalSetup, e))),
        };

        if options.genpts {
            // generate-missing-pts is a demuxer-open-time flag upstream;
            // ffmpeg_the_third doesn't expose an options dict setter here,
            // so this is a documented limitation rather than a silent gap.
        }

        let video_stream = ictx.streams().best(Type::Video).map(|s| s.index());
        let audio_stream = if options.audio_disable { None } else { ictx.streams().best(Type::Audio).map(|s| s.index()) };

        if video_stream.is_none() && audio_stream.is_none() {
            return Err(report_fatal(&options.on_error, CoreError::new(ErrorKind::FatalSetup, anyhow::anyhow!("no playable stream in {url}"))));
        }

        self.stream_list = ictx.streams().map(|s| (s.index(), s.parameters().medium())).collect();
        self.active_video_stream = video_stream;
        self.active_audio_stream = audio_stream;
        self.realtime = is_realtime(url);

        let duration_secs = if ictx.duration() > 0 { Some(ictx.duration() as f64 / f64::from(ffmpeg::ffi::AV_TIME_BASE)) } else { None };

        let video_queue = video_stream.map(|_| Arc::new(PacketQueue::new()));
        let audio_queue = audio_stream.map(|_| Arc::new(PacketQueue::new()));
        if let Some(q) = &video_queue {
            q.start();
            *self.video_clock.lock().unwrap() = Clock::new(q.serial_ref());
        }
        if let Some(q) = &audio_queue {
            q.start();
            *self.audio_clock.lock().unwrap() = Clock::new(q.serial_ref());
        }

        let picture_queue = video_queue.as_ref().map(|q| Arc::new(FrameQueue::new(Arc::clone(q), VIDEO_QUEUE_SIZE, true)));
        let sample_queue = audio_queue.as_ref().map(|q| Arc::new(FrameQueue::new(Arc::clone(q), AUDIO_QUEUE_SIZE, false)));

        if let Some(idx) = video_stream {
            let stream = ictx.stream(idx).expect("stream index came from this context");
            let (w, h, sar_num, sar_den) = unsafe {
                let p = stream.parameters().as_ptr();
                ((*p).width as u32, (*p).height as u32, (*p).sample_aspect_ratio.num, (*p).sample_aspect_ratio.den)
            };
            let sar = if sar_den != 0 { sar_num as f32 / sar_den as f32 } else { 1.0 };
            *self.meta.lock().unwrap() = StreamMeta { duration_secs, width: w, height: h, sample_aspect_ratio: sar };
            if let Some(cb) = &options.video_meta_cb {
                cb(w, h, sar);
            }
        }

        self.video_queue = video_queue.clone();
        self.audio_queue = audio_queue.clone();
        self.picture_queue = picture_queue.clone();
        self.sample_queue = sample_queue.clone();
        self.abort_request.store(false, Ordering::Release);
        self.eof.store(false, Ordering::Release);
        self.options = Arc::new(options);

        if let (Some(idx), Some(vq), Some(pq)) = (video_stream, video_queue.clone(), picture_queue.clone()) {
            let decoder = match open_video_decoder(&mut ictx, idx) {
                Ok(d) => d,
                Err(e) => return Err(report_fatal(&self.options.on_error, CoreError::new(ErrorKind::FatalSetup, e))),
            };
            let time_base = ictx.stream(idx).unwrap().time_base();
            let frame_rate = ictx.stream(idx).unwrap().rate();
            let autorotate = self.options.autorotate;
            let reorder_pts = self.options.reorder_pts;
            let dec = Decoder::new(decoder, Arc::clone(&vq), Arc::clone(&self.wake), reorder_pts);
            let id = self.id;
            let av_sync_type = Arc::clone(&self.av_sync_type);
            let audio_clock = Arc::clone(&self.audio_clock);
            let external_clock = Arc::clone(&self.external_clock);
            let has_audio = audio_stream.is_some();
            let handle = std::thread::spawn(move || {
                let mut pipeline = VideoPipeline::new(dec, pq, autorotate, Vec::new(), vec!["yuv420p"], time_base, frame_rate, false);
                loop {
                    let sync_type = *av_sync_type.lock().unwrap();
                    let master = resolve_master(sync_type, true, has_audio);
                    let is_master = master == SyncType::Video;
                    let master_pts = if is_master {
                        None
                    } else {
                        let v = match master {
                            SyncType::Audio => audio_clock.lock().unwrap().get(),
                            SyncType::External => external_clock.lock().unwrap().get(),
                            SyncType::Video => f64::NAN,
                        };
                        v.is_finite().then_some(v)
                    };
                    if !pipeline.run_once(master_pts, is_master, true) {
                        break;
                    }
                }
                eprintln!("[decoder:video {id}] thread exit");
            });
            self.threads.push(handle);
        }

        if let (Some(idx), Some(aq), Some(sq)) = (audio_stream, audio_queue.clone(), sample_queue.clone()) {
            let decoder = match open_audio_decoder(&mut ictx, idx) {
                Ok(d) => d,
                Err(e) => return Err(report_fatal(&self.options.on_error, CoreError::new(ErrorKind::FatalSetup, e))),
            };
            let time_base = ictx.stream(idx).unwrap().time_base();

            let proposed = AudioParams {
                sample_rate: decoder.rate() as i32,
                channels: decoder.channels() as i32,
                channel_layout_mask: decoder.channel_layout().bits() as u64,
            };
            let force_output_format = if let Some(cb) = &self.options.audio_meta_cb {
                let negotiated = cb(proposed);
                let mask = negotiated.channel_layout_mask;
                let rate = negotiated.sample_rate;
                self.audio_params = Some(proposed);
                Some((mask, rate))
            } else {
                self.audio_params = Some(proposed);
                None
            };

            // reorder_pts only changes video pts selection (see
            // Decoder::reorder_pts); audio always derives pts from the
            // frame's own timestamp in push_through_graph, so the value
            // carried here is inert.
            let dec = Decoder::new(decoder, Arc::clone(&aq), Arc::clone(&self.wake), true);
            let id = self.id;
            let handle = std::thread::spawn(move || {
                let mut pipeline = AudioPipeline::new(dec, sq, Vec::new(), force_output_format, time_base);
                while pipeline.run_once(true) {}
                eprintln!("[decoder:audio {id}] thread exit");
            });
            self.threads.push(handle);
        }

        let abort = Arc::clone(&self.abort_request);
        let wake = Arc::clone(&self.wake);
        let paused = Arc::clone(&self.paused);
        let step = Arc::clone(&self.step);
        let eof = Arc::clone(&self.eof);
        let control_req = Arc::clone(&self.control_req);
        let external_clock = Arc::clone(&self.external_clock);
        let vq = video_queue;
        let aq = audio_queue;
        let video_tb_den = video_stream.map(|idx| f64::from(ictx.stream(idx).unwrap().time_base().denominator()));
        let audio_tb_den = audio_stream.map(|idx| f64::from(ictx.stream(idx).unwrap().time_base().denominator()));
        let play_range = self.options.start_time.zip(self.options.duration).map(|(s, d)| (s, s + d)).or_else(|| self.options.start_time.map(|s| (s, -1)));
        let loop_playback = self.options.loop_playback;
        let id = self.id;
        let errors_tx = self.errors_tx.clone();
        if self.options.run_sync {
            // Host asked to drive the read loop itself rather than have the
            // engine spawn a thread for it; blocks until close/EOF.
            run_demux_loop(
                id, ictx, abort, wake, paused, step, eof, control_req, external_clock, vq, aq, video_stream, audio_stream, video_tb_den, audio_tb_den, play_range, loop_playback, errors_tx,
            );
        } else {
            let handle = std::thread::spawn(move || {
                run_demux_loop(
                    id, ictx, abort, wake, paused, step, eof, control_req, external_clock, vq, aq, video_stream, audio_stream, video_tb_den, audio_tb_den, play_range, loop_playback, errors_tx,
                );
            });
            self.threads.push(handle);
        }

        Ok(())
    }

    /// Receiver side of the worker threads' error channel — fatal and soft
    /// errors alike, for a host that wants to observe them directly rather
    /// than (or in addition to) `PlayerOptions::on_error`.
    pub fn errors(&self) -> &Receiver<CoreError> {
        &self.errors_rx
    }

    pub fn close(&mut self) {
        self.abort_request.store(true, Ordering::Release);
        if let Some(q) = &self.video_queue {
            q.abort();
        }
        if let Some(q) = &self.audio_queue {
            q.abort();
        }
        if let Some(fq) = &self.picture_queue {
            fq.signal();
        }
        if let Some(fq) = &self.sample_queue {
            fq.signal();
        }
        self.wake.notify();
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.video_queue = None;
        self.audio_queue = None;
        self.picture_queue = None;
        self.sample_queue = None;
    }

    pub fn toggle_pause(&mut self) {
        let was_paused = self.paused.fetch_xor(true, Ordering::AcqRel);
        let now_paused = !was_paused;
        self.video_clock.lock().unwrap().set_paused(now_paused);
        self.audio_clock.lock().unwrap().set_paused(now_paused);
        self.external_clock.lock().unwrap().set_paused(now_paused);
    }

    pub fn step_to_next_frame(&mut self) {
        if self.paused.load(Ordering::Acquire) {
            self.toggle_pause();
        }
        self.step.store(true, Ordering::Release);
    }

    pub fn seek_to(&mut self, seconds: f64) {
        *self.control_req.lock().unwrap() = Some(ControlRequest::Seek(SeekRequest { target_secs: seconds, relative: false }));
        self.wake.notify();
    }

    /// `ffmpeg-the-third` exposes no chapter list (see DESIGN.md), so a
    /// chapter step is approximated as a fixed fraction of total duration —
    /// still a real seek through the normal `control_req` path, not a no-op.
    pub fn seek_chapter(&mut self, delta: i32) {
        let duration = self.meta.lock().unwrap().duration_secs.unwrap_or(0.0);
        if duration <= 0.0 {
            return;
        }
        let step = (duration / 10.0).max(1.0);
        let base = self.current_pts();
        let base = if base.is_finite() { base } else { 0.0 };
        let target = (base + step * delta as f64).clamp(0.0, duration);
        self.seek_to(target);
    }

    /// Resolves the next stream index of `kind` (wrapping) and routes the
    /// switch to the demux thread, the only thread holding the open
    /// container. The decoder/pipeline rebind itself is not wired yet (see
    /// DESIGN.md); the demux thread flushes the affected queue so the
    /// change is at least observable instead of silently dropped.
    pub fn cycle_channel(&mut self, kind: ffmpeg::media::Type) {
        let matching: Vec<usize> = self.stream_list.iter().filter(|(_, k)| *k == kind).map(|(i, _)| *i).collect();
        if matching.len() < 2 {
            return;
        }
        let current = match kind {
            Type::Video => self.active_video_stream,
            Type::Audio => self.active_audio_stream,
            _ => return,
        };
        let pos = current.and_then(|c| matching.iter().position(|&i| i == c)).unwrap_or(0);
        let next = matching[(pos + 1) % matching.len()];
        if Some(next) == current {
            return;
        }
        match kind {
            Type::Video => self.active_video_stream = Some(next),
            Type::Audio => self.active_audio_stream = Some(next),
            _ => {}
        }
        *self.control_req.lock().unwrap() = Some(ControlRequest::CycleChannel { kind, stream_index: next });
        self.wake.notify();
    }

    pub fn set_sync_type(&mut self, sync_type: SyncType) {
        *self.av_sync_type.lock().unwrap() = sync_type;
    }

    pub fn sync_type(&self) -> SyncType {
        *self.av_sync_type.lock().unwrap()
    }

    fn current_pts(&self) -> f64 {
        let sync_type = *self.av_sync_type.lock().unwrap();
        match resolve_master(sync_type, self.video_queue.is_some(), self.audio_queue.is_some()) {
            SyncType::Audio => self.audio_clock.lock().unwrap().get(),
            SyncType::Video => self.video_clock.lock().unwrap().get(),
            SyncType::External => self.external_clock.lock().unwrap().get(),
        }
    }

    pub fn set_volume(&mut self, max: i32, sign: i32, step: i32) {
        let current = self.volume.load(Ordering::Relaxed);
        let next = (current + sign * step).clamp(0, max);
        self.volume.store(next, Ordering::Relaxed);
    }

    pub fn volume(&self) -> i32 {
        self.volume.load(Ordering::Relaxed)
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn force_refresh(&self) -> bool {
        self.force_refresh.load(Ordering::Acquire)
    }

    pub fn set_force_refresh(&self, value: bool) {
        self.force_refresh.store(value, Ordering::Release);
    }

    pub fn audio_params(&self) -> Option<AudioParams> {
        self.audio_params
    }

    pub fn format_context(&self) -> StreamMeta {
        *self.meta.lock().unwrap()
    }

    /// True once the demux thread has seen EOF and isn't looping. A
    /// presenter can use this together with both frame queues reporting no
    /// `remaining()` to know playback has genuinely finished.
    pub fn eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn frames_pending(&self) -> usize {
        let pic = self.picture_queue.as_ref().map(|q| q.remaining()).unwrap_or(0);
        let sam = self.sample_queue.as_ref().map(|q| q.remaining()).unwrap_or(0);
        pic + sam
    }

    /// Scheduler entry point for the presentation thread. `remaining_time`
    /// is both the input budget and the output hint for how long until the
    /// next call should happen. Returns the frame actually due for display.
    pub fn acquire_video_frame(&mut self, remaining_time: &mut f64) -> Option<Frame> {
        let pq = Arc::clone(self.picture_queue.as_ref()?);
        if self.paused.load(Ordering::Acquire) {
            return None;
        }

        let sync_type = *self.av_sync_type.lock().unwrap();
        let master_kind = resolve_master(sync_type, self.video_queue.is_some(), self.audio_queue.is_some());
        if master_kind == SyncType::External && self.realtime {
            let counts: Vec<usize> =
                [self.video_queue.as_deref().map(PacketQueue::packet_count), self.audio_queue.as_deref().map(PacketQueue::packet_count)].into_iter().flatten().collect();
            if let (Some(&min), Some(&max)) = (counts.iter().min(), counts.iter().max()) {
                let speed = self.external_clock.lock().unwrap().speed();
                let new_speed = adapt_external_clock_speed(speed, min, max);
                self.external_clock.lock().unwrap().set_speed(new_speed);
            }
        }

        loop {
            if !pq.peek_readable() {
                return None;
            }

            let frame_serial = pq.with_current(|cur| cur.serial);
            if let Some(vq) = &self.video_queue {
                if frame_serial != vq.serial() {
                    pq.next();
                    continue;
                }
            }

            let is_master = master_kind == SyncType::Video;
            let (last_pts, frame_pts, last_serial, last_duration) = pq.with_current_and_last(|cur, last| (last.pts, cur.pts, last.serial, last.duration));

            if last_serial != frame_serial {
                self.frame_timer = crate::time::monotonic_now();
            }

            let max_dur = max_frame_duration(false);
            let duration = frame_duration(last_pts, frame_pts, last_duration, max_dur);

            let master = match master_kind {
                SyncType::Audio => self.audio_clock.lock().unwrap().get(),
                SyncType::External => self.external_clock.lock().unwrap().get(),
                SyncType::Video => self.video_clock.lock().unwrap().get(),
            };
            let delay = compute_target_delay(duration, self.video_clock.lock().unwrap().get(), master, is_master, max_dur);

            let now = crate::time::monotonic_now();
            if now < self.frame_timer + delay {
                *remaining_time = remaining_time.min(self.frame_timer + delay - now);
                return None;
            }

            self.frame_timer += delay;
            if now - self.frame_timer > 0.1 {
                self.frame_timer = now;
            }

            if !frame_pts.is_nan() {
                pq.with_current(|cur| {
                    self.video_clock.lock().unwrap().set(cur.pts, frame_serial);
                });
                self.external_clock.lock().unwrap().sync_to_slave(&self.video_clock.lock().unwrap(), 10.0);
            }

            let stepping = self.step.load(Ordering::Acquire);
            if !stepping && !is_master {
                let drop_for_next = pq.with_next(|next| {
                    next.map(|n| {
                        let next_duration = frame_duration(frame_pts, n.pts, duration, max_dur);
                        now > self.frame_timer + next_duration
                    })
                    .unwrap_or(false)
                });
                if drop_for_next {
                    pq.next();
                    continue;
                }
            }

            let displayed = pq.with_current(|cur| cur.clone());

            pq.next();
            self.force_refresh.store(true, Ordering::Release);
            if self.step.swap(false, Ordering::AcqRel) && !self.paused.load(Ordering::Acquire) {
                self.toggle_pause();
            }

            return if self.force_refresh.load(Ordering::Acquire) && pq.rindex_shown() { Some(displayed) } else { None };
        }
    }

    /// Scheduler entry point for the audio callback: pulls the next decoded
    /// buffer, retargeting its sample count toward the master clock when
    /// audio itself isn't master. Returns the retargeted interleaved S16
    /// bytes, valid until the next call.
    pub fn acquire_audio_buf(&mut self) -> Option<&[u8]> {
        let sq = Arc::clone(self.sample_queue.as_ref()?);
        if !sq.peek_readable() {
            return None;
        }

        let (pts, duration, nb_samples, src_freq, channels, data) = sq.with_current(|f| {
            let audio = f.audio.as_ref().expect("sample queue frame always carries decoded audio");
            let channels = audio.channel_layout().channels() as usize;
            let bytes = channels * audio.samples() * std::mem::size_of::<i16>();
            let raw = audio.data(0);
            (f.pts, f.duration, audio.samples() as i32, audio.rate() as i32, channels, raw[..bytes.min(raw.len())].to_vec())
        });

        self.audio_clock_value = if pts.is_finite() { pts + duration } else { f64::NAN };

        let sync_type = *self.av_sync_type.lock().unwrap();
        let master_kind = resolve_master(sync_type, self.video_queue.is_some(), self.audio_queue.is_some());
        let wanted = if master_kind != SyncType::Audio {
            let master = match master_kind {
                SyncType::Video => self.video_clock.lock().unwrap().get(),
                SyncType::External => self.external_clock.lock().unwrap().get(),
                SyncType::Audio => f64::NAN,
            };
            let diff = self.audio_clock_value - master;
            self.drift.wanted_sample_count(nb_samples, diff, src_freq)
        } else {
            nb_samples
        };

        self.audio_scratch = stretch_s16(&data, nb_samples, wanted, channels);
        sq.next();
        Some(self.audio_scratch.as_slice())
    }

    pub fn sync_audio(&mut self, write_start: f64, written_bytes: i64, bytes_per_sec: i32, hw_buf_size: i64) {
        if bytes_per_sec <= 0 {
            return;
        }
        self.drift.set_diff_threshold(hw_buf_size as f64 / bytes_per_sec as f64);
        let pts = self.audio_clock_value - (2 * hw_buf_size + written_bytes) as f64 / bytes_per_sec as f64;
        let serial = self.audio_clock.lock().unwrap().serial();
        self.audio_clock.lock().unwrap().set_at(pts, serial, write_start);
        let audio = self.audio_clock.lock().unwrap();
        self.external_clock.lock().unwrap().sync_to_slave(&audio, 10.0);
    }
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.close();
    }
}

/// Matches ffplay's own `is_realtime`: judged purely from the URL scheme,
/// since ffmpeg_the_third's `Input` doesn't expose the input format name.
fn is_realtime(url: &str) -> bool {
    const SCHEMES: [&str; 5] = ["rtp:", "rtsp:", "sdp:", "udp:", "mmsh:"];
    SCHEMES.iter().any(|s| url.starts_with(s))
}

fn open_video_decoder(ictx: &mut ffmpeg::format::context::Input, idx: usize) -> anyhow::Result<ffmpeg::codec::decoder::Video> {
    let stream = ictx.stream(idx).context("missing video stream")?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters()).context("building video codec context")?;
    ctx.decoder().video().context("opening video decoder")
}

fn open_audio_decoder(ictx: &mut ffmpeg::format::context::Input, idx: usize) -> anyhow::Result<ffmpeg::codec::decoder::Audio> {
    let stream = ictx.stream(idx).context("missing audio stream")?;
    let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters()).context("building audio codec context")?;
    ctx.decoder().audio().context("opening audio decoder")
}

#[allow(clippy::too_many_arguments)]
fn run_demux_loop(
    id: Uuid,
    mut ictx: ffmpeg::format::context::Input,
    abort: Arc<AtomicBool>,
    wake: Arc<WakeHandle>,
    paused: Arc<AtomicBool>,
    step: Arc<AtomicBool>,
    eof: Arc<AtomicBool>,
    control_req: Arc<Mutex<Option<ControlRequest>>>,
    external_clock: Arc<Mutex<Clock>>,
    video_queue: Option<Arc<PacketQueue>>,
    audio_queue: Option<Arc<PacketQueue>>,
    video_stream: Option<usize>,
    audio_stream: Option<usize>,
    video_tb_den: Option<f64>,
    audio_tb_den: Option<f64>,
    play_range: Option<(i64, i64)>,
    loop_playback: bool,
    // Reserved for a future FatalSetup propagated mid-stream; every error
    // this loop currently hits is either SoftDemuxStall (retry) or
    // SeekFailed (logged but not surfaced).
    _errors_tx: Sender<CoreError>,
) {
    let demuxer = Demuxer::new(Arc::clone(&abort), Arc::clone(&wake));

    // A video stream whose only frame is an attached picture (cover art)
    // would need one injected here before the first read; ffmpeg-the-third
    // exposes no `disposition`/`AV_DISPOSITION_ATTACHED_PIC` flag to detect
    // that case, so it isn't handled (see DESIGN.md).

    loop {
        if demuxer.aborted() {
            break;
        }

        if let Some(req) = control_req.lock().unwrap().take() {
            match req {
                ControlRequest::Seek(req) => {
                    let target_ticks = (req.target_secs * f64::from(ffmpeg::ffi::AV_TIME_BASE)) as i64;
                    let base = if req.relative { 0 } else { target_ticks };
                    match ictx.seek(base, ..) {
                        Ok(()) => {
                            if let Some(q) = &video_queue {
                                q.flush();
                            }
                            if let Some(q) = &audio_queue {
                                q.flush();
                            }
                            // The external clock has no packet queue of its
                            // own, so its generation never advances; reseed
                            // it directly with the target rather than
                            // waiting on a decoded frame to do it.
                            external_clock.lock().unwrap().set(req.target_secs, 0);
                            if paused.load(Ordering::Acquire) {
                                step.store(true, Ordering::Release);
                            }
                            eprintln!("[demux {id}] seek to {}s", req.target_secs);
                        }
                        Err(e) => eprintln!("[demux {id}] seek failed: {e}"),
                    }
                }
                ControlRequest::CycleChannel { kind, stream_index } => {
                    let kind_name = match kind {
                        Type::Video => "video",
                        Type::Audio => "audio",
                        _ => "other",
                    };
                    eprintln!("[demux {id}] cycle {kind_name} -> stream {stream_index}");
                    match kind {
                        Type::Video => {
                            if let Some(q) = &video_queue {
                                q.flush();
                            }
                        }
                        Type::Audio => {
                            if let Some(q) = &audio_queue {
                                q.flush();
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        if has_enough_packets(video_queue.as_deref(), audio_queue.as_deref(), video_tb_den, audio_tb_den) {
            demuxer.backpressure_wait();
            continue;
        }

        // Approximates "both decoders finished at
        // the current serial and their frame queues drained") with the one
        // signal this thread actually owns: it has already injected EOF
        // null packets and both packet queues are empty, so nothing more
        // will arrive for the decoders to work through.
        let queues_drained = video_queue.as_deref().map(|q| q.packet_count() == 0).unwrap_or(true)
            && audio_queue.as_deref().map(|q| q.packet_count() == 0).unwrap_or(true);
        if !paused.load(Ordering::Acquire) && eof.load(Ordering::Acquire) && queues_drained {
            if loop_playback {
                let _ = ictx.seek(0, ..);
                eof.store(false, Ordering::Release);
                eprintln!("[demux {id}] loop: restarting at 0s");
                continue;
            }
            break;
        }

        let mut packets = ictx.packets();
        match packets.next() {
            Some(Ok((stream, packet))) => {
                demuxer.route_packet(packet, stream.index(), video_stream, audio_stream, video_queue.as_deref(), audio_queue.as_deref(), play_range, stream.start_time());
            }
            Some(Err(_)) | None => {
                if !eof.swap(true, Ordering::AcqRel) {
                    demuxer.inject_eof(video_stream, audio_stream, video_queue.as_deref(), audio_queue.as_deref());
                }
                demuxer.eof_retry_wait();
            }
        }
    }
    eprintln!("[demux {id}] thread exit");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_player_starts_unpaused_and_idle() {
        let p = Player::new();
        assert!(!p.paused());
        assert!(!p.force_refresh());
        assert_eq!(p.volume(), 100);
    }

    #[test]
    fn set_volume_clamps_to_range() {
        let mut p = Player::new();
        p.set_volume(100, 1, 1000);
        assert_eq!(p.volume(), 100);
        p.set_volume(100, -1, 1000);
        assert_eq!(p.volume(), 0);
    }

    #[test]
    fn toggle_pause_flips_state() {
        let mut p = Player::new();
        p.toggle_pause();
        assert!(p.paused());
        p.toggle_pause();
        assert!(!p.paused());
    }
}
