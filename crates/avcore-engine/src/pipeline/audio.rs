// crates/avcore-engine/src/pipeline/audio.rs
//
// Audio stream pipeline: decode -> filter graph (always resampling to S16)
// -> push into the sample FrameQueue.

use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;

use crate::decoder::{DecodeStep, Decoder};
use crate::frame_queue::{Frame, FrameQueue};
use crate::pipeline::{audio_filter_spec, AudioGraphKey};

pub struct AudioPipeline {
    decoder: Decoder<ffmpeg::codec::decoder::Audio>,
    frame_queue: Arc<FrameQueue>,
    graph: Option<ffmpeg::filter::Graph>,
    graph_key: Option<AudioGraphKey>,
    user_filters: Vec<String>,
    force_output_format: Option<(u64, i32)>,
    time_base: ffmpeg::Rational,
    next_pts: f64,
    next_pts_tb: ffmpeg::Rational,
}

impl AudioPipeline {
    pub fn new(
        decoder: Decoder<ffmpeg::codec::decoder::Audio>,
        frame_queue: Arc<FrameQueue>,
        user_filters: Vec<String>,
        force_output_format: Option<(u64, i32)>,
        time_base: ffmpeg::Rational,
    ) -> Self {
        Self {
            decoder,
            frame_queue,
            graph: None,
            graph_key: None,
            user_filters,
            force_output_format,
            time_base,
            next_pts: f64::NAN,
            next_pts_tb: ffmpeg::Rational::new(0, 1),
        }
    }

    pub fn run_once(&mut self, blocking: bool) -> bool {
        match self.decoder.decode(blocking) {
            DecodeStep::Ready(raw, serial) => {
                if serial != self.decoder.packet_queue().serial() {
                    return true;
                }
                self.reconfigure_if_needed(&raw, serial);
                self.push_through_graph(raw, serial);
                true
            }
            DecodeStep::Empty => true,
            DecodeStep::End => false,
            DecodeStep::Aborted => false,
        }
    }

    fn reconfigure_if_needed(&mut self, frame: &ffmpeg::util::frame::audio::Audio, serial: i64) {
        let key = AudioGraphKey {
            format: frame.format() as i32,
            channel_layout: frame.channel_layout().bits() as u64,
            sample_rate: frame.rate() as i32,
            serial,
        };
        if self.graph_key == Some(key) && self.graph.is_some() {
            return;
        }

        let (layout, rate) = match self.force_output_format {
            Some((layout_mask, rate)) => (Some(channel_layout_name(layout_mask)), Some(rate)),
            None => (None, None),
        };
        let spec = audio_filter_spec(&self.user_filters, "s16", layout.as_deref(), rate);
        self.graph = build_audio_graph(frame, self.time_base, &spec).ok();
        self.graph_key = Some(key);
    }

    fn push_through_graph(&mut self, frame: ffmpeg::util::frame::audio::Audio, serial: i64) {
        let sample_rate = frame.rate() as f64;
        let raw_pts = frame.timestamp();
        let pts = match raw_pts {
            Some(p) => p as f64 * f64::from(self.time_base),
            None => {
                if self.next_pts_tb.numerator() != 0 {
                    self.next_pts
                } else {
                    f64::NAN
                }
            }
        };
        self.next_pts = if pts.is_finite() { pts + frame.samples() as f64 / sample_rate } else { self.next_pts };
        self.next_pts_tb = ffmpeg::Rational::new(1, frame.rate() as i32);

        let Some(graph) = self.graph.as_mut() else { return };
        let Ok(mut input) = graph.get("in") else { return };
        if input.source().add(&frame).is_err() {
            return;
        }
        let Ok(mut output) = graph.get("out") else { return };
        let mut sink = output.sink();
        let mut out_frame = ffmpeg::util::frame::audio::Audio::empty();
        while sink.frame(&mut out_frame).is_ok() {
            let duration = out_frame.samples() as f64 / sample_rate;
            let mut f = Frame::from_audio(out_frame.clone(), serial);
            f.pts = pts;
            f.duration = duration;
            f.pos = frame.packet().position;
            if self.frame_queue.peek_writable() {
                self.frame_queue.push(f);
            }
        }
    }
}

fn channel_layout_name(mask: u64) -> String {
    match mask {
        m if m == ffmpeg::channel_layout::ChannelLayout::MONO.bits() as u64 => "mono".to_string(),
        m if m == ffmpeg::channel_layout::ChannelLayout::STEREO.bits() as u64 => "stereo".to_string(),
        other => format!("0x{other:x}"),
    }
}

fn build_audio_graph(frame: &ffmpeg::util::frame::audio::Audio, time_base: ffmpeg::Rational, spec: &str) -> Result<ffmpeg::filter::Graph, ffmpeg::Error> {
    let mut graph = ffmpeg::filter::Graph::new();
    let args = format!(
        "time_base={}/{}:sample_rate={}:sample_fmt={}:channel_layout=0x{:x}",
        time_base.numerator(),
        time_base.denominator(),
        frame.rate(),
        frame.format().name(),
        frame.channel_layout().bits(),
    );
    graph.add(&ffmpeg::filter::find("abuffer").ok_or(ffmpeg::Error::Bug)?, "in", &args)?;
    graph.add(&ffmpeg::filter::find("abuffersink").ok_or(ffmpeg::Error::Bug)?, "out", "")?;
    graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_layout_name_falls_back_to_hex_mask() {
        assert_eq!(channel_layout_name(0x7), "0x7");
    }
}
