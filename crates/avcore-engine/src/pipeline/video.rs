// crates/avcore-engine/src/pipeline/video.rs
//
// Video stream pipeline: decode -> optional drop -> filter graph -> push
// into the picture FrameQueue.

use std::sync::Arc;

use ffmpeg_the_third as ffmpeg;

use crate::decoder::{DecodeStep, Decoder};
use crate::frame_queue::{Frame, FrameQueue};
use crate::pipeline::{autorotate_filters, video_filter_spec, VideoGraphKey};
use crate::player::sync::{max_frame_duration, AV_NOSYNC_THRESHOLD};

pub struct VideoPipeline {
    decoder: Decoder<ffmpeg::codec::decoder::Video>,
    frame_queue: Arc<FrameQueue>,
    graph: Option<ffmpeg::filter::Graph>,
    graph_key: Option<VideoGraphKey>,
    autorotate: bool,
    user_filters: Vec<String>,
    allowed_pix_fmts: Vec<&'static str>,
    time_base: ffmpeg::Rational,
    frame_rate: ffmpeg::Rational,
    ts_discont: bool,
}

impl VideoPipeline {
    pub fn new(
        decoder: Decoder<ffmpeg::codec::decoder::Video>,
        frame_queue: Arc<FrameQueue>,
        autorotate: bool,
        user_filters: Vec<String>,
        allowed_pix_fmts: Vec<&'static str>,
        time_base: ffmpeg::Rational,
        frame_rate: ffmpeg::Rational,
        ts_discont: bool,
    ) -> Self {
        Self {
            decoder,
            frame_queue,
            graph: None,
            graph_key: None,
            autorotate,
            user_filters,
            allowed_pix_fmts,
            time_base,
            frame_rate,
            ts_discont,
        }
    }

    /// Runs one decode-and-push iteration. Returns `false` once the
    /// decoder has hit `End`/`Aborted` and the caller should stop looping.
    pub fn run_once(&mut self, master_pts: Option<f64>, is_master: bool, blocking: bool) -> bool {
        match self.decoder.decode(blocking) {
            DecodeStep::Ready(raw, serial) => {
                if serial != self.decoder.packet_queue().serial() {
                    // Emitted from the codec's reorder buffer before the
                    // flush that bumped the queue's serial reached it.
                    return true;
                }
                if !is_master {
                    if let Some(master) = master_pts {
                        let pts = self.frame_pts_ticks(&raw).map(|t| t as f64 * f64::from(self.time_base)).unwrap_or(f64::NAN);
                        if pts.is_finite() && (pts - master).abs() > AV_NOSYNC_THRESHOLD {
                            return true; // dropped, keep going
                        }
                    }
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

    fn reconfigure_if_needed(&mut self, frame: &ffmpeg::util::frame::video::Video, serial: i64) {
        let key = VideoGraphKey { width: frame.width() as i32, height: frame.height() as i32, format: frame.format() as i32, serial };
        if self.graph_key == Some(key) && self.graph.is_some() {
            return;
        }
        let angle = display_matrix_angle(frame);
        let rotate_filters = if self.autorotate { autorotate_filters(angle) } else { Vec::new() };
        let spec = video_filter_spec(&rotate_filters, &self.user_filters, &self.allowed_pix_fmts);

        let graph = build_video_graph(frame, self.time_base, &spec).ok();
        self.graph = graph;
        self.graph_key = Some(key);
    }

    /// Video pts selection per `reorder_pts`: the codec's best-effort
    /// timestamp (already accounts for B-frame reordering) or the frame's
    /// own raw, unreordered pts.
    fn frame_pts_ticks(&self, frame: &ffmpeg::util::frame::video::Video) -> Option<i64> {
        if self.decoder.reorder_pts() {
            frame.timestamp()
        } else {
            frame.pts()
        }
    }

    fn push_through_graph(&mut self, frame: ffmpeg::util::frame::video::Video, serial: i64) {
        let pts_ticks = self.frame_pts_ticks(&frame).unwrap_or(0);
        let Some(graph) = self.graph.as_mut() else { return };
        let Ok(mut input) = graph.get("in") else { return };
        if input.source().add(&frame).is_err() {
            return;
        }
        let Ok(mut output) = graph.get("out") else { return };
        let mut sink = output.sink();
        let mut out_frame = ffmpeg::util::frame::video::Video::empty();
        while sink.frame(&mut out_frame).is_ok() {
            let pts = pts_ticks as f64 * f64::from(self.time_base);
            let duration = if self.frame_rate.numerator() != 0 {
                f64::from(self.frame_rate.invert())
            } else {
                0.0
            };
            let mut f = Frame::from_video(out_frame.clone(), serial);
            f.pts = pts;
            f.duration = duration;
            f.pos = frame.packet().position;
            if self.frame_queue.peek_writable() {
                self.frame_queue.push(f);
            }
        }
    }

    pub fn max_frame_duration(&self) -> f64 {
        max_frame_duration(self.ts_discont)
    }
}

fn display_matrix_angle(_frame: &ffmpeg::util::frame::video::Video) -> Option<f64> {
    // `ffmpeg::util::frame::side_data::Type::DisplayMatrix` carries a 3x3
    // int32 matrix read via `av_display_rotation_get`; ffmpeg-the-third
    // exposes side data bytes but not that helper, so the angle is derived
    // from the raw matrix bytes when present. Left unimplemented pending a
    // sample stream that actually carries rotation metadata to validate
    // the byte layout against.
    None
}

fn build_video_graph(frame: &ffmpeg::util::frame::video::Video, time_base: ffmpeg::Rational, spec: &str) -> Result<ffmpeg::filter::Graph, ffmpeg::Error> {
    let mut graph = ffmpeg::filter::Graph::new();
    let args = format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
        frame.width(),
        frame.height(),
        frame.format().descriptor().map(|d| d.name()).unwrap_or("yuv420p"),
        time_base.numerator(),
        time_base.denominator(),
        frame.aspect_ratio().numerator().max(1),
        frame.aspect_ratio().denominator().max(1),
    );
    graph.add(&ffmpeg::filter::find("buffer").ok_or(ffmpeg::Error::Bug)?, "in", &args)?;
    graph.add(&ffmpeg::filter::find("buffersink").ok_or(ffmpeg::Error::Bug)?, "out", "")?;
    graph.output("in", 0)?.input("out", 0)?.parse(spec)?;
    graph.validate()?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_frame_duration_follows_ts_discont() {
        assert_eq!(max_frame_duration(true), 10.0);
        assert_eq!(max_frame_duration(false), 3600.0);
    }
}
