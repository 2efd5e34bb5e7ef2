// crates/avcore-cli/src/main.rs
//
// Thin demonstration binary: opens a URL, lets the engine's demux and
// decode threads run, and drives the scheduler entry points a real
// presenter would — printing what it would have done instead of actually
// drawing anything. Exists to exercise Player end-to-end, not to be a
// media player frontend.

use std::time::Duration;

use avcore_engine::Player;
use avcore_types::PlayerOptions;

fn main() {
    avcore_engine::init().expect("ffmpeg init failed");

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: avcore <url> [--loop] [--no-autorotate] [--volume N]");
        std::process::exit(2);
    };

    let mut options = PlayerOptions::default();
    while let Some(flag) = args.next() {
        match flag.as_str() {
            "--loop" => options.loop_playback = true,
            "--no-autorotate" => options.autorotate = false,
            "--volume" => {
                let v = args.next().and_then(|s| s.parse().ok()).unwrap_or(100);
                options.audio_volume = v;
            }
            other => {
                eprintln!("unrecognized flag {other}");
                std::process::exit(2);
            }
        }
    }

    let mut player = Player::new();
    if let Err(e) = player.open(&url, options) {
        eprintln!("open failed: {e}");
        std::process::exit(1);
    }

    let meta = player.format_context();
    println!(
        "opened {url}: {}x{} sar={} duration={}",
        meta.width,
        meta.height,
        meta.sample_aspect_ratio,
        meta.duration_secs.map(|d| format!("{d:.2}s")).unwrap_or_else(|| "unknown".to_string())
    );

    let mut remaining_time = 0.0_f64;
    loop {
        if let Ok(err) = player.errors().try_recv() {
            eprintln!("worker error: {err}");
            if err.kind.is_fatal() {
                break;
            }
        }

        remaining_time = 0.1;
        if let Some(frame) = player.acquire_video_frame(&mut remaining_time) {
            println!("present video frame {}x{} pts={:.3} (volume={})", frame.width, frame.height, frame.pts, player.volume());
        }
        if let Some(buf) = player.acquire_audio_buf() {
            println!("present audio buffer ({} bytes)", buf.len());
        }

        if player.eof() && player.frames_pending() == 0 {
            println!("playback finished");
            break;
        }

        if remaining_time > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(remaining_time));
        }
    }

    player.close();
}
