// crates/avcore-engine/src/lib.rs

pub mod clock;
pub mod decoder;
pub mod frame_queue;
pub mod packet_queue;
pub mod pipeline;
pub mod player;
mod serial; // internal generation bookkeeping — not a public concern
mod time;   // internal monotonic clock source

pub use clock::Clock;
pub use decoder::{Codec, DecodeStep, Decoder};
pub use frame_queue::{Frame, FrameQueue};
pub use packet_queue::{Packet, PacketGet, PacketQueue};
pub use player::{Player, StreamMeta};

/// Initializes the underlying ffmpeg library. Must be called once before
/// any `Player::open`; cheap to call more than once.
pub fn init() -> anyhow::Result<()> {
    ffmpeg_the_third::init()?;
    Ok(())
}
