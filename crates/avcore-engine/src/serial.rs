// crates/avcore-engine/src/serial.rs
//
// Serial-gated generations: a `PacketQueue` owns
// the only writer of its generation counter; everyone who needs to notice a
// flush (a `Clock`, a `FrameQueue`'s paired packet queue check) holds a
// cloned `SerialRef` — a cheap `Arc<AtomicI64>` handle, never a raw pointer.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

#[derive(Clone)]
pub struct SerialRef(Arc<AtomicI64>);

impl SerialRef {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(0)))
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Acquire)
    }

    /// Bump the generation (flush/start) and return the new value. Only
    /// `PacketQueue` calls this — it owns the counter.
    pub(crate) fn bump(&self) -> i64 {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for SerialRef {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_state() {
        let a = SerialRef::new();
        let b = a.clone();
        assert_eq!(a.get(), 0);
        a.bump();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 1, "clone must observe the bump through shared Arc");
    }
}
