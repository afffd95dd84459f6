//! Monotonic serial allocation for outbound messages (§3.5, §5).

use std::sync::atomic::{AtomicU32, Ordering};

/// Issues serials for outbound messages.
///
/// Serial `0` is reserved by the protocol to mean "no reply expected" in
/// the `REPLY_SERIAL` header field, so the allocator skips it on wraparound.
#[derive(Debug, Default)]
pub struct SerialAllocator {
    next: AtomicU32,
}

impl SerialAllocator {
    /// Construct an allocator that will hand out `1` first.
    pub fn new() -> Self {
        Self { next: AtomicU32::new(1) }
    }

    /// Allocate the next serial, wrapping past zero.
    pub fn next(&self) -> u32 {
        loop {
            let current = self.next.fetch_add(1, Ordering::Relaxed);
            if current != 0 {
                return current;
            }
            // fetch_add wrapped to exactly 0; retry to get a nonzero value.
        }
    }
}
