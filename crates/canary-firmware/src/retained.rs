//! Record-store arena in RTC fast RAM.
//!
//! RTC fast memory stays powered through deep sleep and survives software
//! and watchdog resets. It holds garbage after power-on, which the record
//! store detects and rebuilds on its own.

use core::sync::atomic::{AtomicBool, Ordering};

use canary_core::retained::{ARENA_SIZE, RetainedMemory};

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut ARENA: [u8; ARENA_SIZE] = [0; ARENA_SIZE];

static TAKEN: AtomicBool = AtomicBool::new(false);

/// Exclusive handle to the arena.
pub struct RtcArena {
    bytes: &'static mut [u8; ARENA_SIZE],
}

impl RtcArena {
    /// Returns the handle on the first call of this boot and `None` after.
    pub fn take() -> Option<Self> {
        if TAKEN.swap(true, Ordering::AcqRel) {
            return None;
        }

        // SAFETY: the flag above hands out at most one reference per boot.
        let bytes = unsafe { &mut *(&raw mut ARENA) };
        Some(Self { bytes })
    }
}

impl RetainedMemory for RtcArena {
    fn as_bytes(&self) -> &[u8] {
        self.bytes.as_slice()
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self.bytes.as_mut_slice()
    }
}
