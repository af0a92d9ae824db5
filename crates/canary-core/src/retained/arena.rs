//! Byte storage that survives a processor reset.
//!
//! On hardware this is a static placed in RTC fast RAM; on the host it is a
//! plain array. The record store only ever talks to this trait.

/// A fixed-length byte region preserved across resets (but not power loss).
pub trait RetainedMemory {
    fn as_bytes(&self) -> &[u8];

    fn as_bytes_mut(&mut self) -> &mut [u8];

    /// Arena capacity in bytes.
    fn capacity(&self) -> usize {
        self.as_bytes().len()
    }

    /// Byte at `offset`, or `None` past the end of the arena.
    fn byte(&self, offset: usize) -> Option<u8> {
        self.as_bytes().get(offset).copied()
    }

    /// Overwrite the byte at `offset`. Returns `false` past the end of the arena.
    fn set_byte(&mut self, offset: usize, value: u8) -> bool {
        match self.as_bytes_mut().get_mut(offset) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

impl<const N: usize> RetainedMemory for [u8; N] {
    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }
}

impl<M: RetainedMemory + ?Sized> RetainedMemory for &mut M {
    fn as_bytes(&self) -> &[u8] {
        (**self).as_bytes()
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        (**self).as_bytes_mut()
    }
}
