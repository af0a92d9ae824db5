//! Persistent state kept in memory that survives reset but not power loss.

pub mod arena;
pub mod codec;
pub mod store;

pub use arena::RetainedMemory;
pub use codec::{CodecError, RecordHeader, Storable, TypeTag, Value};
pub use store::{ELEMENTS_OFFSET, RecordStore, StoreError};

/// Arena size of the RTC fast RAM build. The simulator uses the same size.
pub const ARENA_SIZE: usize = 4096;
