//! Append-only record store over a retained memory arena.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! 0..4   free_index     next free byte offset
//! 4..8   element_count  number of records
//! 8..    records        {name_len u8, data_len u8, tag u8, name, payload}
//! ```
//!
//! Records are never removed or resized. `set` overwrites the payload bytes
//! of an existing record in place; `add` appends. The `name -> offset` index
//! lives in ordinary RAM and is rebuilt by [`RecordStore::open`] on every
//! start.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use super::arena::RetainedMemory;
use super::codec::{CodecError, RECORD_HEADER_SIZE, RecordHeader, Storable, TypeTag, Value};

const FREE_INDEX_OFFSET: usize = 0;
const ELEMENT_COUNT_OFFSET: usize = 4;

/// Offset of the first record.
pub const ELEMENTS_OFFSET: usize = 8;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Invalid record at offset {offset}: {reason}")]
    InvalidRecord { offset: usize, reason: &'static str },
    #[error("Arena exhausted: record needs {needed} bytes, {available} available")]
    ArenaExhausted { needed: usize, available: usize },
    #[error("Unknown field: {0}")]
    UnknownField(String),
    #[error("Field already exists: {0}")]
    DuplicateField(String),
    #[error("Field name must be 1-255 bytes")]
    InvalidName,
    #[error("Type mismatch: field holds {expected}, value is {found}")]
    TypeMismatch { expected: TypeTag, found: TypeTag },
    #[error("Record store used before load or reset")]
    NotLoaded,
    #[error("Payload encoding failed: {0}")]
    Codec(CodecError),
}

impl From<CodecError> for StoreError {
    fn from(e: CodecError) -> Self {
        StoreError::Codec(e)
    }
}

/// Location of one record, cached in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: usize,
    payload: usize,
    tag: TypeTag,
}

pub struct RecordStore<M: RetainedMemory> {
    memory: M,
    index: BTreeMap<String, Slot>,
    /// Set once the header is known to be valid.
    loaded: bool,
}

impl<M: RetainedMemory> RecordStore<M> {
    /// Load an existing arena, rebuilding the index by scanning every record.
    ///
    /// A fully zeroed arena is treated as empty. Any inconsistency (unknown
    /// tag, wrong payload width, record crossing `free_index`, duplicate
    /// names) fails with [`StoreError::InvalidRecord`].
    pub fn open(memory: M) -> Result<Self, StoreError> {
        let mut store = Self::unloaded(memory);
        store.load()?;
        Ok(store)
    }

    /// Wrap `memory` without reading it. Field access fails with
    /// [`StoreError::NotLoaded`] until [`load`](Self::load) or
    /// [`reset`](Self::reset) succeeds.
    pub fn unloaded(memory: M) -> Self {
        Self {
            memory,
            index: BTreeMap::new(),
            loaded: false,
        }
    }

    /// Rebuild the index from the arena. On failure the index is left empty
    /// and the arena untouched, apart from normalizing a zeroed header.
    pub fn load(&mut self) -> Result<(), StoreError> {
        self.index.clear();
        self.loaded = false;

        if self.memory.capacity() < ELEMENTS_OFFSET {
            return Err(StoreError::InvalidRecord {
                offset: 0,
                reason: "arena smaller than header",
            });
        }

        let mut free_index = self.read_u32(FREE_INDEX_OFFSET) as usize;
        let element_count = self.read_u32(ELEMENT_COUNT_OFFSET) as usize;

        if free_index == 0 && element_count == 0 {
            free_index = ELEMENTS_OFFSET;
            self.write_u32(FREE_INDEX_OFFSET, ELEMENTS_OFFSET as u32);
        }

        if free_index < ELEMENTS_OFFSET || free_index > self.memory.capacity() {
            return Err(StoreError::InvalidRecord {
                offset: FREE_INDEX_OFFSET,
                reason: "free index outside arena",
            });
        }

        let mut index = BTreeMap::new();
        let mut offset = ELEMENTS_OFFSET;
        for _ in 0..element_count {
            let (name, slot, len) = self.scan_record(offset, free_index)?;
            if index.insert(name, slot).is_some() {
                return Err(StoreError::InvalidRecord {
                    offset,
                    reason: "duplicate field name",
                });
            }
            offset += len;
        }

        if offset != free_index {
            return Err(StoreError::InvalidRecord {
                offset,
                reason: "records do not end at free index",
            });
        }

        self.index = index;
        self.loaded = true;
        debug!(
            "Record store loaded: {} fields, {} of {} bytes used",
            element_count,
            free_index,
            self.memory.capacity()
        );

        Ok(())
    }

    /// Zero the arena and start over with an empty header. Idempotent.
    pub fn reset(&mut self) {
        self.memory.as_bytes_mut().fill(0);
        self.index.clear();

        if self.memory.capacity() < ELEMENTS_OFFSET {
            error!("Arena of {} bytes cannot hold the header", self.memory.capacity());
            self.loaded = false;
            return;
        }

        self.write_u32(FREE_INDEX_OFFSET, ELEMENTS_OFFSET as u32);
        self.write_u32(ELEMENT_COUNT_OFFSET, 0);
        self.loaded = true;
        info!("Record store reset");
    }

    /// Wipe `memory` and return an empty store over it.
    pub fn create(memory: M) -> Self {
        let mut store = Self::unloaded(memory);
        store.reset();
        store
    }

    /// Append a new field. Nothing is written if any check fails.
    pub fn add(&mut self, name: &str, tag: TypeTag, value: impl Into<Value>) -> Result<(), StoreError> {
        let value = value.into();

        if !self.loaded {
            return Err(StoreError::NotLoaded);
        }
        if name.is_empty() || name.len() > u8::MAX as usize {
            return Err(StoreError::InvalidName);
        }
        if self.index.contains_key(name) {
            return Err(StoreError::DuplicateField(name.to_string()));
        }

        let value = value.coerce(tag).ok_or(StoreError::TypeMismatch {
            expected: tag,
            found: value.tag(),
        })?;

        let header = RecordHeader::new(name.len() as u8, tag);
        let needed = header.record_len();
        let offset = self.free_index();
        let available = self.remaining();
        if needed > available {
            error!(
                "Record store full: '{}' needs {} bytes, {} available",
                name, needed, available
            );
            return Err(StoreError::ArenaExhausted { needed, available });
        }

        let payload = offset + RECORD_HEADER_SIZE + name.len();
        let bytes = self.memory.as_bytes_mut();
        value.encode(&mut bytes[payload..payload + tag.width()])?;
        bytes[offset..offset + RECORD_HEADER_SIZE].copy_from_slice(&header.to_bytes());
        bytes[offset + RECORD_HEADER_SIZE..payload].copy_from_slice(name.as_bytes());

        self.write_u32(FREE_INDEX_OFFSET, (offset + needed) as u32);
        self.write_u32(ELEMENT_COUNT_OFFSET, self.element_count() + 1);
        self.index.insert(
            name.to_string(),
            Slot {
                offset,
                payload,
                tag,
            },
        );

        Ok(())
    }

    /// Overwrite the payload of an existing field, converting `value` to the
    /// field's stored type.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), StoreError> {
        let slot = self.slot(name)?;
        let value = self.prepare(name, value)?;

        let bytes = self.memory.as_bytes_mut();
        value.encode(&mut bytes[slot.payload..slot.payload + slot.tag.width()])?;

        Ok(())
    }

    /// Convert `value` to the stored type of `name` without writing it.
    /// Lets a caller check a batch of updates before applying any of them.
    pub fn prepare(&self, name: &str, value: impl Into<Value>) -> Result<Value, StoreError> {
        let value = value.into();
        let slot = self.slot(name)?;

        value.coerce(slot.tag).ok_or(StoreError::TypeMismatch {
            expected: slot.tag,
            found: value.tag(),
        })
    }

    pub fn get(&self, name: &str) -> Result<Value, StoreError> {
        let slot = self.slot(name)?;
        let bytes = self.memory.as_bytes();
        Value::decode(slot.tag, &bytes[slot.payload..]).map_err(|_| StoreError::InvalidRecord {
            offset: slot.offset,
            reason: "payload truncated",
        })
    }

    /// Read a field as a specific Rust type, converting from the stored type
    /// when the value fits.
    pub fn get_as<T: Storable>(&self, name: &str) -> Result<T, StoreError> {
        let value = self.get(name)?;
        let wanted = T::TAG;
        value
            .coerce(wanted)
            .and_then(|converted| T::try_from(converted).ok())
            .ok_or(StoreError::TypeMismatch {
                expected: wanted,
                found: value.tag(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn free_index(&self) -> usize {
        self.read_u32(FREE_INDEX_OFFSET) as usize
    }

    pub fn element_count(&self) -> u32 {
        self.read_u32(ELEMENT_COUNT_OFFSET)
    }

    pub fn capacity(&self) -> usize {
        self.memory.capacity()
    }

    pub fn remaining(&self) -> usize {
        self.capacity().saturating_sub(self.free_index())
    }

    /// Arena offset of the record named `name`.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).map(|slot| slot.offset)
    }

    /// Field names with their arena offsets, in arena order.
    pub fn fields(&self) -> Vec<(&str, usize)> {
        let mut fields: Vec<(&str, usize)> = self
            .index
            .iter()
            .map(|(name, slot)| (name.as_str(), slot.offset))
            .collect();
        fields.sort_by_key(|&(_, offset)| offset);
        fields
    }

    /// Dump every field to the log.
    pub fn log_contents(&self) {
        info!(
            "Record store: free index {}, {} elements",
            self.free_index(),
            self.element_count()
        );
        for (name, offset) in self.fields() {
            match self.get(name) {
                Ok(value) => info!("  @{:4} {:<16} {} = {}", offset, name, value.tag(), value),
                Err(e) => warn!("  @{:4} {:<16} unreadable: {}", offset, name, e),
            }
        }
    }

    /// Give the arena back, e.g. to simulate a reset.
    pub fn into_memory(self) -> M {
        self.memory
    }

    fn slot(&self, name: &str) -> Result<Slot, StoreError> {
        if !self.loaded {
            return Err(StoreError::NotLoaded);
        }
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StoreError::UnknownField(name.to_string()))
    }

    fn scan_record(&self, offset: usize, end: usize) -> Result<(String, Slot, usize), StoreError> {
        let bytes = &self.memory.as_bytes()[..end];
        let invalid = |reason| StoreError::InvalidRecord { offset, reason };

        let header = RecordHeader::from_bytes(bytes.get(offset..).unwrap_or_default())
            .map_err(|_| invalid("header crosses free index"))?;
        let tag = header.tag().map_err(|_| invalid("unknown type tag"))?;
        if header.name_len == 0 {
            return Err(invalid("empty name"));
        }
        if header.data_len as usize != tag.width() {
            return Err(invalid("payload width does not match type tag"));
        }

        let len = header.record_len();
        let name_start = offset + RECORD_HEADER_SIZE;
        let payload = name_start + header.name_len as usize;
        if offset + len > end {
            return Err(invalid("record crosses free index"));
        }

        let name = core::str::from_utf8(&bytes[name_start..payload])
            .map_err(|_| invalid("name is not UTF-8"))?;

        Ok((
            name.to_string(),
            Slot {
                offset,
                payload,
                tag,
            },
            len,
        ))
    }

    /// Header word at `offset`; zero when the arena is too small to hold it.
    fn read_u32(&self, offset: usize) -> u32 {
        self.memory
            .as_bytes()
            .get(offset..offset + 4)
            .and_then(|word| <[u8; 4]>::try_from(word).ok())
            .map_or(0, u32::from_be_bytes)
    }

    fn write_u32(&mut self, offset: usize, value: u32) {
        if let Some(word) = self.memory.as_bytes_mut().get_mut(offset..offset + 4) {
            word.copy_from_slice(&value.to_be_bytes());
        }
    }
}
