//! The fixed catalog of persistent fields.
//!
//! Each remotely adjustable setting is kept twice: the *expected* value
//! (whatever the hub last asked for) and the *current* value (what was last
//! programmed into the sensor). Timers hold the epoch second an action last
//! ran.

use crate::config::NodeConfig;
use crate::retained::{RecordStore, RetainedMemory, StoreError, TypeTag};

/// Disables forced recalibration.
pub const FORCE_CAL_DISABLED: i32 = -1;

pub const PRESSURE: &str = "pressure";
pub const FORCED_CAL: &str = "forced cal";
pub const TEMP_OFFSET: &str = "temp offset";

pub const PRESSURE_CURRENT: &str = "pressure hw";
pub const FORCED_CAL_CURRENT: &str = "forced cal hw";
pub const TEMP_OFFSET_CURRENT: &str = "temp offset hw";

pub const DISPLAY_TIME: &str = "display";
pub const TIME_SYNC_TIME: &str = "time sync";
pub const UPLOAD_TIME: &str = "upload";

/// Every field with its stored type, in the order they are added.
pub const CATALOG: [(&str, TypeTag); 9] = [
    (PRESSURE, TypeTag::U32),
    (FORCED_CAL, TypeTag::I32),
    (TEMP_OFFSET, TypeTag::F32),
    (PRESSURE_CURRENT, TypeTag::U32),
    (FORCED_CAL_CURRENT, TypeTag::I32),
    (TEMP_OFFSET_CURRENT, TypeTag::F32),
    (DISPLAY_TIME, TypeTag::U32),
    (TIME_SYNC_TIME, TypeTag::U32),
    (UPLOAD_TIME, TypeTag::U32),
];

/// Wipe the store and add every field with its cold-boot value.
pub fn initialize<M: RetainedMemory>(
    store: &mut RecordStore<M>,
    config: &NodeConfig,
) -> Result<(), StoreError> {
    store.reset();

    store.add(PRESSURE, TypeTag::U32, config.ambient_pressure)?;
    store.add(FORCED_CAL, TypeTag::I32, FORCE_CAL_DISABLED)?;
    store.add(TEMP_OFFSET, TypeTag::F32, config.temp_offset_c)?;

    store.add(PRESSURE_CURRENT, TypeTag::U32, config.ambient_pressure)?;
    store.add(FORCED_CAL_CURRENT, TypeTag::I32, FORCE_CAL_DISABLED)?;
    store.add(TEMP_OFFSET_CURRENT, TypeTag::F32, config.temp_offset_c)?;

    store.add(DISPLAY_TIME, TypeTag::U32, 0u32)?;
    store.add(TIME_SYNC_TIME, TypeTag::U32, 0u32)?;
    store.add(UPLOAD_TIME, TypeTag::U32, 0u32)?;

    Ok(())
}

/// Whether every catalog field exists with the expected type.
pub fn is_complete<M: RetainedMemory>(store: &RecordStore<M>) -> bool {
    CATALOG.iter().all(|&(name, tag)| {
        store
            .get(name)
            .map(|value| value.tag() == tag)
            .unwrap_or(false)
    })
}

/// Last-run times of the periodic actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timers {
    pub display: u32,
    pub time_sync: u32,
    pub upload: u32,
}

impl Timers {
    pub fn load<M: RetainedMemory>(store: &RecordStore<M>) -> Result<Self, StoreError> {
        Ok(Self {
            display: store.get_as(DISPLAY_TIME)?,
            time_sync: store.get_as(TIME_SYNC_TIME)?,
            upload: store.get_as(UPLOAD_TIME)?,
        })
    }
}

/// An action last run at `last` is due once `interval` seconds have passed.
pub fn is_due(now: u32, last: u32, interval: u32) -> bool {
    now.saturating_sub(last) >= interval
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retained::Value;

    #[test]
    fn test_initialize_uses_config_values() {
        let mut store = RecordStore::create([0u8; 256]);
        let config = NodeConfig::default();

        initialize(&mut store, &config).unwrap();

        assert!(is_complete(&store));
        assert_eq!(store.element_count() as usize, CATALOG.len());
        assert_eq!(store.get(PRESSURE), Ok(Value::U32(1000)));
        assert_eq!(store.get(TEMP_OFFSET), Ok(Value::F32(1.0)));
        assert_eq!(store.get(FORCED_CAL), Ok(Value::I32(FORCE_CAL_DISABLED)));
        assert_eq!(store.get(PRESSURE_CURRENT), store.get(PRESSURE));
        assert_eq!(Timers::load(&store), Ok(Timers::default()));
    }

    #[test]
    fn test_initialize_twice_starts_over() {
        let mut store = RecordStore::create([0u8; 256]);
        let config = NodeConfig::default();

        initialize(&mut store, &config).unwrap();
        store.set(PRESSURE, 990u32).unwrap();
        initialize(&mut store, &config).unwrap();

        assert_eq!(store.get(PRESSURE), Ok(Value::U32(1000)));
        assert_eq!(store.element_count() as usize, CATALOG.len());
    }

    #[test]
    fn test_incomplete_store_is_detected() {
        let mut store = RecordStore::create([0u8; 256]);
        store.add(PRESSURE, TypeTag::U32, 1000u32).unwrap();
        assert!(!is_complete(&store));

        let mut wrong_type = RecordStore::create([0u8; 256]);
        initialize(&mut wrong_type, &NodeConfig::default()).unwrap();
        let mut bytes = wrong_type.into_memory();
        let offset = 8 + 2;
        bytes[offset] = b'i';
        let reopened = RecordStore::open(bytes).unwrap();
        assert!(!is_complete(&reopened), "pressure stored as i32 must be rejected");
    }

    #[test]
    fn test_is_due() {
        assert!(is_due(1_000, 0, 600));
        assert!(is_due(1_600, 1_000, 600));
        assert!(!is_due(1_599, 1_000, 600));
        assert!(!is_due(500, 1_000, 600), "clock going backwards is not due");
    }
}
