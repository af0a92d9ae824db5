//! Boot classification.
//!
//! The platform reports why the processor started; this module maps that to
//! what the node must do with its retained state.

use log::{info, warn};

use crate::config::NodeConfig;
use crate::fields;
use crate::retained::{RecordStore, RetainedMemory, StoreError};

/// Hardware-reported reason for this start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCause {
    /// Power applied; retained memory is garbage.
    PowerOn,
    /// Woken by the sleep timer.
    SleepTimerWake,
    /// Restarted by the firmware itself.
    SoftwareRestart,
    Watchdog,
    /// Reset pin or brown-out.
    ExternalReset,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootKind {
    /// Retained state must be rebuilt from configuration.
    ColdBoot,
    /// Woke from a timed sleep with retained state intact.
    WarmResumeFromNap,
    /// Software or watchdog restart; retained state intact, peripherals reset.
    WarmResumeAfterReboot,
}

impl BootKind {
    pub fn classify(cause: StartCause) -> Self {
        match cause {
            StartCause::SleepTimerWake => BootKind::WarmResumeFromNap,
            StartCause::SoftwareRestart | StartCause::Watchdog => BootKind::WarmResumeAfterReboot,
            StartCause::PowerOn | StartCause::ExternalReset | StartCause::Unknown => {
                BootKind::ColdBoot
            }
        }
    }

    pub fn is_cold(self) -> bool {
        self == BootKind::ColdBoot
    }

    /// Sensor one-time setup is needed unless the chips kept their state
    /// through a timed sleep.
    pub fn needs_hardware_init(self) -> bool {
        self != BootKind::WarmResumeFromNap
    }
}

/// Open the retained store for this boot.
///
/// A cold boot wipes and repopulates the catalog. A warm boot keeps the
/// arena, but falls back to a cold boot when the arena fails validation or
/// is missing catalog fields. Returns the store with the effective boot kind.
pub fn open_store<M: RetainedMemory>(
    memory: M,
    cause: StartCause,
    config: &NodeConfig,
) -> Result<(RecordStore<M>, BootKind), StoreError> {
    let kind = BootKind::classify(cause);
    info!("Start cause {:?}, boot kind {:?}", cause, kind);

    let mut store = RecordStore::unloaded(memory);
    if !kind.is_cold() {
        match store.load() {
            Ok(()) if fields::is_complete(&store) => return Ok((store, kind)),
            Ok(()) => warn!("Retained store incomplete, starting cold"),
            Err(e) => warn!("Retained store invalid ({}), starting cold", e),
        }
    }

    fields::initialize(&mut store, config)?;
    store.log_contents();
    Ok((store, BootKind::ColdBoot))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retained::{ARENA_SIZE, Value};

    #[test]
    fn test_classification_table() {
        let table = [
            (StartCause::PowerOn, BootKind::ColdBoot),
            (StartCause::ExternalReset, BootKind::ColdBoot),
            (StartCause::Unknown, BootKind::ColdBoot),
            (StartCause::SleepTimerWake, BootKind::WarmResumeFromNap),
            (StartCause::SoftwareRestart, BootKind::WarmResumeAfterReboot),
            (StartCause::Watchdog, BootKind::WarmResumeAfterReboot),
        ];

        for (cause, kind) in table {
            assert_eq!(BootKind::classify(cause), kind, "cause {:?}", cause);
        }
        assert!(!BootKind::WarmResumeFromNap.needs_hardware_init());
        assert!(BootKind::WarmResumeAfterReboot.needs_hardware_init());
        assert!(BootKind::ColdBoot.needs_hardware_init());
    }

    #[test]
    fn test_warm_boot_keeps_values() {
        let config = NodeConfig::default();
        let (mut store, kind) = open_store([0u8; 256], StartCause::PowerOn, &config).unwrap();
        assert_eq!(kind, BootKind::ColdBoot);
        store.set(fields::FORCED_CAL, 450i32).unwrap();

        let (store, kind) =
            open_store(store.into_memory(), StartCause::SleepTimerWake, &config).unwrap();
        assert_eq!(kind, BootKind::WarmResumeFromNap);
        assert_eq!(store.get(fields::FORCED_CAL), Ok(Value::I32(450)));
    }

    #[test]
    fn test_cold_boot_discards_previous_values() {
        let config = NodeConfig::default();
        let (mut store, _) = open_store([0u8; 256], StartCause::PowerOn, &config).unwrap();
        store.set(fields::PRESSURE, 980u32).unwrap();

        let (store, kind) = open_store(store.into_memory(), StartCause::PowerOn, &config).unwrap();
        assert_eq!(kind, BootKind::ColdBoot);
        assert_eq!(store.get(fields::PRESSURE), Ok(Value::U32(1000)));
    }

    #[test]
    fn test_garbage_arena_downgrades_to_cold_boot() {
        let config = NodeConfig::default();

        let (store, kind) =
            open_store([0xFFu8; 256], StartCause::SoftwareRestart, &config).unwrap();
        assert_eq!(kind, BootKind::ColdBoot);
        assert!(fields::is_complete(&store));

        let (store, kind) = open_store([0u8; 256], StartCause::SleepTimerWake, &config).unwrap();
        assert_eq!(kind, BootKind::ColdBoot, "empty arena lacks the catalog");
        assert!(fields::is_complete(&store));
    }

    #[test]
    fn test_catalog_fits_retained_arena() {
        let config = NodeConfig::default();
        let (store, kind) = open_store([0u8; ARENA_SIZE], StartCause::PowerOn, &config).unwrap();
        assert_eq!(kind, BootKind::ColdBoot);
        assert!(fields::is_complete(&store));
        assert_eq!(store.capacity(), ARENA_SIZE);
        assert!(store.free_index() < ARENA_SIZE / 2, "catalog uses {} bytes", store.free_index());
    }
}
