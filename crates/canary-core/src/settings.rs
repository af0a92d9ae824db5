//! Current vs expected settings.
//!
//! Inbound handlers only ever write the *expected* fields. Once per cycle the
//! node compares them with the *current* fields and programs the sensor for
//! each one that differs.

use core::fmt::{self, Debug};

use log::{error, info};

use crate::fields;
use crate::retained::{RecordStore, RetainedMemory, StoreError};

/// A setting value to program into the CO2 sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setting {
    /// Ambient pressure in mbar.
    Pressure(u32),
    /// Temperature offset in C.
    TempOffset(f32),
    /// Forced recalibration reference in ppm; [`fields::FORCE_CAL_DISABLED`]
    /// performs no recalibration.
    CalibrationReference(i32),
}

impl Setting {
    pub fn name(&self) -> &'static str {
        match self {
            Setting::Pressure(_) => "pressure",
            Setting::TempOffset(_) => "temp offset",
            Setting::CalibrationReference(_) => "cal reference",
        }
    }
}

impl fmt::Display for Setting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Setting::Pressure(v) => write!(f, "pressure {} mbar", v),
            Setting::TempOffset(v) => write!(f, "temp offset {} C", v),
            Setting::CalibrationReference(v) => write!(f, "cal reference {} ppm", v),
        }
    }
}

/// Calibration interface of the CO2 sensor.
#[allow(async_fn_in_trait)]
pub trait Calibration {
    type Error: Debug;

    /// One-time setup after power-up or reboot: disable automatic
    /// self-calibration and program pressure and temperature offset.
    async fn initialize(&mut self, pressure: u32, temp_offset: f32) -> Result<(), Self::Error>;

    async fn apply(&mut self, setting: Setting) -> Result<(), Self::Error>;
}

/// Program the sensor from the current fields, as stored across the reboot.
pub async fn initialize_hardware<M, C>(store: &RecordStore<M>, hardware: &mut C) -> Result<(), StoreError>
where
    M: RetainedMemory,
    C: Calibration,
{
    let pressure: u32 = store.get_as(fields::PRESSURE_CURRENT)?;
    let temp_offset: f32 = store.get_as(fields::TEMP_OFFSET_CURRENT)?;

    info!("Initializing CO2 sensor: pressure {}, temp offset {}", pressure, temp_offset);
    if let Err(e) = hardware.initialize(pressure, temp_offset).await {
        error!("CO2 sensor initialization failed: {:?}", e);
    }
    Ok(())
}

/// Apply every setting whose expected value differs from the current one.
/// Returns how many were applied. A hardware failure leaves the current
/// value untouched so the next cycle retries.
pub async fn apply_pending<M, C>(store: &mut RecordStore<M>, hardware: &mut C) -> Result<usize, StoreError>
where
    M: RetainedMemory,
    C: Calibration,
{
    let mut applied = 0;

    let current: i32 = store.get_as(fields::FORCED_CAL_CURRENT)?;
    let expected: i32 = store.get_as(fields::FORCED_CAL)?;
    if current != expected
        && apply(hardware, Setting::CalibrationReference(expected), &current).await
    {
        store.set(fields::FORCED_CAL_CURRENT, expected)?;
        applied += 1;
    }

    let current: f32 = store.get_as(fields::TEMP_OFFSET_CURRENT)?;
    let expected: f32 = store.get_as(fields::TEMP_OFFSET)?;
    if current != expected && apply(hardware, Setting::TempOffset(expected), &current).await {
        store.set(fields::TEMP_OFFSET_CURRENT, expected)?;
        applied += 1;
    }

    let current: u32 = store.get_as(fields::PRESSURE_CURRENT)?;
    let expected: u32 = store.get_as(fields::PRESSURE)?;
    if current != expected && apply(hardware, Setting::Pressure(expected), &current).await {
        store.set(fields::PRESSURE_CURRENT, expected)?;
        applied += 1;
    }

    Ok(applied)
}

async fn apply<C: Calibration>(hardware: &mut C, setting: Setting, current: &dyn Debug) -> bool {
    info!("Updating {} from {:?} to {}", setting.name(), current, setting);
    match hardware.apply(setting).await {
        Ok(()) => true,
        Err(e) => {
            error!("Failed to apply {}: {:?}", setting, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::retained::Value;
    use crate::testing::FakeCalibration;
    use embassy_futures::block_on;

    fn cold_store() -> RecordStore<[u8; 256]> {
        let mut store = RecordStore::create([0u8; 256]);
        fields::initialize(&mut store, &NodeConfig::default()).unwrap();
        store
    }

    #[test]
    fn test_cold_boot_applies_nothing() {
        let mut store = cold_store();
        let mut hardware = FakeCalibration::default();

        assert_eq!(block_on(apply_pending(&mut store, &mut hardware)), Ok(0));
        assert!(hardware.applied.is_empty());
    }

    #[test]
    fn test_new_reference_applied_once_and_persisted() {
        let mut store = cold_store();
        let mut hardware = FakeCalibration::default();
        store.set(fields::FORCED_CAL, 450i32).unwrap();

        assert_eq!(block_on(apply_pending(&mut store, &mut hardware)), Ok(1));
        assert_eq!(hardware.applied, [Setting::CalibrationReference(450)]);
        assert_eq!(store.get(fields::FORCED_CAL_CURRENT), Ok(Value::I32(450)));

        assert_eq!(block_on(apply_pending(&mut store, &mut hardware)), Ok(0));
        assert_eq!(hardware.applied.len(), 1, "nothing left to apply");
    }

    #[test]
    fn test_every_changed_setting_applied() {
        let mut store = cold_store();
        let mut hardware = FakeCalibration::default();
        store.set(fields::PRESSURE, 1013u32).unwrap();
        store.set(fields::TEMP_OFFSET, 2.5f32).unwrap();

        assert_eq!(block_on(apply_pending(&mut store, &mut hardware)), Ok(2));
        assert_eq!(
            hardware.applied,
            [Setting::TempOffset(2.5), Setting::Pressure(1013)]
        );
        assert_eq!(store.get(fields::PRESSURE_CURRENT), Ok(Value::U32(1013)));
        assert_eq!(store.get(fields::TEMP_OFFSET_CURRENT), Ok(Value::F32(2.5)));
    }

    #[test]
    fn test_hardware_failure_retries_next_cycle() {
        let mut store = cold_store();
        let mut hardware = FakeCalibration::default();
        hardware.fail = true;
        store.set(fields::PRESSURE, 990u32).unwrap();

        assert_eq!(block_on(apply_pending(&mut store, &mut hardware)), Ok(0));
        assert_eq!(store.get(fields::PRESSURE_CURRENT), Ok(Value::U32(1000)));

        hardware.fail = false;
        assert_eq!(block_on(apply_pending(&mut store, &mut hardware)), Ok(1));
        assert_eq!(store.get(fields::PRESSURE_CURRENT), Ok(Value::U32(990)));
    }

    #[test]
    fn test_initialize_hardware_uses_current_fields() {
        let mut store = cold_store();
        let mut hardware = FakeCalibration::default();
        store.set(fields::PRESSURE_CURRENT, 1005u32).unwrap();

        block_on(initialize_hardware(&store, &mut hardware)).unwrap();
        assert_eq!(hardware.initialized, Some((1005, 1.0)));
    }
}
