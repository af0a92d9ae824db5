//! The board's sensors behind one [`SensorBank`].

pub mod battery;
pub mod scd41;
pub mod sht40;

use canary_core::device::sensor::battery_report;
use canary_core::device::{SensorBank, SensorKind, SensorValues};
use canary_core::settings::{Calibration, Setting};
use embedded_hal_async::i2c::I2c;

pub use battery::Battery;
pub use scd41::Scd41;
pub use sht40::Sht40;

pub struct Sensors<I> {
    co2: Scd41<I>,
    climate: Sht40<I>,
    battery: Battery,
}

impl<I: I2c> Sensors<I> {
    pub fn new(co2: Scd41<I>, climate: Sht40<I>, battery: Battery) -> Self {
        Self {
            co2,
            climate,
            battery,
        }
    }
}

impl<I: I2c> SensorBank for Sensors<I> {
    async fn read(&mut self) -> SensorValues {
        let mut values = SensorValues::default();
        values.fill_from(&mut self.co2, [SensorKind::Co2]).await;
        values
            .fill_from(&mut self.climate, [SensorKind::Temperature, SensorKind::Humidity])
            .await;
        values.fill_from(&mut self.battery, [SensorKind::Battery]).await;

        if let Some(volts) = values.get(SensorKind::Battery) {
            values.set(SensorKind::Battery, Some(battery_report(volts)));
        }
        values
    }
}

/// Calibration goes straight to the SCD41.
impl<I: I2c> Calibration for Sensors<I> {
    type Error = <Scd41<I> as Calibration>::Error;

    async fn initialize(&mut self, pressure: u32, temp_offset: f32) -> Result<(), Self::Error> {
        self.co2.initialize(pressure, temp_offset).await
    }

    async fn apply(&mut self, setting: Setting) -> Result<(), Self::Error> {
        self.co2.apply(setting).await
    }
}
