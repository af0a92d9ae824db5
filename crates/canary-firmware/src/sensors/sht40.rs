//! SHT40 climate sensor: temperature (C) and relative humidity (%).

use canary_core::device::{Sensor, SensorError, SensorReadings};
use embedded_hal_async::i2c::I2c;
use sht4x::Sht4xAsync;

pub struct Sht40Readings {
    pub temperature_celsius: f32,
    pub humidity_percent: f32,
}

impl SensorReadings<2> for Sht40Readings {
    fn into_values(self) -> [f32; 2] {
        [self.temperature_celsius, self.humidity_percent]
    }
}

pub struct Sht40<I> {
    sensor: Sht4xAsync<I, embassy_time::Delay>,
}

impl<I: I2c> Sht40<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            sensor: Sht4xAsync::<I, embassy_time::Delay>::new(i2c),
        }
    }
}

impl<I: I2c> Sensor<2> for Sht40<I> {
    type Readings = Sht40Readings;

    async fn measure(&mut self) -> Result<Sht40Readings, SensorError> {
        let measurement = self
            .sensor
            .measure(sht4x::Precision::High, &mut embassy_time::Delay)
            .await
            .map_err(|e| {
                log::warn!("SHT40 read error: {:?}", e);
                SensorError::ReadFailed {
                    sensor: "SHT40",
                    operation: "high precision measurement",
                    details: "no valid frame from the sensor",
                }
            })?;

        Ok(Sht40Readings {
            temperature_celsius: measurement.temperature_celsius().to_num::<f32>(),
            humidity_percent: measurement.humidity_percent().to_num::<f32>(),
        })
    }
}
