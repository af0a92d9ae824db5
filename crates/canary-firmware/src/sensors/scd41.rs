use core::fmt::Debug;

use canary_core::device::{Sensor, SensorError, SensorReadings};
use canary_core::fields::FORCE_CAL_DISABLED;
use canary_core::settings::{Calibration, Setting};
use embassy_time::{Duration, Instant, Timer};
use embedded_hal_async::i2c::I2c;
use log::{error, info};
use scd41_embedded::r#async::Scd41Async;

const NAME: &str = "SCD41";

/// A periodic measurement lands every 5 s; allow one missed interval.
const MEASUREMENT_TIMEOUT: Duration = Duration::from_millis(6_000);
const POLL_INTERVAL_MS: u64 = 250;

pub struct Scd41Readings {
    pub co2_ppm: f32,
}

impl SensorReadings<1> for Scd41Readings {
    fn into_values(self) -> [f32; 1] {
        [self.co2_ppm]
    }
}

pub struct Scd41<I> {
    sensor: Scd41Async<I, embassy_time::Delay>,
}

impl<I: I2c> Scd41<I> {
    pub fn new(i2c: I) -> Self {
        Self {
            sensor: Scd41Async::<I, embassy_time::Delay>::new(i2c, embassy_time::Delay),
        }
    }

    async fn stop(&mut self) {
        // Fails harmlessly when no measurement is running.
        let _ = self.sensor.stop_periodic_measurement().await;
    }

    async fn start(&mut self) -> Result<(), SensorError> {
        self.sensor
            .start_periodic_measurement()
            .await
            .map_err(failed("start periodic measurement"))
    }

    async fn program(&mut self, setting: Setting) -> Result<(), SensorError> {
        match setting {
            Setting::Pressure(mbar) => {
                let mbar = u16::try_from(mbar).map_err(|_| SensorError::ReadFailed {
                    sensor: NAME,
                    operation: "set ambient pressure",
                    details: "pressure out of range",
                })?;
                self.sensor
                    .set_ambient_pressure(mbar)
                    .await
                    .map_err(failed("set ambient pressure"))
            }
            Setting::TempOffset(celsius) => self
                .sensor
                .set_temperature_offset(celsius)
                .await
                .map_err(failed("set temperature offset")),
            Setting::CalibrationReference(FORCE_CAL_DISABLED) => Ok(()),
            Setting::CalibrationReference(ppm) => {
                let ppm = u16::try_from(ppm).map_err(|_| SensorError::ReadFailed {
                    sensor: NAME,
                    operation: "forced recalibration",
                    details: "reference out of range",
                })?;
                self.sensor
                    .perform_forced_recalibration(ppm)
                    .await
                    .map(|_| ())
                    .map_err(failed("forced recalibration"))
            }
        }
    }
}

impl<I: I2c> Sensor<1> for Scd41<I> {
    type Readings = Scd41Readings;

    async fn measure(&mut self) -> Result<Scd41Readings, SensorError> {
        let deadline = Instant::now() + MEASUREMENT_TIMEOUT;
        loop {
            if self.sensor.data_ready().await.map_err(failed("poll data ready"))? {
                break;
            }
            if Instant::now() >= deadline {
                return Err(SensorError::Timeout {
                    sensor: NAME,
                    operation: "read CO2",
                });
            }
            Timer::after_millis(POLL_INTERVAL_MS).await;
        }

        let measurement = self
            .sensor
            .measurement()
            .await
            .map_err(failed("read measurement"))?;

        Ok(Scd41Readings {
            co2_ppm: measurement.co2_ppm as f32,
        })
    }
}

/// Settings are written with periodic measurement stopped; the sensor
/// refuses most configuration commands while measuring.
impl<I: I2c> Calibration for Scd41<I> {
    type Error = SensorError;

    async fn initialize(&mut self, pressure: u32, temp_offset: f32) -> Result<(), SensorError> {
        self.stop().await;

        self.sensor
            .set_automatic_self_calibration(false)
            .await
            .map_err(failed("disable self-calibration"))?;
        self.program(Setting::TempOffset(temp_offset)).await?;
        self.program(Setting::Pressure(pressure)).await?;

        self.start().await?;
        info!("SCD41: periodic measurement started");
        Ok(())
    }

    async fn apply(&mut self, setting: Setting) -> Result<(), SensorError> {
        self.stop().await;
        let programmed = self.program(setting).await;
        let restarted = self.start().await;
        programmed.and(restarted)
    }
}

fn failed<E: Debug>(operation: &'static str) -> impl FnOnce(E) -> SensorError {
    move |e| {
        error!("SCD41 {} failed: {:?}", operation, e);
        SensorError::ReadFailed {
            sensor: NAME,
            operation,
            details: "I2C communication error or sensor not responding",
        }
    }
}
