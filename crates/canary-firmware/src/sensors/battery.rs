//! Battery voltage through a 1:2 divider on an ADC1 pin.

use canary_core::device::{Sensor, SensorError, SensorReadings};
use embassy_time::Timer;
use esp_hal::analog::adc::{Adc, AdcPin};
use esp_hal::peripherals::{ADC1, GPIO1};

pub type BatteryAdc = Adc<'static, ADC1<'static>, esp_hal::Blocking>;
pub type BatteryPin = AdcPin<GPIO1<'static>, ADC1<'static>>;

/// Input range at 11 dB attenuation.
const FULL_SCALE_MV: f32 = 3_100.0;
const MAX_RAW: f32 = 4_095.0;
const DIVIDER_RATIO: f32 = 2.0;
const CONVERSION_ATTEMPTS: u8 = 10;

pub struct BatteryReadings {
    pub volts: f32,
}

impl SensorReadings<1> for BatteryReadings {
    fn into_values(self) -> [f32; 1] {
        [self.volts]
    }
}

pub struct Battery {
    adc: BatteryAdc,
    pin: BatteryPin,
}

impl Battery {
    pub fn new(adc: BatteryAdc, pin: BatteryPin) -> Self {
        Self { adc, pin }
    }
}

impl Sensor<1> for Battery {
    type Readings = BatteryReadings;

    async fn measure(&mut self) -> Result<BatteryReadings, SensorError> {
        for _ in 0..CONVERSION_ATTEMPTS {
            if let Ok(raw) = self.adc.read_oneshot(&mut self.pin) {
                let volts = raw as f32 / MAX_RAW * FULL_SCALE_MV * DIVIDER_RATIO / 1000.0;
                return Ok(BatteryReadings { volts });
            }
            Timer::after_millis(1).await;
        }

        Err(SensorError::Timeout {
            sensor: "battery",
            operation: "convert ADC sample",
        })
    }
}
