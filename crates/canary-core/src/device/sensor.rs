use log::warn;
use thiserror_no_std::Error;

/// Battery voltage at or above which the board is running from USB and the
/// reading says nothing about the cell.
pub const USB_POWERED_VOLTAGE: f32 = 4.20;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: {operation} failed ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: timed out waiting to {operation}")]
    Timeout {
        sensor: &'static str,
        operation: &'static str,
    },
    #[error("{sensor}: initialization failed ({details})")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: {operation} not supported")]
    NotSupported {
        sensor: &'static str,
        operation: &'static str,
    },
}

/// The node's fixed set of measurements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SensorKind {
    Co2,
    Temperature,
    Humidity,
    Battery,
}

impl SensorKind {
    pub const ALL: [SensorKind; 4] = [
        SensorKind::Co2,
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::Battery,
    ];

    /// Display name, also the entity name in discovery.
    pub const fn name(self) -> &'static str {
        match self {
            SensorKind::Co2 => "CO2",
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Battery => "Batt Voltage",
        }
    }

    /// Key in the state JSON object.
    pub const fn key(self) -> &'static str {
        match self {
            SensorKind::Co2 => "CO2",
            SensorKind::Temperature => "Temperature",
            SensorKind::Humidity => "Humidity",
            SensorKind::Battery => "Batt_Voltage",
        }
    }

    /// Decimal places reported to the hub.
    pub const fn precision(self) -> u8 {
        match self {
            SensorKind::Co2 | SensorKind::Humidity => 0,
            SensorKind::Temperature => 1,
            SensorKind::Battery => 2,
        }
    }

    pub const fn unit(self) -> &'static str {
        match self {
            SensorKind::Co2 => "ppm",
            SensorKind::Temperature => "°C",
            SensorKind::Humidity => "%",
            SensorKind::Battery => "V",
        }
    }

    pub const fn device_class(self) -> &'static str {
        match self {
            SensorKind::Co2 => "carbon_dioxide",
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::Battery => "voltage",
        }
    }

    const fn index(self) -> usize {
        self as usize
    }
}

/// One reading per sensor; `None` where the sensor produced nothing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorValues([Option<f32>; 4]);

impl SensorValues {
    pub fn get(&self, kind: SensorKind) -> Option<f32> {
        self.0[kind.index()]
    }

    pub fn set(&mut self, kind: SensorKind, value: Option<f32>) {
        self.0[kind.index()] = value;
    }

    pub fn with(mut self, kind: SensorKind, value: f32) -> Self {
        self.set(kind, Some(value));
        self
    }

    /// Present readings in [`SensorKind::ALL`] order.
    pub fn iter(&self) -> impl Iterator<Item = (SensorKind, f32)> + '_ {
        SensorKind::ALL
            .into_iter()
            .filter_map(|kind| self.get(kind).map(|value| (kind, value)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }

    /// Read `sensor` and store its values under `kinds`, in order. On failure
    /// the error is logged and the slots stay empty.
    pub async fn fill_from<S, const COUNT: usize>(&mut self, sensor: &mut S, kinds: [SensorKind; COUNT])
    where
        S: Sensor<COUNT>,
    {
        match sensor.measure().await {
            Ok(readings) => {
                for (kind, value) in kinds.into_iter().zip(readings.into_values()) {
                    self.set(kind, Some(value));
                }
            }
            Err(e) => warn!("Sensor read failed: {}", e),
        }
    }
}

/// Values one chip delivers per measurement, in the order its slots are
/// given to [`SensorValues::fill_from`]: CO2 ppm for the SCD41, temperature
/// then humidity for the SHT40, volts for the battery divider.
pub trait SensorReadings<const COUNT: usize> {
    fn into_values(self) -> [f32; COUNT];
}

/// One measuring chip. Implementations bound their own wait, so a chip that
/// never reports surfaces as [`SensorError::Timeout`].
#[allow(async_fn_in_trait)]
pub trait Sensor<const COUNT: usize> {
    type Readings: SensorReadings<COUNT>;

    async fn measure(&mut self) -> Result<Self::Readings, SensorError>;
}

/// Every sensor on the board, read together.
#[allow(async_fn_in_trait)]
pub trait SensorBank {
    async fn read(&mut self) -> SensorValues;
}

/// Battery voltage as reported: zero while USB powered.
pub fn battery_report(volts: f32) -> f32 {
    if volts < USB_POWERED_VOLTAGE { volts } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    struct Climate(Result<[f32; 2], SensorError>);

    struct ClimateReadings([f32; 2]);

    impl SensorReadings<2> for ClimateReadings {
        fn into_values(self) -> [f32; 2] {
            self.0
        }
    }

    impl Sensor<2> for Climate {
        type Readings = ClimateReadings;

        async fn measure(&mut self) -> Result<ClimateReadings, SensorError> {
            self.0.map(ClimateReadings)
        }
    }

    #[test]
    fn test_fill_from_places_values_by_kind() {
        let mut values = SensorValues::default();
        let mut sensor = Climate(Ok([21.5, 40.0]));

        block_on(values.fill_from(&mut sensor, [SensorKind::Temperature, SensorKind::Humidity]));

        assert_eq!(values.get(SensorKind::Temperature), Some(21.5));
        assert_eq!(values.get(SensorKind::Humidity), Some(40.0));
        assert_eq!(values.get(SensorKind::Co2), None);
    }

    #[test]
    fn test_fill_from_leaves_slots_empty_on_error() {
        let mut values = SensorValues::default();
        let mut sensor = Climate(Err(SensorError::Timeout {
            sensor: "SHT40",
            operation: "measure",
        }));

        block_on(values.fill_from(&mut sensor, [SensorKind::Temperature, SensorKind::Humidity]));

        assert!(values.is_empty());
    }

    #[test]
    fn test_battery_report_hides_usb_voltage() {
        assert_eq!(battery_report(3.91), 3.91);
        assert_eq!(battery_report(4.20), 0.0);
        assert_eq!(battery_report(4.95), 0.0);
    }

    #[test]
    fn test_iter_skips_missing() {
        let values = SensorValues::default()
            .with(SensorKind::Co2, 612.0)
            .with(SensorKind::Battery, 3.9);
        let present: alloc::vec::Vec<_> = values.iter().collect();
        assert_eq!(present, [(SensorKind::Co2, 612.0), (SensorKind::Battery, 3.9)]);
    }
}
