//! Shared async I2C bus.
//!
//! The SCD41 and SHT40 sit on the same bus. Each driver gets its own
//! [`SharedI2c`] handle; the embassy mutex serializes transactions and is held
//! across the awaited transfer.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_hal_async::i2c::{ErrorType, I2c, Operation};
use esp_hal::i2c::master::{Config as I2cConfig, I2c as EspI2c};
use esp_hal::peripherals::{GPIO3, GPIO4, I2C0};
use esp_hal::time::Rate;
use static_cell::StaticCell;

pub type Bus = EspI2c<'static, esp_hal::Async>;

pub type SharedBus = Mutex<CriticalSectionRawMutex, Bus>;

pub struct SharedI2c<'a, T> {
    bus: &'a Mutex<CriticalSectionRawMutex, T>,
}

impl<'a, T> SharedI2c<'a, T> {
    #[inline]
    pub const fn new(bus: &'a Mutex<CriticalSectionRawMutex, T>) -> Self {
        Self { bus }
    }
}

impl<T: ErrorType> ErrorType for SharedI2c<'_, T> {
    type Error = T::Error;
}

impl<T: I2c> I2c for SharedI2c<'_, T> {
    #[inline]
    async fn read(&mut self, address: u8, read: &mut [u8]) -> Result<(), Self::Error> {
        self.bus.lock().await.read(address, read).await
    }

    #[inline]
    async fn write(&mut self, address: u8, write: &[u8]) -> Result<(), Self::Error> {
        self.bus.lock().await.write(address, write).await
    }

    #[inline]
    async fn write_read(
        &mut self,
        address: u8,
        write: &[u8],
        read: &mut [u8],
    ) -> Result<(), Self::Error> {
        self.bus.lock().await.write_read(address, write, read).await
    }

    #[inline]
    async fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        self.bus.lock().await.transaction(address, operations).await
    }
}

/// Bring up I2C0 at 100 kHz (the SCD41's limit) on the STEMMA QT pins and
/// park it in a static so sensor handles can borrow it for `'static`.
pub fn init(
    i2c0: I2C0<'static>,
    sda: GPIO3<'static>,
    scl: GPIO4<'static>,
) -> Result<&'static SharedBus, esp_hal::i2c::master::ConfigError> {
    static BUS: StaticCell<SharedBus> = StaticCell::new();

    let i2c = EspI2c::new(i2c0, I2cConfig::default().with_frequency(Rate::from_khz(100)))?
        .with_sda(sda)
        .with_scl(scl)
        .into_async();

    Ok(BUS.init(Mutex::new(i2c)))
}
