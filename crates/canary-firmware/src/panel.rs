//! ILI9342 status panel over SPI.

use core::fmt::Debug;

use canary_core::display::{DISPLAY_HEIGHT_PX, DISPLAY_WIDTH_PX, StatusDisplay, StatusScreen};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::DrawTarget;
use embedded_hal_bus::spi::{ExclusiveDevice, NoDelay};
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::peripherals::{GPIO34, GPIO35, GPIO36, GPIO37, SPI2};
use esp_hal::spi::master::{Config, Spi};
use log::error;
use mipidsi::interface::SpiInterface;
use mipidsi::models::ILI9342CRgb565;
use mipidsi::{Builder, NoResetPin};
use static_cell::StaticCell;
use thiserror_no_std::Error;

pub type PanelSpi = ExclusiveDevice<Spi<'static, esp_hal::Blocking>, Output<'static>, NoDelay>;

pub type Lcd =
    mipidsi::Display<SpiInterface<'static, PanelSpi, Output<'static>>, ILI9342CRgb565, NoResetPin>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelError {
    #[error("SPI bus setup failed")]
    Spi,
    #[error("Panel initialization failed")]
    Init,
}

pub struct Panel<D> {
    target: D,
}

impl<D> Panel<D> {
    pub fn new(target: D) -> Self {
        Self { target }
    }
}

impl<D> StatusDisplay for Panel<D>
where
    D: DrawTarget<Color = Rgb565>,
    D::Error: Debug,
{
    type Error = D::Error;

    async fn show(&mut self, screen: &StatusScreen) -> Result<(), D::Error> {
        screen.draw(&mut self.target)
    }
}

pub struct PanelPins {
    pub spi: SPI2<'static>,
    pub sck: GPIO36<'static>,
    pub mosi: GPIO37<'static>,
    pub cs: GPIO35<'static>,
    pub dc: GPIO34<'static>,
}

pub fn init(pins: PanelPins) -> Result<Panel<Lcd>, PanelError> {
    static SPI_BUFFER: StaticCell<[u8; 512]> = StaticCell::new();

    let bus = Spi::new(pins.spi, Config::default())
        .map_err(|e| {
            error!("SPI config rejected: {:?}", e);
            PanelError::Spi
        })?
        .with_sck(pins.sck)
        .with_mosi(pins.mosi);

    let cs = Output::new(pins.cs, Level::High, OutputConfig::default());
    let device = ExclusiveDevice::new_no_delay(bus, cs).map_err(|_| PanelError::Spi)?;
    let dc = Output::new(pins.dc, Level::Low, OutputConfig::default());
    let interface = SpiInterface::new(device, dc, SPI_BUFFER.init([0; 512]));

    let lcd = Builder::new(ILI9342CRgb565, interface)
        .display_size(DISPLAY_WIDTH_PX as u16, DISPLAY_HEIGHT_PX as u16)
        .init(&mut embassy_time::Delay)
        .map_err(|e| {
            error!("Panel init failed: {:?}", e);
            PanelError::Init
        })?;

    Ok(Panel::new(lcd))
}
