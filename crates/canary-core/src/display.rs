//! Status screen
//!
//! Large CO2 figure on top, temperature/humidity/battery in a row below it,
//! and a footer with the last update and upload times. Text is built here;
//! the panel only has to draw it.

use alloc::format;
use alloc::string::String;

use embedded_graphics::{
    Drawable as EgDrawable,
    geometry::Point,
    mono_font::{
        MonoTextStyle,
        ascii::{FONT_6X10, FONT_10X20},
    },
    pixelcolor::Rgb565,
    prelude::*,
    text::{Alignment, Text},
};

use crate::device::{SensorKind, SensorValues};

pub const DISPLAY_WIDTH_PX: u32 = 320;
pub const DISPLAY_HEIGHT_PX: u32 = 240;

const MISSING: &str = "--";
const SECS_PER_DAY: i64 = 86_400;

/// Everything shown on the status screen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatusScreen {
    pub readings: SensorValues,
    pub attached: bool,
    /// Epoch seconds of this refresh.
    pub updated: u32,
    /// Epoch seconds of the last upload; zero if none yet.
    pub uploaded: u32,
    pub tz_offset_hours: i8,
}

impl StatusScreen {
    pub fn co2_text(&self) -> String {
        match self.readings.get(SensorKind::Co2) {
            Some(ppm) => format!("CO2: {:.0}", ppm),
            None => format!("CO2: {}", MISSING),
        }
    }

    pub fn temperature_text(&self) -> String {
        match self.readings.get(SensorKind::Temperature) {
            Some(celsius) => format!("{:.1} F", c_to_f(celsius)),
            None => format!("{} F", MISSING),
        }
    }

    pub fn humidity_text(&self) -> String {
        match self.readings.get(SensorKind::Humidity) {
            Some(rh) => format!("{:.0}%", rh),
            None => format!("{}%", MISSING),
        }
    }

    pub fn battery_text(&self) -> String {
        match self.readings.get(SensorKind::Battery) {
            Some(volts) => format!("{:.2} V", volts),
            None => format!("{} V", MISSING),
        }
    }

    pub fn time_text(&self) -> String {
        let uploaded = if self.uploaded == 0 {
            String::from(MISSING)
        } else {
            local_time(self.uploaded, self.tz_offset_hours)
        };
        format!(
            "Updated: {}. Uploaded: {}",
            local_time(self.updated, self.tz_offset_hours),
            uploaded
        )
    }

    pub fn draw<D: DrawTarget<Color = Rgb565>>(&self, display: &mut D) -> Result<(), D::Error> {
        display.clear(Rgb565::WHITE)?;

        let large = MonoTextStyle::new(&FONT_10X20, Rgb565::BLACK);
        let small = MonoTextStyle::new(&FONT_6X10, Rgb565::BLACK);
        let width = DISPLAY_WIDTH_PX as i32;

        let link = if self.attached { "USB" } else { "BAT" };
        EgDrawable::draw(
            &Text::with_alignment(link, Point::new(5, 12), small, Alignment::Left),
            display,
        )?;

        EgDrawable::draw(
            &Text::with_alignment(&self.co2_text(), Point::new(width / 2, 60), large, Alignment::Center),
            display,
        )?;

        let row = [self.temperature_text(), self.humidity_text(), self.battery_text()];
        for (i, text) in row.iter().enumerate() {
            let x = (2 * i as i32 + 1) * width / 6;
            EgDrawable::draw(
                &Text::with_alignment(text, Point::new(x, 130), large, Alignment::Center),
                display,
            )?;
        }

        EgDrawable::draw(
            &Text::with_alignment(
                &self.time_text(),
                Point::new(width / 2, DISPLAY_HEIGHT_PX as i32 - 20),
                small,
                Alignment::Center,
            ),
            display,
        )?;

        Ok(())
    }
}

/// The status panel.
#[allow(async_fn_in_trait)]
pub trait StatusDisplay {
    type Error: core::fmt::Debug;

    async fn show(&mut self, screen: &StatusScreen) -> Result<(), Self::Error>;
}

pub fn c_to_f(celsius: f32) -> f32 {
    celsius * 1.8 + 32.0
}

/// `h:mm:ss` wall-clock time of `epoch` shifted by `tz_offset_hours`.
pub fn local_time(epoch: u32, tz_offset_hours: i8) -> String {
    let local = (epoch as i64 + tz_offset_hours as i64 * 3600).rem_euclid(SECS_PER_DAY);
    format!("{}:{:02}:{:02}", local / 3600, (local % 3600) / 60, local % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use embedded_graphics::{Pixel, geometry::Size};

    // 2023-11-14 22:13:20 UTC
    const EPOCH: u32 = 1_700_000_000;

    fn screen() -> StatusScreen {
        StatusScreen {
            readings: SensorValues::default()
                .with(SensorKind::Co2, 612.4)
                .with(SensorKind::Temperature, 22.4)
                .with(SensorKind::Humidity, 45.2)
                .with(SensorKind::Battery, 3.914),
            attached: false,
            updated: EPOCH,
            uploaded: EPOCH - 305,
            tz_offset_hours: -8,
        }
    }

    #[test]
    fn test_reading_text() {
        let screen = screen();
        assert_eq!(screen.co2_text(), "CO2: 612");
        assert_eq!(screen.temperature_text(), "72.3 F");
        assert_eq!(screen.humidity_text(), "45%");
        assert_eq!(screen.battery_text(), "3.91 V");
    }

    #[test]
    fn test_missing_readings_render_placeholder() {
        let screen = StatusScreen::default();
        assert_eq!(screen.co2_text(), "CO2: --");
        assert_eq!(screen.temperature_text(), "-- F");
        assert_eq!(screen.battery_text(), "-- V");
    }

    #[test]
    fn test_time_text_uses_local_time() {
        assert_eq!(screen().time_text(), "Updated: 14:13:20. Uploaded: 14:08:15");

        let never = StatusScreen {
            uploaded: 0,
            ..screen()
        };
        assert_eq!(never.time_text(), "Updated: 14:13:20. Uploaded: --");
    }

    #[test]
    fn test_local_time_wraps_midnight() {
        assert_eq!(local_time(3_600, -8), "17:00:00");
        assert_eq!(local_time(0, 0), "0:00:00");
        assert_eq!(local_time(86_399, 0), "23:59:59");
    }

    struct PixelCounter {
        drawn: usize,
    }

    impl OriginDimensions for PixelCounter {
        fn size(&self) -> Size {
            Size::new(DISPLAY_WIDTH_PX, DISPLAY_HEIGHT_PX)
        }
    }

    impl DrawTarget for PixelCounter {
        type Color = Rgb565;
        type Error = core::convert::Infallible;

        fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
        where
            I: IntoIterator<Item = Pixel<Self::Color>>,
        {
            self.drawn += pixels.into_iter().filter(|Pixel(_, c)| *c == Rgb565::BLACK).count();
            Ok(())
        }
    }

    #[test]
    fn test_draw_renders_text() {
        let mut panel = PixelCounter { drawn: 0 };
        screen().draw(&mut panel).unwrap();
        assert!(panel.drawn > 0, "text pixels drawn");
    }
}
