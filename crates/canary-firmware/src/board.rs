use canary_core::node::Board;
use embedded_hal_async::i2c::I2c;

use crate::clock::RtcClock;
use crate::panel::Panel;
use crate::power::BoardPower;
use crate::sensors::Sensors;

/// The ESP32-S3 board. The SCD41 serves as both the CO2 sensor and the
/// calibration target, so `Sensors` fills both roles.
pub struct CanaryBoard<I, D> {
    pub sensors: Sensors<I>,
    pub panel: Panel<D>,
    pub power: BoardPower,
    pub clock: RtcClock,
}

impl<I, D> Board for CanaryBoard<I, D>
where
    I: I2c,
    Panel<D>: canary_core::display::StatusDisplay,
{
    type Sensors = Sensors<I>;
    type Calibration = Sensors<I>;
    type Display = Panel<D>;
    type Power = BoardPower;
    type Clock = RtcClock;

    fn sensors(&mut self) -> &mut Sensors<I> {
        &mut self.sensors
    }

    fn calibration(&mut self) -> &mut Sensors<I> {
        &mut self.sensors
    }

    fn display(&mut self) -> &mut Panel<D> {
        &mut self.panel
    }

    fn power(&mut self) -> &mut BoardPower {
        &mut self.power
    }

    fn clock(&mut self) -> &mut RtcClock {
        &mut self.clock
    }
}
