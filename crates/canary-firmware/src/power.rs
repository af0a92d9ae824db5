//! USB attachment sensing and the three ways a cycle can end: nap, deep
//! sleep, restart.

use canary_core::power::PowerControl;
use esp_hal::gpio::Input;
use esp_hal::peripherals::LPWR;
use esp_hal::rtc_cntl::{Rtc, sleep::TimerWakeupSource};
use log::{debug, info};

use crate::clock::SharedRtc;

/// VBUS sense and the RTC controller that runs light sleep. VBUS reads
/// through a divider and is high while a host powers the board.
pub struct BoardPower {
    vbus: Input<'static>,
    rtc: SharedRtc,
}

impl BoardPower {
    pub fn new(vbus: Input<'static>, rtc: SharedRtc) -> Self {
        Self { vbus, rtc }
    }
}

impl PowerControl for BoardPower {
    fn attachment_detected(&mut self) -> bool {
        self.vbus.is_high()
    }

    /// Light sleep: the CPU halts with RAM and peripheral state kept, and
    /// execution continues here when the RTC timer fires.
    async fn nap(&mut self, secs: u32) {
        debug!("Light sleep for {} s", secs);
        let wake = TimerWakeupSource::new(core::time::Duration::from_secs(secs as u64));
        self.rtc.borrow_mut().sleep_light(&[&wake]);
    }
}

pub fn deep_sleep(secs: u32) -> ! {
    info!("Entering deep sleep for {} s", secs);
    let wake = TimerWakeupSource::new(core::time::Duration::from_secs(secs as u64));

    // SAFETY: nothing else touches the RTC controller after the node exits.
    let mut rtc = Rtc::new(unsafe { LPWR::steal() });
    rtc.sleep_deep(&[&wake]);
}

pub fn restart() -> ! {
    info!("Restarting");
    esp_hal::system::software_reset()
}
