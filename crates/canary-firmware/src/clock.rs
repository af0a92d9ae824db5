use core::cell::RefCell;

use canary_core::network::Clock;
use esp_hal::rtc_cntl::Rtc;
use static_cell::StaticCell;

const MICROS_PER_SEC: u64 = 1_000_000;

/// The RTC controller, shared by the wall clock and light sleep. Both run
/// on the node task and never hold the borrow across an await.
pub type SharedRtc = &'static RefCell<Rtc<'static>>;

/// Returns the shared controller on the first call and `None` after.
pub fn share(rtc: Rtc<'static>) -> Option<SharedRtc> {
    static RTC: StaticCell<RefCell<Rtc<'static>>> = StaticCell::new();
    RTC.try_init(RefCell::new(rtc)).map(|rtc| &*rtc)
}

/// Wall clock on the RTC timer, which keeps counting through deep sleep.
pub struct RtcClock {
    rtc: SharedRtc,
}

impl RtcClock {
    pub fn new(rtc: SharedRtc) -> Self {
        Self { rtc }
    }
}

impl Clock for RtcClock {
    fn now(&self) -> u32 {
        (self.rtc.borrow().current_time_us() / MICROS_PER_SEC) as u32
    }

    fn set(&mut self, epoch: u32) {
        self.rtc
            .borrow_mut()
            .set_current_time_us(epoch as u64 * MICROS_PER_SEC);
    }
}
