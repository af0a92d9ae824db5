//! Start cause from the ESP32-S3 reset and wakeup registers.

use canary_core::boot::StartCause;
use esp_hal::rtc_cntl::{SocResetReason, reset_reason, wakeup_cause};
use esp_hal::system::Cpu;
use log::info;

pub fn start_cause() -> StartCause {
    let reason = reset_reason(Cpu::ProCpu);
    info!("Reset reason {:?}, wakeup cause {:?}", reason, wakeup_cause());
    classify(reason)
}

fn classify(reason: Option<SocResetReason>) -> StartCause {
    match reason {
        Some(SocResetReason::ChipPowerOn) => StartCause::PowerOn,
        Some(SocResetReason::CoreDeepSleep) => StartCause::SleepTimerWake,
        Some(SocResetReason::CoreSw | SocResetReason::Cpu0Sw) => StartCause::SoftwareRestart,
        Some(
            SocResetReason::CoreMwdt0
            | SocResetReason::CoreMwdt1
            | SocResetReason::CoreRtcWdt
            | SocResetReason::Cpu0Mwdt0
            | SocResetReason::Cpu0Mwdt1
            | SocResetReason::Cpu0RtcWdt
            | SocResetReason::SysRtcWdt
            | SocResetReason::SysSuperWdt,
        ) => StartCause::Watchdog,
        Some(SocResetReason::SysBrownOut) => StartCause::ExternalReset,
        _ => StartCause::Unknown,
    }
}
