//! Sleep/power state machine.
//!
//! The mode is fixed for the lifetime of one process image. Each cycle ends
//! with [`decide`], which either naps in place or ends the process with a
//! deep sleep or a reboot into the other mode.

use log::info;
use thiserror_no_std::Error;

use crate::boot::BootKind;
use crate::config::NodeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceMode {
    /// Host attached: short naps, network kept up, recovery enabled.
    AttachedFastCycle,
    /// On battery: one cycle per wake, network torn down before sleeping.
    UntetheredDeepCycle,
    /// On battery, nothing due but a sample: the network stack is never
    /// brought up.
    DeepSamplingOnly,
}

impl DeviceMode {
    /// Pick the mode for this boot.
    pub fn select(attached: bool, policy: &SleepPolicy, sampling_only_eligible: bool) -> Self {
        let mode = if attached && !policy.force_deep_sleep {
            DeviceMode::AttachedFastCycle
        } else if sampling_only_eligible {
            DeviceMode::DeepSamplingOnly
        } else {
            DeviceMode::UntetheredDeepCycle
        };
        info!("Device mode {:?} (attached: {})", mode, attached);
        mode
    }

    pub fn is_attached(self) -> bool {
        self == DeviceMode::AttachedFastCycle
    }

    pub fn uses_network(self) -> bool {
        self != DeviceMode::DeepSamplingOnly
    }
}

/// Whether a battery wake may skip the network entirely: enabled in config,
/// not a cold boot, and neither upload nor time sync due.
pub fn sampling_only_eligible(
    config: &NodeConfig,
    boot: BootKind,
    upload_due: bool,
    time_sync_due: bool,
) -> bool {
    config.single_shot_sampling && !boot.is_cold() && !upload_due && !time_sync_due
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepPolicy {
    pub nap_secs: u32,
    pub deep_sleep_secs: u32,
    pub force_deep_sleep: bool,
}

impl From<&NodeConfig<'_>> for SleepPolicy {
    fn from(config: &NodeConfig<'_>) -> Self {
        Self {
            nap_secs: config.light_sleep_secs,
            deep_sleep_secs: config.deep_sleep_secs,
            force_deep_sleep: config.force_deep_sleep,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepDecision {
    /// Sleep in place and run another cycle in the same process.
    Nap(u32),
    /// Power down; the next start is a timer wake.
    DeepSleep(u32),
    /// The attachment state changed: restart into `into`.
    Reboot { into: DeviceMode },
}

/// End-of-cycle decision from the boot mode and the freshly observed
/// attachment signal.
pub fn decide(mode: DeviceMode, attached: bool, policy: &SleepPolicy) -> SleepDecision {
    match mode {
        DeviceMode::AttachedFastCycle if attached => SleepDecision::Nap(policy.nap_secs),
        DeviceMode::AttachedFastCycle => SleepDecision::Reboot {
            into: DeviceMode::UntetheredDeepCycle,
        },
        DeviceMode::UntetheredDeepCycle | DeviceMode::DeepSamplingOnly
            if attached && !policy.force_deep_sleep =>
        {
            SleepDecision::Reboot {
                into: DeviceMode::AttachedFastCycle,
            }
        }
        DeviceMode::UntetheredDeepCycle | DeviceMode::DeepSamplingOnly => {
            SleepDecision::DeepSleep(policy.deep_sleep_secs)
        }
    }
}

/// Why the node is asking the platform for a full restart.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    #[error("Wi-Fi link unavailable")]
    LinkUnavailable,
    #[error("MQTT broker unavailable")]
    BrokerUnavailable,
    #[error("Discovery publish failed")]
    DiscoveryFailed,
    #[error("Mode change into {0:?}")]
    ModeChange(DeviceMode),
    #[error("Retained store fault")]
    StoreFault,
}

/// Board power control.
#[allow(async_fn_in_trait)]
pub trait PowerControl {
    /// Whether a host (USB data session) is attached right now.
    fn attachment_detected(&mut self) -> bool;

    /// Sleep in place; execution continues after the call.
    async fn nap(&mut self, secs: u32);
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: SleepPolicy = SleepPolicy {
        nap_secs: 30,
        deep_sleep_secs: 120,
        force_deep_sleep: false,
    };

    const MODES: [DeviceMode; 3] = [
        DeviceMode::AttachedFastCycle,
        DeviceMode::UntetheredDeepCycle,
        DeviceMode::DeepSamplingOnly,
    ];

    #[test]
    fn test_attached_naps_until_detached() {
        assert_eq!(
            decide(DeviceMode::AttachedFastCycle, true, &POLICY),
            SleepDecision::Nap(30)
        );
        assert_eq!(
            decide(DeviceMode::AttachedFastCycle, false, &POLICY),
            SleepDecision::Reboot {
                into: DeviceMode::UntetheredDeepCycle
            }
        );
    }

    #[test]
    fn test_untethered_reboots_when_attached() {
        for mode in [DeviceMode::UntetheredDeepCycle, DeviceMode::DeepSamplingOnly] {
            assert_eq!(decide(mode, false, &POLICY), SleepDecision::DeepSleep(120));
            assert_eq!(
                decide(mode, true, &POLICY),
                SleepDecision::Reboot {
                    into: DeviceMode::AttachedFastCycle
                }
            );
        }
    }

    #[test]
    fn test_force_deep_sleep_ignores_attachment() {
        let forced = SleepPolicy {
            force_deep_sleep: true,
            ..POLICY
        };

        assert_eq!(
            decide(DeviceMode::UntetheredDeepCycle, true, &forced),
            SleepDecision::DeepSleep(120)
        );
        assert_eq!(
            DeviceMode::select(true, &forced, false),
            DeviceMode::UntetheredDeepCycle
        );
    }

    #[test]
    fn test_decide_is_deterministic() {
        for mode in MODES {
            for attached in [false, true] {
                let first = decide(mode, attached, &POLICY);
                for _ in 0..3 {
                    assert_eq!(decide(mode, attached, &POLICY), first);
                }
            }
        }
    }

    #[test]
    fn test_mode_selection() {
        assert_eq!(
            DeviceMode::select(true, &POLICY, true),
            DeviceMode::AttachedFastCycle,
            "attachment wins over sampling-only"
        );
        assert_eq!(
            DeviceMode::select(false, &POLICY, false),
            DeviceMode::UntetheredDeepCycle
        );
        assert_eq!(
            DeviceMode::select(false, &POLICY, true),
            DeviceMode::DeepSamplingOnly
        );
        assert!(!DeviceMode::DeepSamplingOnly.uses_network());
    }

    #[test]
    fn test_sampling_only_eligibility() {
        let mut config = NodeConfig::default();
        assert!(!sampling_only_eligible(&config, BootKind::WarmResumeFromNap, false, false));

        config.single_shot_sampling = true;
        assert!(sampling_only_eligible(&config, BootKind::WarmResumeFromNap, false, false));
        assert!(!sampling_only_eligible(&config, BootKind::ColdBoot, false, false));
        assert!(!sampling_only_eligible(&config, BootKind::WarmResumeFromNap, true, false));
        assert!(!sampling_only_eligible(&config, BootKind::WarmResumeFromNap, false, true));
    }
}
