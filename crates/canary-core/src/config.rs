//! Node configuration.
//!
//! Deserializable from JSON with every field optional; missing fields take
//! the defaults below. Wi-Fi and broker credentials are not part of this
//! struct, the firmware bakes those in at build time.

use core::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, bound(deserialize = "'de: 'a"))]
pub struct NodeConfig<'a> {
    /// Nap length while attached.
    pub light_sleep_secs: u32,
    /// Deep-sleep length while untethered.
    pub deep_sleep_secs: u32,
    pub display_refresh_secs: u32,
    pub upload_secs: u32,
    pub time_sync_secs: u32,
    /// Ambient pressure (mbar) programmed at cold boot.
    pub ambient_pressure: u32,
    /// Temperature offset (C) programmed at cold boot.
    pub temp_offset_c: f32,
    /// Stay in deep sleep even when a host is attached.
    pub force_deep_sleep: bool,
    /// Allow network-free wakes that only take a sample.
    pub single_shot_sampling: bool,
    pub pressure_topic: &'a str,
    pub discovery_prefix: &'a str,
    pub device_name: &'a str,
    pub model: &'a str,
    pub manufacturer: &'a str,
    pub tz_offset_hours: i8,
    pub keep_alive_margin_secs: u16,
    pub wifi_attempts: u8,
    pub wifi_retry_delay_ms: u32,
    pub link_cycle_delay_ms: u32,
    /// Address pinged to decide whether the link itself is broken.
    pub ping_address: Ipv4Addr,
}

impl Default for NodeConfig<'_> {
    fn default() -> Self {
        Self {
            light_sleep_secs: 30,
            deep_sleep_secs: 120,
            display_refresh_secs: 120,
            upload_secs: 600,
            time_sync_secs: 3600,
            ambient_pressure: 1000,
            temp_offset_c: 1.0,
            force_deep_sleep: false,
            single_shot_sampling: false,
            pressure_topic: "homeassistant/aranet/pressure",
            discovery_prefix: "homeassistant",
            device_name: "Test",
            model: "Magtag",
            manufacturer: "canary",
            tz_offset_hours: -8,
            keep_alive_margin_secs: 20,
            wifi_attempts: 5,
            wifi_retry_delay_ms: 3000,
            link_cycle_delay_ms: 1000,
            ping_address: Ipv4Addr::new(8, 8, 4, 4),
        }
    }
}

impl NodeConfig<'_> {
    /// MQTT keep-alive: the longest the node stays silent plus a margin.
    pub fn keep_alive_secs(&self, attached: bool) -> u16 {
        let sleep = if attached {
            self.light_sleep_secs
        } else {
            self.deep_sleep_secs
        };
        u16::try_from(sleep)
            .unwrap_or(u16::MAX)
            .saturating_add(self.keep_alive_margin_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{"deep_sleep_secs": 300, "pressure_topic": "home/pressure"}"#;
        let config: NodeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.deep_sleep_secs, 300);
        assert_eq!(config.pressure_topic, "home/pressure");
        assert_eq!(config.light_sleep_secs, 30);
        assert_eq!(config.ambient_pressure, 1000);
        assert_eq!(config.ping_address, Ipv4Addr::new(8, 8, 4, 4));
    }

    #[test]
    fn test_keep_alive_depends_on_mode() {
        let config = NodeConfig::default();
        assert_eq!(config.keep_alive_secs(true), 50);
        assert_eq!(config.keep_alive_secs(false), 140);
    }
}
