//! Build-time credentials, see `build.rs`.

pub const WIFI_SSID: &str = env!("CANARY_WIFI_SSID");
pub const WIFI_PASSWORD: &str = env!("CANARY_WIFI_PASSWORD");
pub const MQTT_HOST: &str = env!("CANARY_MQTT_HOST");
pub const MQTT_USERNAME: &str = env!("CANARY_MQTT_USERNAME");
pub const MQTT_PASSWORD: &str = env!("CANARY_MQTT_PASSWORD");

const MQTT_PORT_TEXT: &str = env!("CANARY_MQTT_PORT");
pub const DEFAULT_MQTT_PORT: u16 = 1883;

pub fn mqtt_port() -> u16 {
    MQTT_PORT_TEXT.parse().unwrap_or(DEFAULT_MQTT_PORT)
}

pub fn network_configured() -> bool {
    !WIFI_SSID.is_empty() && !MQTT_HOST.is_empty()
}
