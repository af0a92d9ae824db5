//! Bakes Wi-Fi and broker credentials into the binary.
//!
//! Values come from the process environment or a `.env` file next to this
//! crate (or any parent directory). Missing keys compile in as empty strings;
//! the firmware logs and skips the network when the SSID is empty.

const SECRETS: [&str; 6] = [
    "WIFI_SSID",
    "WIFI_PASSWORD",
    "MQTT_HOST",
    "MQTT_PORT",
    "MQTT_USERNAME",
    "MQTT_PASSWORD",
];

fn main() {
    println!("cargo:rustc-link-arg=-Tlinkall.x");

    if let Ok(path) = dotenvy::dotenv() {
        println!("cargo:rerun-if-changed={}", path.display());
    }

    for key in SECRETS {
        println!("cargo:rerun-if-env-changed={}", key);
        let value = std::env::var(key).unwrap_or_default();
        println!("cargo:rustc-env=CANARY_{}={}", key, value);
    }
}
