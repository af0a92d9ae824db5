//! Home Assistant MQTT discovery payloads.
//!
//! Uses the abbreviated key schema (`stat_t`, `uniq_id`, `dev`, ...) so
//! payloads stay small. `~` is the shared base topic of the device's sensors
//! or numbers; HA expands it in `stat_t`/`cmd_t`.
//!
//! Reference: https://www.home-assistant.io/integrations/mqtt/#mqtt-discovery

use alloc::format;
use alloc::string::String;

use serde::Serialize;

use super::sensor::SensorKind;
use crate::fields;

/// Device block shared by every entity.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub ids: String,
    pub mf: String,
    pub mdl: String,
    pub name: String,
    pub sw: String,
}

/// A remotely adjustable setting exposed as a number entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumberSpec {
    pub name: &'static str,
    /// Record store field holding the expected value.
    pub field: &'static str,
    pub precision: u8,
    pub min: f32,
    pub max: f32,
    pub step: f32,
    pub device_class: Option<&'static str>,
    pub unit: Option<&'static str>,
    pub mode: Option<&'static str>,
}

pub const TEMP_OFFSET_NUMBER: NumberSpec = NumberSpec {
    name: "Temp Offset",
    field: fields::TEMP_OFFSET,
    precision: 1,
    min: 0.0,
    max: 100.0,
    step: 1.0,
    device_class: None,
    unit: Some("°C"),
    mode: Some("box"),
};

pub const PRESSURE_NUMBER: NumberSpec = NumberSpec {
    name: "Pressure",
    field: fields::PRESSURE,
    precision: 0,
    min: 100.0,
    max: 1100.0,
    step: 1.0,
    device_class: Some("pressure"),
    unit: Some("mbar"),
    mode: Some("box"),
};

pub const CO2_REF_NUMBER: NumberSpec = NumberSpec {
    name: "CO2 Ref",
    field: fields::FORCED_CAL,
    precision: 0,
    min: 400.0,
    max: 5000.0,
    step: 1.0,
    device_class: Some("carbon_dioxide"),
    unit: Some("ppm"),
    mode: Some("box"),
};

pub const NUMBERS: [NumberSpec; 3] = [TEMP_OFFSET_NUMBER, PRESSURE_NUMBER, CO2_REF_NUMBER];

#[derive(Serialize, Debug)]
pub struct DiscoveryConfig<'a> {
    #[serde(rename = "~")]
    pub base: &'a str,
    pub name: &'a str,
    pub stat_t: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_t: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cmd_tpl: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_meas: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stat_cla: Option<&'static str>,
    pub obj_id: String,
    pub uniq_id: String,
    pub dev: &'a DeviceInfo,
    pub val_tpl: String,
}

/// `"Batt Voltage"` -> `"Batt_Voltage"`
pub fn entity_key(name: &str) -> String {
    name.replace(' ', "_")
}

fn value_template(name: &str, precision: u8) -> String {
    format!("{{{{ value_json.{} | round({}) }}}}", entity_key(name), precision)
}

/// Identifiers derived for one entity of a device.
struct EntityIds {
    obj_id: String,
    uniq_id: String,
}

impl EntityIds {
    fn new(device_id: &str, device_name: &str, entity: &str) -> Self {
        let obj_id = format!("{}_{}", device_name, entity_key(entity));
        let uniq_id = format!("{}_{}", device_id, obj_id);
        Self { obj_id, uniq_id }
    }
}

/// Discovery config topic for an entity: `<prefix>/<component>/<uniq_id>/config`.
pub fn config_topic(prefix: &str, component: &str, device_id: &str, device_name: &str, entity: &str) -> String {
    let ids = EntityIds::new(device_id, device_name, entity);
    format!("{}/{}/{}/config", prefix, component, ids.uniq_id)
}

pub fn sensor_config<'a>(
    kind: SensorKind,
    base: &'a str,
    device_id: &str,
    device_name: &str,
    dev: &'a DeviceInfo,
) -> DiscoveryConfig<'a> {
    let ids = EntityIds::new(device_id, device_name, kind.name());
    DiscoveryConfig {
        base,
        name: kind.name(),
        stat_t: "~/state",
        cmd_t: None,
        min: None,
        max: None,
        step: None,
        cmd_tpl: None,
        device_class: Some(kind.device_class()),
        unit_of_meas: Some(kind.unit()),
        mode: None,
        stat_cla: Some("measurement"),
        obj_id: ids.obj_id,
        uniq_id: ids.uniq_id,
        dev,
        val_tpl: value_template(kind.name(), kind.precision()),
    }
}

pub fn number_config<'a>(
    spec: &'a NumberSpec,
    base: &'a str,
    device_id: &str,
    device_name: &str,
    dev: &'a DeviceInfo,
) -> DiscoveryConfig<'a> {
    let ids = EntityIds::new(device_id, device_name, spec.name);
    DiscoveryConfig {
        base,
        name: spec.name,
        stat_t: "~/state",
        cmd_t: Some("~/cmd"),
        min: Some(spec.min),
        max: Some(spec.max),
        step: Some(spec.step),
        cmd_tpl: Some(format!("{{\"{}\": {{{{ value }}}} }}", spec.name)),
        device_class: spec.device_class,
        unit_of_meas: spec.unit,
        mode: spec.mode,
        stat_cla: None,
        obj_id: ids.obj_id,
        uniq_id: ids.uniq_id,
        dev,
        val_tpl: value_template(spec.name, spec.precision),
    }
}
