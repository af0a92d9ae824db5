//! Sensor/device facade.
//!
//! Owns the device identity, the last known value of each sensor and the
//! queue of readings waiting to be published. All network output goes
//! through [`StatePublisher`].

pub mod discovery;
pub mod sensor;

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use heapless::Deque;
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::NodeConfig;
use crate::network::StatePublisher;
use crate::retained::{RecordStore, RetainedMemory, StoreError};

use discovery::{DeviceInfo, NUMBERS};
pub use sensor::{Sensor, SensorBank, SensorError, SensorKind, SensorReadings, SensorValues};

/// Readings kept for publishing; the oldest are dropped beyond this.
pub const MAX_QUEUED_READINGS: usize = 8;

/// Why a publish did not reach the broker.
#[derive(Debug)]
pub enum DeviceError<E> {
    Client(E),
    Store(StoreError),
    Encode(serde_json::Error),
}

impl<E> From<StoreError> for DeviceError<E> {
    fn from(e: StoreError) -> Self {
        DeviceError::Store(e)
    }
}

impl<E> From<serde_json::Error> for DeviceError<E> {
    fn from(e: serde_json::Error) -> Self {
        DeviceError::Encode(e)
    }
}

/// Expected values of the adjustable settings, as published to the hub.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct NumberState {
    #[serde(rename = "Temp_Offset")]
    pub temp_offset: f32,
    #[serde(rename = "Pressure")]
    pub pressure: u32,
    #[serde(rename = "CO2_Ref")]
    pub co2_ref: i32,
}

impl NumberState {
    pub fn load<M: RetainedMemory>(store: &RecordStore<M>) -> Result<Self, StoreError> {
        Ok(Self {
            temp_offset: store.get_as(NUMBERS[0].field)?,
            pressure: store.get_as(NUMBERS[1].field)?,
            co2_ref: store.get_as(NUMBERS[2].field)?,
        })
    }
}

pub struct Device {
    device_id: String,
    device_name: String,
    prefix: String,
    info: DeviceInfo,
    last_known: SensorValues,
    queue: Deque<SensorValues, MAX_QUEUED_READINGS>,
}

impl Device {
    /// `uid` is the chip's unique id; the device id is `<model>-<hex uid>`.
    pub fn new(config: &NodeConfig, uid: &[u8]) -> Self {
        let uid_hex: String = uid.iter().map(|b| format!("{:02x}", b)).collect();
        let device_id = format!("{}-{}", config.model, uid_hex);

        Self {
            device_id,
            device_name: config.device_name.into(),
            prefix: config.discovery_prefix.into(),
            info: DeviceInfo {
                ids: uid_hex,
                mf: config.manufacturer.into(),
                mdl: config.model.into(),
                name: config.device_name.into(),
                sw: env!("CARGO_PKG_VERSION").into(),
            },
            last_known: SensorValues::default(),
            queue: Deque::new(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Base topic shared by the number entities.
    pub fn number_topic(&self) -> String {
        format!("{}/number/{}", self.prefix, self.device_id)
    }

    /// Base topic shared by the sensor entities.
    pub fn sensor_topic(&self) -> String {
        format!("{}/sensor/{}", self.prefix, self.device_id)
    }

    /// Topic the hub writes number commands to.
    pub fn command_topic(&self) -> String {
        format!("{}/cmd", self.number_topic())
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Read every sensor. A sensor that produced nothing reports its last
    /// known value. With `cache`, the reading is queued for publishing.
    pub async fn read_sensors<B: SensorBank>(&mut self, bank: &mut B, cache: bool) -> SensorValues {
        let fresh = bank.read().await;
        let mut merged = fresh;

        for kind in SensorKind::ALL {
            match fresh.get(kind) {
                Some(value) => self.last_known.set(kind, Some(value)),
                None => {
                    let stale = self.last_known.get(kind);
                    warn!("{} unavailable, using last value {:?}", kind.name(), stale);
                    merged.set(kind, stale);
                }
            }
        }

        if cache {
            if self.queue.is_full() {
                warn!("Publish queue full, dropping oldest reading");
                self.queue.pop_front();
            }
            if self.queue.push_back(merged).is_err() {
                warn!("Reading not queued");
            }
        }

        debug!("Sensor readings: {:?}", merged);
        merged
    }

    /// Publish queued readings oldest first. Readings not yet published stay
    /// queued when the client fails.
    pub async fn publish_sensors<C: StatePublisher>(
        &mut self,
        client: &mut C,
    ) -> Result<(), DeviceError<C::Error>> {
        let topic = format!("{}/state", self.sensor_topic());

        while let Some(reading) = self.queue.front() {
            let payload = state_payload(reading)?;
            info!("Publishing to {}: {}", topic, String::from_utf8_lossy(&payload));
            client
                .publish_retained(&topic, &payload)
                .await
                .map_err(DeviceError::Client)?;
            self.queue.pop_front();
        }

        Ok(())
    }

    /// Publish the expected value of every adjustable setting.
    pub async fn publish_numbers<C: StatePublisher, M: RetainedMemory>(
        &mut self,
        client: &mut C,
        store: &RecordStore<M>,
    ) -> Result<(), DeviceError<C::Error>> {
        let topic = format!("{}/state", self.number_topic());
        let payload = encode(&NumberState::load(store)?)?;

        info!("Publishing to {}: {}", topic, String::from_utf8_lossy(&payload));
        client
            .publish_retained(&topic, &payload)
            .await
            .map_err(DeviceError::Client)
    }

    /// Publish a retained discovery config for every sensor and number.
    pub async fn send_discovery<C: StatePublisher>(
        &self,
        client: &mut C,
    ) -> Result<(), DeviceError<C::Error>> {
        info!("Publishing Home Assistant discovery messages...");

        let sensor_base = self.sensor_topic();
        for kind in SensorKind::ALL {
            let config = discovery::sensor_config(
                kind,
                &sensor_base,
                &self.device_id,
                &self.device_name,
                &self.info,
            );
            let topic = discovery::config_topic(
                &self.prefix,
                "sensor",
                &self.device_id,
                &self.device_name,
                kind.name(),
            );
            self.publish_config(client, &topic, &config).await?;
        }

        let number_base = self.number_topic();
        for spec in NUMBERS.iter() {
            let config = discovery::number_config(
                spec,
                &number_base,
                &self.device_id,
                &self.device_name,
                &self.info,
            );
            let topic = discovery::config_topic(
                &self.prefix,
                "number",
                &self.device_id,
                &self.device_name,
                spec.name,
            );
            self.publish_config(client, &topic, &config).await?;
        }

        info!("Home Assistant discovery published");
        Ok(())
    }

    async fn publish_config<C: StatePublisher>(
        &self,
        client: &mut C,
        topic: &str,
        config: &discovery::DiscoveryConfig<'_>,
    ) -> Result<(), DeviceError<C::Error>> {
        let payload = encode(config)?;
        debug!("Discovery topic: {}", topic);
        client
            .publish_retained(topic, &payload)
            .await
            .map_err(DeviceError::Client)
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// JSON object mapping each present sensor key to its value.
fn state_payload(values: &SensorValues) -> Result<Vec<u8>, serde_json::Error> {
    let state: BTreeMap<&str, f32> = values.iter().map(|(kind, value)| (kind.key(), value)).collect();
    encode(&state)
}
