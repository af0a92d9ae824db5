//! Inbound message dispatch.
//!
//! Each subscribed topic maps to a handler that writes the requested
//! setting into the record store. Handlers run synchronously inside
//! [`NetworkSession::service`](super::NetworkSession::service); the main loop
//! reads the store afterwards.

use alloc::string::String;
use alloc::vec::Vec;

use log::{info, warn};
use serde::Deserialize;
use thiserror_no_std::Error;

use super::mqtt::InboundMessage;
use crate::fields;
use crate::retained::{RecordStore, RetainedMemory, StoreError, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Payload is not UTF-8")]
    NotUtf8,
    #[error("Payload is not a number")]
    InvalidNumber,
    #[error("Payload is not a valid command object")]
    InvalidJson,
    #[error("Store rejected value: {0}")]
    Store(StoreError),
}

impl From<StoreError> for CommandError {
    fn from(e: StoreError) -> Self {
        CommandError::Store(e)
    }
}

/// Body of a message on the device command topic. Keys match the number
/// entity names; unknown keys are ignored.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Command {
    #[serde(rename = "CO2 Ref")]
    pub co2_ref: Option<f64>,
    #[serde(rename = "Temp Offset")]
    pub temp_offset: Option<f64>,
    #[serde(rename = "Pressure")]
    pub pressure: Option<f64>,
}

pub type Handler<M> = fn(&mut RecordStore<M>, &[u8]) -> Result<(), CommandError>;

pub struct Router<M: RetainedMemory> {
    routes: Vec<(String, Handler<M>)>,
}

impl<M: RetainedMemory> Default for Router<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RetainedMemory> Router<M> {
    pub fn new() -> Self {
        Self { routes: Vec::new() }
    }

    /// The node's routes: ambient pressure feed and the device command topic.
    pub fn for_node(pressure_topic: &str, command_topic: &str) -> Self {
        let mut router = Self::new();
        router.register(pressure_topic, handle_pressure);
        router.register(command_topic, handle_command);
        router
    }

    pub fn register(&mut self, topic: &str, handler: Handler<M>) {
        self.routes.push((topic.into(), handler));
    }

    /// Every topic to subscribe to after connecting.
    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.routes.iter().map(|(topic, _)| topic.as_str())
    }

    /// Run the handler for `message`. Failures are logged and the message
    /// dropped. Returns whether a handler accepted the message.
    pub fn dispatch(&self, store: &mut RecordStore<M>, message: &InboundMessage) -> bool {
        info!("New message on topic {}", message.topic);

        let Some((_, handler)) = self.routes.iter().find(|(topic, _)| *topic == message.topic)
        else {
            warn!("No handler for topic {}", message.topic);
            return false;
        };

        match handler(store, &message.payload) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping message on {}: {}", message.topic, e);
                false
            }
        }
    }
}

/// Plain numeric pressure in mbar, rounded to the nearest integer.
pub fn handle_pressure<M: RetainedMemory>(
    store: &mut RecordStore<M>,
    payload: &[u8],
) -> Result<(), CommandError> {
    let text = core::str::from_utf8(payload).map_err(|_| CommandError::NotUtf8)?;
    let pressure: f64 = text.trim().parse().map_err(|_| CommandError::InvalidNumber)?;

    let value = store.prepare(fields::PRESSURE, pressure_value(pressure)?)?;
    info!("Updating expected pressure to {}", value);
    store.set(fields::PRESSURE, value)?;
    Ok(())
}

/// JSON command object; each present key updates its expected setting.
///
/// Every key is converted before any is written, so a command with one bad
/// value changes nothing.
pub fn handle_command<M: RetainedMemory>(
    store: &mut RecordStore<M>,
    payload: &[u8],
) -> Result<(), CommandError> {
    let command: Command = serde_json::from_slice(payload).map_err(|_| CommandError::InvalidJson)?;

    let mut updates: Vec<(&str, Value)> = Vec::new();
    if let Some(reference) = command.co2_ref {
        let value = store.prepare(fields::FORCED_CAL, number_value(finite(reference)?))?;
        updates.push((fields::FORCED_CAL, value));
    }
    if let Some(offset) = command.temp_offset {
        let value = store.prepare(fields::TEMP_OFFSET, number_value(finite(offset)?))?;
        updates.push((fields::TEMP_OFFSET, value));
    }
    if let Some(pressure) = command.pressure {
        let value = store.prepare(fields::PRESSURE, pressure_value(pressure)?)?;
        updates.push((fields::PRESSURE, value));
    }

    for (field, value) in updates {
        info!("Updating expected {} to {}", field, value);
        store.set(field, value)?;
    }

    Ok(())
}

fn finite(n: f64) -> Result<f64, CommandError> {
    if n.is_finite() { Ok(n) } else { Err(CommandError::InvalidNumber) }
}

/// Pressure from either route: rounded half to even before storing.
fn pressure_value(pressure: f64) -> Result<Value, CommandError> {
    Ok(number_value(round_half_even(finite(pressure)?)))
}

/// Integral numbers become integers so they can land in integer fields.
fn number_value(n: f64) -> Value {
    let integral = n == n as i64 as f64;
    if integral && n >= i32::MIN as f64 && n <= i32::MAX as f64 {
        Value::I32(n as i32)
    } else if integral && n >= 0.0 && n <= u32::MAX as f64 {
        Value::U32(n as u32)
    } else {
        Value::F32(n as f32)
    }
}

/// Round to nearest, ties to even.
fn round_half_even(n: f64) -> f64 {
    let lower = floor(n);
    let diff = n - lower;
    if diff > 0.5 {
        lower + 1.0
    } else if diff < 0.5 {
        lower
    } else if lower % 2.0 == 0.0 {
        lower
    } else {
        lower + 1.0
    }
}

fn floor(n: f64) -> f64 {
    let truncated = n as i64 as f64;
    if truncated > n { truncated - 1.0 } else { truncated }
}
