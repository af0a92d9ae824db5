//! MQTT client abstraction.
//!
//! The node cycle and the session talk to these traits only. The firmware
//! implements them over rust-mqtt and the simulator over a loopback broker.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Debug;

/// Outbound half of the broker connection.
///
/// Everything the node sends (sensor state, number state, discovery
/// documents) must still be there when Home Assistant connects after the
/// node went back to sleep, so implementations publish each message
/// retained at QoS 1.
#[allow(async_fn_in_trait)]
pub trait StatePublisher {
    type Error: Debug;

    async fn publish_retained(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;
}

/// A message received on a subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: &str, payload: &[u8]) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Full client lifecycle on top of publishing.
#[allow(async_fn_in_trait)]
pub trait PubSubClient: StatePublisher {
    async fn connect(&mut self) -> Result<(), Self::Error>;

    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    fn is_connected(&self) -> bool;

    async fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;

    /// Service the connection once and return the next pending message, or
    /// `None` when nothing arrived within the client's receive window.
    async fn poll(&mut self) -> Result<Option<InboundMessage>, Self::Error>;
}
