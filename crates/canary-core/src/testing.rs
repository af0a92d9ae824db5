//! In-memory collaborators for unit tests.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::net::Ipv4Addr;

use embedded_hal_async::delay::DelayNs;

use crate::device::{SensorBank, SensorKind, SensorValues};
use crate::display::{StatusDisplay, StatusScreen};
use crate::network::{Clock, InboundMessage, PubSubClient, StatePublisher, TimeSource, WirelessLink};
use crate::node::Board;
use crate::power::PowerControl;
use crate::settings::{Calibration, Setting};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FakeError;

/// Wi-Fi that associates on the `n`th join call, or never.
#[derive(Debug, Default)]
pub struct FakeLink {
    up: bool,
    joins_needed: Option<u32>,
    pub join_calls: u32,
    pub disable_calls: u32,
    pub ping_ok: bool,
}

impl FakeLink {
    pub fn joining_after(n: u32) -> Self {
        Self {
            joins_needed: Some(n),
            ping_ok: true,
            ..Default::default()
        }
    }

    pub fn never_joining() -> Self {
        Self {
            joins_needed: None,
            ping_ok: true,
            ..Default::default()
        }
    }
}

impl WirelessLink for FakeLink {
    type Error = FakeError;

    async fn enable(&mut self) -> Result<(), FakeError> {
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), FakeError> {
        self.disable_calls += 1;
        self.up = false;
        Ok(())
    }

    async fn join(&mut self) -> Result<(), FakeError> {
        self.join_calls += 1;
        match self.joins_needed {
            Some(n) if self.join_calls >= n => {
                self.up = true;
                Ok(())
            }
            _ => Err(FakeError),
        }
    }

    fn is_up(&self) -> bool {
        self.up
    }

    async fn ping(&mut self, _address: Ipv4Addr) -> bool {
        self.ping_ok
    }
}

/// Broker connection that records everything sent through it.
#[derive(Debug, Default)]
pub struct FakeClient {
    pub connected: bool,
    pub connect_calls: u32,
    pub disconnect_calls: u32,
    pub fail_connect: bool,
    pub fail_poll: bool,
    /// Publishes that succeed before every further one fails.
    pub fail_publish_after: Option<usize>,
    pub subscriptions: Vec<String>,
    pub inbox: VecDeque<InboundMessage>,
    /// Retained publishes as (topic, payload).
    pub published: Vec<(String, Vec<u8>)>,
}

impl FakeClient {
    pub fn connected() -> Self {
        Self {
            connected: true,
            ..Default::default()
        }
    }

    pub fn published_on(&self, topic: &str) -> usize {
        self.published.iter().filter(|(t, ..)| t == topic).count()
    }
}

impl StatePublisher for FakeClient {
    type Error = FakeError;

    async fn publish_retained(&mut self, topic: &str, payload: &[u8]) -> Result<(), FakeError> {
        if self.fail_publish_after.is_some_and(|n| self.published.len() >= n) {
            return Err(FakeError);
        }
        self.published.push((topic.into(), payload.into()));
        Ok(())
    }
}

impl PubSubClient for FakeClient {
    async fn connect(&mut self) -> Result<(), FakeError> {
        if self.fail_connect {
            return Err(FakeError);
        }
        self.connect_calls += 1;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), FakeError> {
        self.disconnect_calls += 1;
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), FakeError> {
        self.subscriptions.push(topic.into());
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, FakeError> {
        if self.fail_poll {
            return Err(FakeError);
        }
        Ok(self.inbox.pop_front())
    }
}

pub struct FakeTime(Option<u32>);

impl FakeTime {
    pub fn new(epoch: Option<u32>) -> Self {
        Self(epoch)
    }
}

impl TimeSource for FakeTime {
    type Error = FakeError;

    async fn fetch_epoch(&mut self) -> Result<u32, FakeError> {
        self.0.ok_or(FakeError)
    }
}

/// Returns immediately, adding up the requested time.
#[derive(Debug, Default)]
pub struct FakeDelay {
    pub total_ms: u32,
}

impl DelayNs for FakeDelay {
    async fn delay_ns(&mut self, ns: u32) {
        self.total_ms += ns / 1_000_000;
    }

    async fn delay_ms(&mut self, ms: u32) {
        self.total_ms += ms;
    }
}

#[derive(Debug, Default)]
pub struct FakeClock(u32);

impl FakeClock {
    pub fn new(epoch: u32) -> Self {
        Self(epoch)
    }

    pub fn advance(&mut self, secs: u32) {
        self.0 += secs;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> u32 {
        self.0
    }

    fn set(&mut self, epoch: u32) {
        self.0 = epoch;
    }
}

pub struct FakeSensors {
    values: SensorValues,
    pub reads: u32,
}

impl FakeSensors {
    pub fn new(co2: f32, temperature: f32, humidity: f32, battery: f32) -> Self {
        Self {
            values: SensorValues::default()
                .with(SensorKind::Co2, co2)
                .with(SensorKind::Temperature, temperature)
                .with(SensorKind::Humidity, humidity)
                .with(SensorKind::Battery, battery),
            reads: 0,
        }
    }

    pub fn set(&mut self, kind: SensorKind, value: f32) {
        self.values.set(kind, Some(value));
    }

    pub fn fail(&mut self, kind: SensorKind) {
        self.values.set(kind, None);
    }
}

impl SensorBank for FakeSensors {
    async fn read(&mut self) -> SensorValues {
        self.reads += 1;
        self.values
    }
}

#[derive(Debug, Default)]
pub struct FakeCalibration {
    pub fail: bool,
    pub applied: Vec<Setting>,
    pub initialized: Option<(u32, f32)>,
    pub init_calls: u32,
}

impl Calibration for FakeCalibration {
    type Error = FakeError;

    async fn initialize(&mut self, pressure: u32, temp_offset: f32) -> Result<(), FakeError> {
        self.init_calls += 1;
        self.initialized = Some((pressure, temp_offset));
        Ok(())
    }

    async fn apply(&mut self, setting: Setting) -> Result<(), FakeError> {
        if self.fail {
            return Err(FakeError);
        }
        self.applied.push(setting);
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeDisplay {
    pub shown: Vec<StatusScreen>,
}

impl StatusDisplay for FakeDisplay {
    type Error = FakeError;

    async fn show(&mut self, screen: &StatusScreen) -> Result<(), FakeError> {
        self.shown.push(*screen);
        Ok(())
    }
}

/// Attachment signal played back from a script; the last value repeats.
#[derive(Debug, Default)]
pub struct FakePower {
    script: VecDeque<bool>,
    attached: bool,
    pub naps: Vec<u32>,
}

impl FakePower {
    pub fn attached(attached: bool) -> Self {
        Self {
            attached,
            ..Default::default()
        }
    }

    pub fn scripted(script: &[bool]) -> Self {
        let mut script: VecDeque<bool> = script.iter().copied().collect();
        let attached = script.pop_front().unwrap_or(false);
        Self {
            script,
            attached,
            naps: Vec::new(),
        }
    }
}

impl PowerControl for FakePower {
    fn attachment_detected(&mut self) -> bool {
        let current = self.attached;
        if let Some(next) = self.script.pop_front() {
            self.attached = next;
        }
        current
    }

    async fn nap(&mut self, secs: u32) {
        self.naps.push(secs);
    }
}

pub struct FakeBoard {
    pub sensors: FakeSensors,
    pub calibration: FakeCalibration,
    pub display: FakeDisplay,
    pub power: FakePower,
    pub clock: FakeClock,
}

impl FakeBoard {
    pub fn new(power: FakePower, now: u32) -> Self {
        Self {
            sensors: FakeSensors::new(612.0, 22.4, 45.0, 3.91),
            calibration: FakeCalibration::default(),
            display: FakeDisplay::default(),
            power,
            clock: FakeClock::new(now),
        }
    }
}

impl Board for FakeBoard {
    type Sensors = FakeSensors;
    type Calibration = FakeCalibration;
    type Display = FakeDisplay;
    type Power = FakePower;
    type Clock = FakeClock;

    fn sensors(&mut self) -> &mut FakeSensors {
        &mut self.sensors
    }

    fn calibration(&mut self) -> &mut FakeCalibration {
        &mut self.calibration
    }

    fn display(&mut self) -> &mut FakeDisplay {
        &mut self.display
    }

    fn power(&mut self) -> &mut FakePower {
        &mut self.power
    }

    fn clock(&mut self) -> &mut FakeClock {
        &mut self.clock
    }
}
