//! Simulated board, network and broker.
//!
//! Everything shares one [`World`]: the true wall-clock time, the board's
//! RTC, the USB and Wi-Fi switches the user flips from the keyboard, the
//! broker's retained topics and the SDL window.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use canary_core::device::sensor::battery_report;
use canary_core::device::{SensorBank, SensorKind, SensorValues};
use canary_core::display::{DISPLAY_HEIGHT_PX, DISPLAY_WIDTH_PX, StatusDisplay, StatusScreen};
use canary_core::network::{
    Clock, InboundMessage, PubSubClient, StatePublisher, TimeSource, WirelessLink,
};
use canary_core::node::Board;
use canary_core::power::PowerControl;
use canary_core::settings::{Calibration, Setting};
use embedded_graphics::pixelcolor::Rgb565;
use embedded_graphics::prelude::*;
use embedded_graphics_simulator::{
    OutputSettingsBuilder, SimulatorDisplay, SimulatorEvent, Window, sdl2::Keycode,
};
use embedded_hal_async::delay::DelayNs;
use log::{info, warn};

/// Simulated seconds per real second.
const TIME_SCALE: f64 = 30.0;
const WINDOW_SCALE: u32 = 2;
const FRAME_DURATION: Duration = Duration::from_millis(33);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimError {
    NoAccessPoint,
    BrokerUnreachable,
    NotConnected,
}

pub type Shared = Rc<RefCell<World>>;

pub struct World {
    /// What an NTP server would say.
    pub true_time: u32,
    /// The board's RTC; zero after power loss until synced.
    pub rtc_time: u32,
    pub attached: bool,
    pub wifi_available: bool,
    pub quit: bool,
    pressure_topic: String,
    command_topic: String,
    inbox: VecDeque<InboundMessage>,
    retained: BTreeMap<String, Vec<u8>>,
    display: SimulatorDisplay<Rgb565>,
    window: Window,
}

impl World {
    pub fn new(pressure_topic: &str, command_topic: &str) -> Shared {
        let mut display = SimulatorDisplay::<Rgb565>::new(Size::new(
            DISPLAY_WIDTH_PX,
            DISPLAY_HEIGHT_PX,
        ));
        let output_settings = OutputSettingsBuilder::new().scale(WINDOW_SCALE).build();
        let mut window = Window::new("Canary Simulator", &output_settings);

        // The SDL window must be updated once before `events()` is called.
        let _ = display.clear(Rgb565::WHITE);
        window.update(&display);

        let true_time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;

        Rc::new(RefCell::new(Self {
            true_time,
            rtc_time: 0,
            attached: true,
            wifi_available: true,
            quit: false,
            pressure_topic: pressure_topic.into(),
            command_topic: command_topic.into(),
            inbox: VecDeque::new(),
            retained: BTreeMap::new(),
            display,
            window,
        }))
    }

    pub fn power_on(&mut self) {
        self.rtc_time = 0;
    }

    /// Let `secs` of simulated time pass, keeping the window responsive.
    pub fn pass(&mut self, secs: u32) {
        let end = Instant::now() + Duration::from_secs_f64(secs as f64 / TIME_SCALE);
        while Instant::now() < end && !self.quit {
            self.pump();
            std::thread::sleep(FRAME_DURATION);
        }
        self.true_time += secs;
        self.rtc_time += secs;
    }

    pub fn retained_topics(&self) -> usize {
        self.retained.len()
    }

    fn pump(&mut self) {
        let events: Vec<SimulatorEvent> = self.window.events().collect();
        for event in events {
            match event {
                SimulatorEvent::Quit => self.quit = true,
                SimulatorEvent::KeyDown { keycode, .. } => self.on_key(keycode),
                _ => {}
            }
        }
    }

    fn on_key(&mut self, keycode: Keycode) {
        match keycode {
            Keycode::Q | Keycode::Escape => self.quit = true,
            Keycode::U => {
                self.attached = !self.attached;
                info!("USB {}", if self.attached { "attached" } else { "detached" });
            }
            Keycode::W => {
                self.wifi_available = !self.wifi_available;
                info!("Access point {}", if self.wifi_available { "up" } else { "down" });
            }
            Keycode::C => self.send(self.command_topic.clone(), br#"{"CO2 Ref": 450}"#),
            Keycode::T => self.send(self.command_topic.clone(), br#"{"Temp Offset": 2.5}"#),
            Keycode::P => self.send(self.pressure_topic.clone(), b"1013.25"),
            _ => {}
        }
    }

    fn send(&mut self, topic: String, payload: &[u8]) {
        info!("Hub -> {}: {}", topic, String::from_utf8_lossy(payload));
        self.inbox.push_back(InboundMessage::new(&topic, payload));
    }

    fn render(&mut self, screen: &StatusScreen) {
        let Ok(()) = screen.draw(&mut self.display);
        self.window.update(&self.display);
    }
}

pub struct SimLink {
    world: Shared,
    up: bool,
}

impl SimLink {
    pub fn new(world: Shared) -> Self {
        Self { world, up: false }
    }
}

impl WirelessLink for SimLink {
    type Error = SimError;

    async fn enable(&mut self) -> Result<(), SimError> {
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), SimError> {
        self.up = false;
        Ok(())
    }

    async fn join(&mut self) -> Result<(), SimError> {
        if !self.world.borrow().wifi_available {
            return Err(SimError::NoAccessPoint);
        }
        self.up = true;
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.up && self.world.borrow().wifi_available
    }

    async fn ping(&mut self, _address: Ipv4Addr) -> bool {
        self.world.borrow().wifi_available
    }
}

/// Broker client wired straight into the world's retained topics and inbox.
pub struct LoopbackBroker {
    world: Shared,
    connected: bool,
    subscriptions: Vec<String>,
}

impl LoopbackBroker {
    pub fn new(world: Shared) -> Self {
        Self {
            world,
            connected: false,
            subscriptions: Vec::new(),
        }
    }

    fn ensure_connected(&mut self) -> Result<(), SimError> {
        if self.connected && !self.world.borrow().wifi_available {
            self.connected = false;
        }
        if self.connected {
            Ok(())
        } else {
            Err(SimError::NotConnected)
        }
    }
}

impl StatePublisher for LoopbackBroker {
    type Error = SimError;

    async fn publish_retained(&mut self, topic: &str, payload: &[u8]) -> Result<(), SimError> {
        self.ensure_connected()?;
        info!("Node -> {}: {}", topic, String::from_utf8_lossy(payload));
        self.world
            .borrow_mut()
            .retained
            .insert(topic.into(), payload.into());
        Ok(())
    }
}

impl PubSubClient for LoopbackBroker {
    async fn connect(&mut self) -> Result<(), SimError> {
        if !self.world.borrow().wifi_available {
            return Err(SimError::BrokerUnreachable);
        }
        self.connected = true;
        self.subscriptions.clear();
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), SimError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), SimError> {
        self.ensure_connected()?;
        self.subscriptions.push(topic.into());
        Ok(())
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, SimError> {
        self.ensure_connected()?;
        let mut world = self.world.borrow_mut();
        while let Some(message) = world.inbox.pop_front() {
            if self.subscriptions.contains(&message.topic) {
                return Ok(Some(message));
            }
            warn!("Dropping message on unsubscribed topic {}", message.topic);
        }
        Ok(None)
    }
}

pub struct NetTime(pub Shared);

impl TimeSource for NetTime {
    type Error = SimError;

    async fn fetch_epoch(&mut self) -> Result<u32, SimError> {
        let world = self.0.borrow();
        if world.wifi_available {
            Ok(world.true_time)
        } else {
            Err(SimError::NoAccessPoint)
        }
    }
}

/// Retry delays return immediately.
pub struct SimDelay;

impl DelayNs for SimDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

pub struct SimSensors(Shared);

impl SensorBank for SimSensors {
    async fn read(&mut self) -> SensorValues {
        let world = self.0.borrow();
        let t = world.true_time as f64;

        let co2 = 600.0 + 200.0 * (t / 3_000.0).sin() + 30.0 * (t / 410.0).cos();
        let temperature = 23.0 + 3.0 * (t / 1_200.0).sin() + 0.5 * (t / 370.0).cos();
        let humidity = 50.0 + 10.0 * (t / 1_800.0).sin() + 2.0 * (t / 230.0).cos();
        let battery = if world.attached { 4.95 } else { 3.9 };

        SensorValues::default()
            .with(SensorKind::Co2, co2 as f32)
            .with(SensorKind::Temperature, temperature as f32)
            .with(SensorKind::Humidity, humidity as f32)
            .with(SensorKind::Battery, battery_report(battery))
    }
}

pub struct SimCalibration;

impl Calibration for SimCalibration {
    type Error = SimError;

    async fn initialize(&mut self, pressure: u32, temp_offset: f32) -> Result<(), SimError> {
        info!("CO2 sensor: pressure {} mbar, temp offset {} C", pressure, temp_offset);
        Ok(())
    }

    async fn apply(&mut self, setting: Setting) -> Result<(), SimError> {
        info!("CO2 sensor: {}", setting);
        Ok(())
    }
}

pub struct SimPanel(Shared);

impl StatusDisplay for SimPanel {
    type Error = SimError;

    async fn show(&mut self, screen: &StatusScreen) -> Result<(), SimError> {
        self.0.borrow_mut().render(screen);
        Ok(())
    }
}

pub struct SimPower(Shared);

impl PowerControl for SimPower {
    /// Quitting reads as a detach so an attached node winds down.
    fn attachment_detected(&mut self) -> bool {
        let world = self.0.borrow();
        world.attached && !world.quit
    }

    async fn nap(&mut self, secs: u32) {
        self.0.borrow_mut().pass(secs);
    }
}

pub struct SimClock(Shared);

impl Clock for SimClock {
    fn now(&self) -> u32 {
        self.0.borrow().rtc_time
    }

    fn set(&mut self, epoch: u32) {
        self.0.borrow_mut().rtc_time = epoch;
    }
}

pub struct SimBoard {
    sensors: SimSensors,
    calibration: SimCalibration,
    panel: SimPanel,
    power: SimPower,
    clock: SimClock,
}

impl SimBoard {
    pub fn new(world: &Shared) -> Self {
        Self {
            sensors: SimSensors(world.clone()),
            calibration: SimCalibration,
            panel: SimPanel(world.clone()),
            power: SimPower(world.clone()),
            clock: SimClock(world.clone()),
        }
    }
}

impl Board for SimBoard {
    type Sensors = SimSensors;
    type Calibration = SimCalibration;
    type Display = SimPanel;
    type Power = SimPower;
    type Clock = SimClock;

    fn sensors(&mut self) -> &mut SimSensors {
        &mut self.sensors
    }

    fn calibration(&mut self) -> &mut SimCalibration {
        &mut self.calibration
    }

    fn display(&mut self) -> &mut SimPanel {
        &mut self.panel
    }

    fn power(&mut self) -> &mut SimPower {
        &mut self.power
    }

    fn clock(&mut self) -> &mut SimClock {
        &mut self.clock
    }
}
