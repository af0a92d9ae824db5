//! Cycle driver.
//!
//! [`Node`] owns everything that used to be process-wide state: the record
//! store, the sensor facade, the optional network session and the board's
//! peripherals. [`Node::run`] repeats [`Node::run_cycle`] until the process
//! has to end, then hands the platform an [`Exit`].

use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::boot::BootKind;
use crate::config::NodeConfig;
use crate::device::{Device, DeviceError, SensorBank};
use crate::display::{StatusDisplay, StatusScreen};
use crate::fields::{self, Timers, is_due};
use crate::network::{Clock, Router, Uplink};
use crate::power::{self, DeviceMode, PowerControl, RestartReason, SleepDecision, SleepPolicy};
use crate::retained::{RecordStore, RetainedMemory, StoreError};
use crate::settings::{self, Calibration};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Restart requested: {0}")]
    Restart(RestartReason),
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<RestartReason> for NodeError {
    fn from(reason: RestartReason) -> Self {
        NodeError::Restart(reason)
    }
}

impl From<StoreError> for NodeError {
    fn from(e: StoreError) -> Self {
        NodeError::Store(e)
    }
}

/// How the process ends. The platform performs the sleep or reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    DeepSleep(u32),
    Restart(RestartReason),
}

/// The board's peripherals, one accessor per collaborator.
pub trait Board {
    type Sensors: SensorBank;
    type Calibration: Calibration;
    type Display: StatusDisplay;
    type Power: PowerControl;
    type Clock: Clock;

    fn sensors(&mut self) -> &mut Self::Sensors;
    fn calibration(&mut self) -> &mut Self::Calibration;
    fn display(&mut self) -> &mut Self::Display;
    fn power(&mut self) -> &mut Self::Power;
    fn clock(&mut self) -> &mut Self::Clock;
}

/// Mode for this boot, from the attachment signal and the stored timers.
pub fn select_mode<M: RetainedMemory>(
    store: &RecordStore<M>,
    boot: BootKind,
    config: &NodeConfig,
    now: u32,
    attached: bool,
) -> Result<DeviceMode, StoreError> {
    let timers = Timers::load(store)?;
    let upload_due = is_due(now, timers.upload, config.upload_secs);
    let time_sync_due = is_due(now, timers.time_sync, config.time_sync_secs);
    let eligible = power::sampling_only_eligible(config, boot, upload_due, time_sync_due);

    Ok(DeviceMode::select(attached, &SleepPolicy::from(config), eligible))
}

pub struct Node<'c, M, U, B>
where
    M: RetainedMemory,
{
    config: &'c NodeConfig<'c>,
    policy: SleepPolicy,
    store: RecordStore<M>,
    boot: BootKind,
    mode: DeviceMode,
    device: Device,
    router: Router<M>,
    uplink: Option<U>,
    board: B,
    first_cycle: bool,
}

impl<'c, M, U, B> Node<'c, M, U, B>
where
    M: RetainedMemory,
    U: Uplink<M>,
    B: Board,
{
    /// `uplink` is only used in modes that need the network.
    pub fn new(
        config: &'c NodeConfig<'c>,
        store: RecordStore<M>,
        boot: BootKind,
        mode: DeviceMode,
        device: Device,
        uplink: Option<U>,
        board: B,
    ) -> Self {
        let router = Router::for_node(config.pressure_topic, &device.command_topic());
        if mode.uses_network() && uplink.is_none() {
            warn!("No network session for {:?}, uploads disabled", mode);
        }

        Self {
            config,
            policy: SleepPolicy::from(config),
            store,
            boot,
            mode,
            device,
            router,
            uplink,
            board,
            first_cycle: boot.is_cold(),
        }
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    pub fn store(&self) -> &RecordStore<M> {
        &self.store
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn uplink(&self) -> Option<&U> {
        self.uplink.as_ref()
    }

    pub fn into_store(self) -> RecordStore<M> {
        self.store
    }

    /// Run cycles until the node has to deep sleep or restart. A store
    /// error wipes the arena so the next boot starts cold.
    pub async fn run(&mut self) -> Exit {
        info!("Starting {:?} after {:?}", self.mode, self.boot);

        let result = match self.enter().await {
            Ok(()) => self.cycle_until_exit().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(exit) => exit,
            Err(NodeError::Restart(reason)) => {
                error!("Restarting: {}", reason);
                Exit::Restart(reason)
            }
            Err(NodeError::Store(e)) => {
                error!("Retained store failure: {}", e);
                self.store.reset();
                Exit::Restart(RestartReason::StoreFault)
            }
        }
    }

    async fn enter(&mut self) -> Result<(), NodeError> {
        if self.boot.needs_hardware_init() {
            settings::initialize_hardware(&self.store, self.board.calibration()).await?;
        }
        Ok(())
    }

    async fn cycle_until_exit(&mut self) -> Result<Exit, NodeError> {
        loop {
            match self.run_cycle().await? {
                SleepDecision::Nap(secs) => {
                    info!("Light sleep for {} seconds", secs);
                    self.board.power().nap(secs).await;
                }
                SleepDecision::DeepSleep(secs) => {
                    info!("Deep sleep for {} seconds", secs);
                    return Ok(Exit::DeepSleep(secs));
                }
                SleepDecision::Reboot { into } => {
                    info!("Attachment changed, rebooting into {:?}", into);
                    return Ok(Exit::Restart(RestartReason::ModeChange(into)));
                }
            }
        }
    }

    /// One pass: sensors, time sync, upload, settings, display, sleep
    /// decision.
    pub async fn run_cycle(&mut self) -> Result<SleepDecision, NodeError> {
        let first = self.first_cycle;
        let attached = self.mode.is_attached();
        let timers = Timers::load(&self.store)?;

        let readings = self.device.read_sensors(self.board.sensors(), true).await;

        if self.mode.uses_network()
            && let Some(uplink) = self.uplink.as_mut()
        {
            let now = self.board.clock().now();

            if first || is_due(now, timers.time_sync, self.config.time_sync_secs) {
                uplink.connect(&self.router).await?;
                if uplink.sync_time(self.board.clock()).await {
                    self.store.set(fields::TIME_SYNC_TIME, self.board.clock().now())?;
                }
            }

            if first || attached || is_due(now, timers.upload, self.config.upload_secs) {
                uplink.connect(&self.router).await?;

                if let Err(e) = self.device.send_discovery(uplink.client_mut()).await {
                    error!("Discovery publish failed: {:?}", e);
                    return Err(RestartReason::DiscoveryFailed.into());
                }

                uplink.service(&mut self.store, &self.router, attached).await?;

                let published = match self
                    .device
                    .publish_numbers(uplink.client_mut(), &self.store)
                    .await
                {
                    Ok(()) => self.device.publish_sensors(uplink.client_mut()).await,
                    Err(e) => Err(e),
                };
                match published {
                    Ok(()) => {}
                    Err(DeviceError::Store(e)) => return Err(e.into()),
                    Err(e) => {
                        error!("MQTT publish failure: {:?}", e);
                        if attached {
                            uplink.recover(&self.router).await?;
                        }
                    }
                }

                self.store.set(fields::UPLOAD_TIME, self.board.clock().now())?;
            }

            if !attached && uplink.is_connected() {
                uplink.disconnect().await;
            }
        }

        settings::apply_pending(&mut self.store, self.board.calibration()).await?;

        let now = self.board.clock().now();
        if first || !attached || is_due(now, timers.display, self.config.display_refresh_secs) {
            info!("Updating display...");
            let screen = StatusScreen {
                readings,
                attached,
                updated: now,
                uploaded: self.store.get_as(fields::UPLOAD_TIME)?,
                tz_offset_hours: self.config.tz_offset_hours,
            };
            if let Err(e) = self.board.display().show(&screen).await {
                error!("Display refresh failed: {:?}", e);
            }
            self.store.set(fields::DISPLAY_TIME, now)?;
        }

        self.first_cycle = false;

        let observed = self.board.power().attachment_detected();
        Ok(power::decide(self.mode, observed, &self.policy))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boot::{StartCause, open_store};
    use crate::network::{InboundMessage, NetworkSession, RetryPolicy, WirelessLink};
    use crate::retained::Value;
    use crate::settings::Setting;
    use crate::testing::{FakeBoard, FakeClient, FakeDelay, FakeLink, FakePower, FakeTime};
    use embassy_futures::block_on;

    type Arena = [u8; 512];
    type Session = NetworkSession<FakeLink, FakeClient, FakeTime, FakeDelay>;
    type TestNode<'c> = Node<'c, Arena, Session, FakeBoard>;

    const SYNCED: u32 = 1_700_000_000;
    const UID: [u8; 3] = [0xa1, 0xb2, 0xc3];
    const COMMAND_TOPIC: &str = "homeassistant/number/Magtag-a1b2c3/cmd";

    fn session(link: FakeLink) -> Session {
        NetworkSession::new(
            link,
            FakeClient::default(),
            FakeTime::new(Some(SYNCED)),
            FakeDelay::default(),
            RetryPolicy::from(&NodeConfig::default()),
        )
    }

    fn boot<'c>(
        config: &'c NodeConfig<'c>,
        arena: Arena,
        cause: StartCause,
        board: FakeBoard,
        uplink: Option<Session>,
        attached: bool,
    ) -> TestNode<'c> {
        let (store, kind) = open_store(arena, cause, config).unwrap();
        let mode = select_mode(&store, kind, config, board.clock.now(), attached).unwrap();
        let device = Device::new(config, &UID);
        Node::new(config, store, kind, mode, device, uplink, board)
    }

    #[test]
    fn test_cold_boot_runs_every_action_without_hardware_update() {
        let config = NodeConfig::default();
        let board = FakeBoard::new(FakePower::attached(true), 0);
        let mut node = boot(
            &config,
            [0u8; 512],
            StartCause::PowerOn,
            board,
            Some(session(FakeLink::joining_after(1))),
            true,
        );

        assert_eq!(node.mode(), DeviceMode::AttachedFastCycle);
        assert_eq!(node.store().get(fields::PRESSURE), Ok(Value::U32(1000)));
        assert_eq!(node.store().get(fields::TEMP_OFFSET), Ok(Value::F32(1.0)));
        assert_eq!(node.store().get(fields::FORCED_CAL), Ok(Value::I32(-1)));

        block_on(node.enter()).unwrap();
        let decision = block_on(node.run_cycle()).unwrap();

        assert_eq!(decision, SleepDecision::Nap(30));
        let board = node.board();
        assert_eq!(board.calibration.init_calls, 1);
        assert!(board.calibration.applied.is_empty(), "no hardware update on cold boot");
        assert_eq!(board.display.shown.len(), 1);
        assert_eq!(node.store().get(fields::TIME_SYNC_TIME), Ok(Value::U32(SYNCED)));
        assert_eq!(node.store().get(fields::UPLOAD_TIME), Ok(Value::U32(SYNCED)));

        let client = node.uplink().unwrap().client();
        assert_eq!(client.published_on("homeassistant/sensor/Magtag-a1b2c3/state"), 1);
        assert_eq!(client.published_on("homeassistant/number/Magtag-a1b2c3/state"), 1);
        assert!(client.connected, "attached mode stays connected");
    }

    #[test]
    fn test_inbound_reference_applied_once() {
        let config = NodeConfig::default();
        let mut uplink = session(FakeLink::joining_after(1));
        uplink
            .client_mut()
            .inbox
            .push_back(InboundMessage::new(COMMAND_TOPIC, br#"{"CO2 Ref": 450}"#));
        let board = FakeBoard::new(FakePower::attached(true), 0);
        let mut node = boot(&config, [0u8; 512], StartCause::PowerOn, board, Some(uplink), true);

        block_on(node.run_cycle()).unwrap();
        block_on(node.run_cycle()).unwrap();

        assert_eq!(
            node.board().calibration.applied,
            [Setting::CalibrationReference(450)]
        );
        assert_eq!(node.store().get(fields::FORCED_CAL_CURRENT), Ok(Value::I32(450)));
    }

    #[test]
    fn test_detaching_reboots_into_deep_cycle() {
        let config = NodeConfig::default();
        let board = FakeBoard::new(FakePower::scripted(&[true, false]), 0);
        let mut node = boot(
            &config,
            [0u8; 512],
            StartCause::PowerOn,
            board,
            Some(session(FakeLink::joining_after(1))),
            true,
        );

        let exit = block_on(node.run());

        assert_eq!(
            exit,
            Exit::Restart(RestartReason::ModeChange(DeviceMode::UntetheredDeepCycle))
        );
        assert_eq!(node.board().power.naps, [30]);
    }

    #[test]
    fn test_untethered_uploads_then_deep_sleeps_offline() {
        let config = NodeConfig::default();
        let board = FakeBoard::new(FakePower::attached(false), 0);
        let mut node = boot(
            &config,
            [0u8; 512],
            StartCause::PowerOn,
            board,
            Some(session(FakeLink::joining_after(1))),
            false,
        );

        assert_eq!(block_on(node.run()), Exit::DeepSleep(120));

        let session = node.uplink().unwrap();
        assert!(!session.client().connected);
        assert!(!session.link().is_up(), "radio off before deep sleep");
        assert_eq!(session.client().published_on("homeassistant/sensor/Magtag-a1b2c3/state"), 1);
    }

    #[test]
    fn test_timer_wake_skips_network_when_nothing_due() {
        let config = NodeConfig::default();
        let mut warm = RecordStore::create([0u8; 512]);
        fields::initialize(&mut warm, &config).unwrap();
        warm.set(fields::UPLOAD_TIME, SYNCED).unwrap();
        warm.set(fields::TIME_SYNC_TIME, SYNCED).unwrap();

        let board = FakeBoard::new(FakePower::attached(false), SYNCED + 120);
        let mut node = boot(
            &config,
            warm.into_memory(),
            StartCause::SleepTimerWake,
            board,
            Some(session(FakeLink::joining_after(1))),
            false,
        );

        assert_eq!(node.mode(), DeviceMode::UntetheredDeepCycle);
        assert_eq!(block_on(node.run()), Exit::DeepSleep(120));
        assert_eq!(node.uplink().unwrap().link().join_calls, 0);
        assert_eq!(node.board().calibration.init_calls, 0, "nap wake skips hardware init");
        assert_eq!(node.board().display.shown.len(), 1, "untethered always refreshes");
        assert_eq!(node.store().get(fields::DISPLAY_TIME), Ok(Value::U32(SYNCED + 120)));
    }

    #[test]
    fn test_sampling_only_runs_without_network() {
        let config = NodeConfig {
            single_shot_sampling: true,
            ..NodeConfig::default()
        };
        let mut warm = RecordStore::create([0u8; 512]);
        fields::initialize(&mut warm, &config).unwrap();
        warm.set(fields::UPLOAD_TIME, SYNCED).unwrap();
        warm.set(fields::TIME_SYNC_TIME, SYNCED).unwrap();

        let board = FakeBoard::new(FakePower::attached(false), SYNCED + 120);
        let mut node = boot(&config, warm.into_memory(), StartCause::SleepTimerWake, board, None, false);

        assert_eq!(node.mode(), DeviceMode::DeepSamplingOnly);
        assert_eq!(block_on(node.run()), Exit::DeepSleep(120));
        assert_eq!(node.board().sensors.reads, 1);
    }

    #[test]
    fn test_link_failure_requests_restart() {
        let config = NodeConfig::default();
        let board = FakeBoard::new(FakePower::attached(false), 0);
        let mut node = boot(
            &config,
            [0u8; 512],
            StartCause::PowerOn,
            board,
            Some(session(FakeLink::never_joining())),
            false,
        );

        assert_eq!(block_on(node.run()), Exit::Restart(RestartReason::LinkUnavailable));
    }

    #[test]
    fn test_store_fault_wipes_arena() {
        let config = NodeConfig::default();
        let mut partial = RecordStore::create([0u8; 512]);
        partial.add(fields::PRESSURE, crate::retained::TypeTag::U32, 1000u32).unwrap();
        let store = partial;

        let board = FakeBoard::new(FakePower::attached(false), 0);
        let device = Device::new(&config, &UID);
        let mut node: TestNode = Node::new(
            &config,
            store,
            BootKind::WarmResumeFromNap,
            DeviceMode::UntetheredDeepCycle,
            device,
            None,
            board,
        );

        assert_eq!(block_on(node.run()), Exit::Restart(RestartReason::StoreFault));
        assert_eq!(node.store().element_count(), 0, "next boot starts cold");
    }
}
