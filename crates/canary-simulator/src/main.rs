//! Desktop simulator for the canary CO2 sensor node.
//!
//! Runs the real node cycle from canary-core against simulated sensors, a
//! loopback broker and a retained arena that survives simulated deep sleeps
//! and restarts. The status screen is drawn in an SDL2 window via
//! `embedded-graphics-simulator`. Time runs 30x faster than real time.
//!
//! Pass a JSON file as the first argument to override `NodeConfig` fields.
//!
//! # Key bindings
//!
//! | Key | Action                                   |
//! |-----|------------------------------------------|
//! | U   | Toggle USB attachment                    |
//! | W   | Toggle the Wi-Fi access point            |
//! | C   | Hub sends `{"CO2 Ref": 450}`             |
//! | T   | Hub sends `{"Temp Offset": 2.5}`         |
//! | P   | Hub publishes 1013.25 on the pressure topic |
//! | Q   | Quit                                     |

mod sim;

use canary_core::boot::{self, StartCause};
use canary_core::config::NodeConfig;
use canary_core::device::Device;
use canary_core::network::{NetworkSession, RetryPolicy};
use canary_core::node::{self, Exit, Node};
use canary_core::retained::ARENA_SIZE;
use embassy_futures::block_on;
use log::{error, info};

use sim::{LoopbackBroker, NetTime, SimBoard, SimDelay, SimLink, World};

/// Same size as the firmware's RTC arena.

const UID: [u8; 6] = [0x7c, 0xdf, 0xa1, 0x0b, 0x2c, 0x3d];

fn load_config(text: Option<&str>) -> NodeConfig<'_> {
    let Some(text) = text else {
        return NodeConfig::default();
    };
    match serde_json::from_str(text) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid config, using defaults: {}", e);
            NodeConfig::default()
        }
    }
}

fn main() {
    env_logger::init();

    let config_text = std::env::args().nth(1).and_then(|path| {
        std::fs::read_to_string(&path)
            .inspect_err(|e| error!("Cannot read {}: {}", path, e))
            .ok()
    });
    let config = load_config(config_text.as_deref());

    info!("Starting canary simulator");
    info!("Keys: U=USB  W=Wi-Fi  C=CO2 Ref  T=Temp Offset  P=Pressure  Q=Quit");

    let command_topic = Device::new(&config, &UID).command_topic();
    let world = World::new(config.pressure_topic, &command_topic);

    let mut arena = [0u8; ARENA_SIZE];
    let mut cause = StartCause::PowerOn;
    let mut boots = 0u32;

    while !world.borrow().quit {
        boots += 1;
        if cause == StartCause::PowerOn {
            world.borrow_mut().power_on();
        }

        let (store, kind) = match boot::open_store(&mut arena, cause, &config) {
            Ok(opened) => opened,
            Err(e) => {
                error!("Cannot initialize the retained store: {}", e);
                break;
            }
        };

        let (now, attached) = {
            let world = world.borrow();
            (world.rtc_time, world.attached)
        };
        let mode = match node::select_mode(&store, kind, &config, now, attached) {
            Ok(mode) => mode,
            Err(e) => {
                error!("Retained store unreadable: {}", e);
                break;
            }
        };
        info!("Boot {} ({:?}) in {:?}", boots, cause, mode);

        let uplink = mode.uses_network().then(|| {
            NetworkSession::new(
                SimLink::new(world.clone()),
                LoopbackBroker::new(world.clone()),
                NetTime(world.clone()),
                SimDelay,
                RetryPolicy::from(&config),
            )
        });

        let mut node = Node::new(
            &config,
            store,
            kind,
            mode,
            Device::new(&config, &UID),
            uplink,
            SimBoard::new(&world),
        );
        let exit = block_on(node.run());
        drop(node);

        cause = match exit {
            Exit::DeepSleep(secs) => {
                info!("Deep sleep for {} s", secs);
                world.borrow_mut().pass(secs);
                StartCause::SleepTimerWake
            }
            Exit::Restart(reason) => {
                info!("Restart: {}", reason);
                StartCause::SoftwareRestart
            }
        };
    }

    info!(
        "Simulator exiting after {} boots, {} retained topics on the broker",
        boots,
        world.borrow().retained_topics()
    );
}
