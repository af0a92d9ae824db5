#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

extern crate alloc;

use alloc::boxed::Box;
use alloc::string::String;

use canary_core::boot;
use canary_core::config::NodeConfig;
use canary_core::device::Device;
use canary_core::network::{Clock, NetworkSession, RetryPolicy};
use canary_core::node::{self, Exit, Node};
use canary_core::power::{DeviceMode, PowerControl};
use canary_core::retained::StoreError;
use canary_firmware::board::CanaryBoard;
use canary_firmware::clock::{self, RtcClock};
use canary_firmware::i2c_bus::{self, SharedI2c};
use canary_firmware::mqtt::{BrokerClient, BrokerConfig, Buffers};
use canary_firmware::panel::{self, PanelError, PanelPins};
use canary_firmware::power::{self, BoardPower};
use canary_firmware::reset;
use canary_firmware::retained::RtcArena;
use canary_firmware::secrets;
use canary_firmware::sensors::{Battery, Scd41, Sensors, Sht40};
use canary_firmware::sntp::{self, SntpTime};
use canary_firmware::wifi::EspWifiLink;
use embassy_executor::Spawner;
use esp_hal::analog::adc::{Adc, AdcConfig, Attenuation};
use esp_hal::clock::CpuClock;
use esp_hal::efuse::Efuse;
use esp_hal::gpio::{Input, InputConfig, Pull};
use esp_hal::peripherals::{Peripherals, WIFI};
use esp_hal::rtc_cntl::Rtc;
use esp_hal::timer::timg::TimerGroup;
use log::{error, info, warn};
use thiserror_no_std::Error;

type Session = NetworkSession<EspWifiLink, BrokerClient, SntpTime, embassy_time::Delay>;

#[derive(Error, Debug)]
enum StartupError {
    #[error("Retained arena already taken")]
    Arena,
    #[error("RTC controller already taken")]
    Rtc,
    #[error("Retained store: {0}")]
    Store(StoreError),
    #[error("I2C bus setup failed")]
    I2c,
    #[error("Display: {0}")]
    Panel(PanelError),
}

impl From<StoreError> for StartupError {
    fn from(e: StoreError) -> Self {
        StartupError::Store(e)
    }
}

impl From<PanelError> for StartupError {
    fn from(e: PanelError) -> Self {
        StartupError::Panel(e)
    }
}

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    power::restart()
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 73744);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let config = NodeConfig::default();
    match run(&spawner, peripherals, &config).await {
        Ok(Exit::DeepSleep(secs)) => power::deep_sleep(secs),
        Ok(Exit::Restart(reason)) => {
            info!("Restart requested: {}", reason);
            power::restart()
        }
        Err(e) => {
            error!("Startup failed: {}", e);
            power::deep_sleep(config.deep_sleep_secs)
        }
    }
}

async fn run(
    spawner: &Spawner,
    peripherals: Peripherals,
    config: &NodeConfig<'static>,
) -> Result<Exit, StartupError> {
    let cause = reset::start_cause();
    let arena = RtcArena::take().ok_or(StartupError::Arena)?;
    let (store, boot) = boot::open_store(arena, cause, config)?;

    let rtc = clock::share(Rtc::new(peripherals.LPWR)).ok_or(StartupError::Rtc)?;
    let clock = RtcClock::new(rtc);
    let vbus = Input::new(peripherals.GPIO2, InputConfig::default().with_pull(Pull::Down));
    let mut power = BoardPower::new(vbus, rtc);
    let mode = node::select_mode(&store, boot, config, clock.now(), power.attachment_detected())?;

    let bus = i2c_bus::init(peripherals.I2C0, peripherals.GPIO3, peripherals.GPIO4).map_err(|e| {
        error!("I2C config rejected: {:?}", e);
        StartupError::I2c
    })?;

    let mut adc_config = AdcConfig::new();
    let battery_pin = adc_config.enable_pin(peripherals.GPIO1, Attenuation::_11dB);
    let battery = Battery::new(Adc::new(peripherals.ADC1, adc_config), battery_pin);

    let sensors = Sensors::new(
        Scd41::new(SharedI2c::new(bus)),
        Sht40::new(SharedI2c::new(bus)),
        battery,
    );
    let panel = panel::init(PanelPins {
        spi: peripherals.SPI2,
        sck: peripherals.GPIO36,
        mosi: peripherals.GPIO37,
        cs: peripherals.GPIO35,
        dc: peripherals.GPIO34,
    })?;

    let uid = Efuse::mac_address();
    let device = Device::new(config, &uid);
    info!("Device id {}", device.device_id());

    let uplink = if mode.uses_network() {
        let seed = uid
            .iter()
            .fold(u64::from(clock.now()), |acc, b| acc.rotate_left(8) ^ u64::from(*b));
        build_uplink(spawner, peripherals.WIFI, config, &device, mode, seed)
    } else {
        info!("Sampling only, network stays off");
        None
    };

    let board = CanaryBoard {
        sensors,
        panel,
        power,
        clock,
    };

    let mut node = Node::new(config, store, boot, mode, device, uplink, board);
    Ok(node.run().await)
}

/// Radio driver, IP stack, broker client and SNTP. `None` (uploads off) when
/// credentials are missing or the radio fails to come up.
fn build_uplink(
    spawner: &Spawner,
    wifi: WIFI<'static>,
    config: &NodeConfig,
    device: &Device,
    mode: DeviceMode,
    seed: u64,
) -> Option<Session> {
    if !secrets::network_configured() {
        warn!("No Wi-Fi/MQTT credentials compiled in; set them in .env");
        return None;
    }

    let (link, stack) =
        match EspWifiLink::new(spawner, wifi, secrets::WIFI_SSID, secrets::WIFI_PASSWORD, seed) {
            Ok(parts) => parts,
            Err(e) => {
                error!("Network setup failed: {}", e);
                return None;
            }
        };

    let buffers = Buffers::take()?;
    let client_id: &'static str = Box::leak(String::from(device.device_id()).into_boxed_str());
    let client = BrokerClient::new(
        spawner,
        stack,
        BrokerConfig {
            host: secrets::MQTT_HOST,
            port: secrets::mqtt_port(),
            client_id,
            username: secrets::MQTT_USERNAME,
            password: secrets::MQTT_PASSWORD,
            keep_alive_secs: config.keep_alive_secs(mode.is_attached()),
        },
        buffers,
    );
    let client = match client {
        Ok(client) => client,
        Err(e) => {
            error!("Could not spawn the broker task: {:?}", e);
            return None;
        }
    };
    let time = SntpTime::new(stack, sntp::DEFAULT_SERVER);

    Some(NetworkSession::new(
        link,
        client,
        time,
        embassy_time::Delay,
        RetryPolicy::from(config),
    ))
}
