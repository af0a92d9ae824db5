//! Wi-Fi station link over esp-radio and embassy-net.

use core::net::Ipv4Addr;

use canary_core::network::WirelessLink;
use embassy_executor::{SpawnError, Spawner};
use embassy_net::icmp::PacketMetadata;
use embassy_net::icmp::ping::{PingManager, PingParams};
use embassy_net::{Config as NetConfig, Runner, Stack, StackResources};
use embassy_time::{Duration, WithTimeout};
use esp_radio::wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiError};
use log::{info, warn};
use static_cell::StaticCell;
use thiserror_no_std::Error;

/// DHCP, DNS, MQTT (TCP), SNTP (UDP) and the ICMP ping.
const SOCKETS: usize = 6;
const DHCP_TIMEOUT: Duration = Duration::from_secs(15);
const PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Radio initialization failed")]
    RadioInit,
    #[error("Wi-Fi driver error: {0:?}")]
    Wifi(WifiError),
    #[error("Timed out waiting for a DHCP lease")]
    DhcpTimeout,
    #[error("Could not spawn the network task")]
    Spawn,
}

impl From<WifiError> for LinkError {
    fn from(e: WifiError) -> Self {
        LinkError::Wifi(e)
    }
}

impl From<SpawnError> for LinkError {
    fn from(_: SpawnError) -> Self {
        LinkError::Spawn
    }
}

pub struct EspWifiLink {
    controller: WifiController<'static>,
    stack: Stack<'static>,
    credentials: ClientConfig,
}

impl EspWifiLink {
    /// Bring up the radio driver and the IP stack (radio still off) and
    /// spawn the stack's runner. Returns the link and a stack handle for the
    /// MQTT and SNTP sockets.
    pub fn new(
        spawner: &Spawner,
        wifi: esp_hal::peripherals::WIFI<'static>,
        ssid: &str,
        password: &str,
        seed: u64,
    ) -> Result<(Self, Stack<'static>), LinkError> {
        static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
        static RESOURCES: StaticCell<StackResources<SOCKETS>> = StaticCell::new();

        let radio = esp_radio::init().map_err(|e| {
            warn!("esp_radio init failed: {:?}", e);
            LinkError::RadioInit
        })?;
        let radio = RADIO.init(radio);

        let (controller, interfaces) = esp_radio::wifi::new(radio, wifi, Default::default())?;
        let (stack, runner) = embassy_net::new(
            interfaces.sta,
            NetConfig::dhcpv4(Default::default()),
            RESOURCES.init(StackResources::new()),
            seed,
        );
        spawner.spawn(net_task(runner))?;

        let credentials = ClientConfig::default()
            .with_ssid(ssid.into())
            .with_password(password.into());

        Ok((
            Self {
                controller,
                stack,
                credentials,
            },
            stack,
        ))
    }
}

impl WirelessLink for EspWifiLink {
    type Error = LinkError;

    async fn enable(&mut self) -> Result<(), LinkError> {
        if self.controller.is_started().unwrap_or(false) {
            return Ok(());
        }
        self.controller
            .set_config(&ModeConfig::Client(self.credentials.clone()))?;
        self.controller.start_async().await?;
        info!("wifi: started STA mode");
        Ok(())
    }

    async fn disable(&mut self) -> Result<(), LinkError> {
        if self.controller.is_connected().unwrap_or(false) {
            self.controller.disconnect_async().await?;
        }
        self.controller.stop_async().await?;
        info!("wifi: radio off");
        Ok(())
    }

    async fn join(&mut self) -> Result<(), LinkError> {
        self.controller.connect_async().await?;

        match self.stack.wait_config_up().with_timeout(DHCP_TIMEOUT).await {
            Ok(()) => {
                if let Some(config) = self.stack.config_v4() {
                    info!("wifi: DHCP assigned {}", config.address);
                }
                Ok(())
            }
            Err(_) => {
                warn!("wifi: DHCP timeout");
                let _ = self.controller.disconnect_async().await;
                Err(LinkError::DhcpTimeout)
            }
        }
    }

    fn is_up(&self) -> bool {
        matches!(self.controller.is_connected(), Ok(true))
            && self.stack.is_link_up()
            && self.stack.config_v4().is_some()
    }

    async fn ping(&mut self, address: Ipv4Addr) -> bool {
        let mut rx_buffer = [0u8; 128];
        let mut tx_buffer = [0u8; 128];
        let mut rx_meta = [PacketMetadata::EMPTY; 1];
        let mut tx_meta = [PacketMetadata::EMPTY; 1];

        let mut manager = PingManager::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        let mut params = PingParams::new(address);
        params
            .set_payload(b"canary")
            .set_count(1)
            .set_timeout(PING_TIMEOUT);

        match manager.ping(&params).await {
            Ok(_) => true,
            Err(e) => {
                warn!("ping {} failed: {:?}", address, e);
                false
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) -> ! {
    runner.run().await
}
