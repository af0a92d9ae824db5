//! [`TimeSource`] that asks an NTP server over UDP.

use canary_core::network::TimeSource;
use canary_core::network::sntp::{self, NTP_PORT, PACKET_LEN};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, with_timeout};
use log::{info, warn};
use thiserror_no_std::Error;

pub const DEFAULT_SERVER: &str = "pool.ntp.org";
const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SntpError {
    #[error("Could not resolve NTP server")]
    Dns,
    #[error("UDP socket error")]
    Socket,
    #[error("No reply within the timeout")]
    Timeout,
    #[error("Reply was not a valid server response")]
    InvalidReply,
}

pub struct SntpTime {
    stack: Stack<'static>,
    server: &'static str,
}

impl SntpTime {
    pub fn new(stack: Stack<'static>, server: &'static str) -> Self {
        Self { stack, server }
    }
}

impl TimeSource for SntpTime {
    type Error = SntpError;

    async fn fetch_epoch(&mut self) -> Result<u32, SntpError> {
        let addresses = self
            .stack
            .dns_query(self.server, DnsQueryType::A)
            .await
            .map_err(|e| {
                warn!("sntp: DNS lookup of {} failed: {:?}", self.server, e);
                SntpError::Dns
            })?;
        let server = *addresses.first().ok_or(SntpError::Dns)?;

        let mut rx_meta = [PacketMetadata::EMPTY; 2];
        let mut tx_meta = [PacketMetadata::EMPTY; 2];
        let mut rx_buffer = [0u8; 2 * PACKET_LEN];
        let mut tx_buffer = [0u8; 2 * PACKET_LEN];
        let mut socket = UdpSocket::new(
            self.stack,
            &mut rx_meta,
            &mut rx_buffer,
            &mut tx_meta,
            &mut tx_buffer,
        );
        socket.bind(0).map_err(|_| SntpError::Socket)?;

        socket
            .send_to(&sntp::request(), IpEndpoint::new(server, NTP_PORT))
            .await
            .map_err(|_| SntpError::Socket)?;

        let mut reply = [0u8; PACKET_LEN];
        let (len, _) = with_timeout(REPLY_TIMEOUT, socket.recv_from(&mut reply))
            .await
            .map_err(|_| SntpError::Timeout)?
            .map_err(|_| SntpError::Socket)?;

        let epoch = sntp::parse_reply(&reply[..len]).ok_or(SntpError::InvalidReply)?;
        info!("sntp: {} says {}", self.server, epoch);
        Ok(epoch)
    }
}
