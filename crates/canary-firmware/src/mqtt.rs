//! [`PubSubClient`] over rust-mqtt (MQTT v5) and an embassy-net TCP socket.
//!
//! The socket and the rust-mqtt client borrow their buffers, so they live in
//! a dedicated task that owns those buffers. Each connection is a scope in
//! that task: the socket and client are built over the buffers on connect and
//! dropped before the next connect borrows them again. [`BrokerClient`] is the
//! node's handle and forwards every call to the task over a pair of channels.

use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::net::Ipv4Addr;

use canary_core::network::{InboundMessage, PubSubClient, StatePublisher};
use embassy_executor::{SpawnError, Spawner};
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::{ConnectError, TcpSocket};
use embassy_net::{IpAddress, Stack};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};
use embedded_io_async::{ErrorType, Read, Write};
use log::{debug, error, info};
use rust_mqtt::client::client::MqttClient;
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
use rust_mqtt::utils::rng_generator::CountingRng;
use static_cell::StaticCell;
use thiserror_no_std::Error;

const TCP_BUFFER: usize = 1536;
const PACKET_BUFFER: usize = 1024;
const MAX_PROPERTIES: usize = 5;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);
/// How long `poll` waits for the first byte of an inbound packet.
const RECEIVE_WINDOW: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum MqttError {
    #[error("Could not resolve broker host")]
    Dns,
    #[error("TCP connect failed: {0:?}")]
    Tcp(ConnectError),
    #[error("Broker returned {0:?}")]
    Protocol(ReasonCode),
    #[error("Not connected")]
    NotConnected,
}

/// Credentials and session parameters, fixed for the life of the process.
pub struct BrokerConfig {
    pub host: &'static str,
    pub port: u16,
    pub client_id: &'static str,
    pub username: &'static str,
    pub password: &'static str,
    pub keep_alive_secs: u16,
}

pub struct Buffers {
    tcp_rx: [u8; TCP_BUFFER],
    tcp_tx: [u8; TCP_BUFFER],
    packet_rx: [u8; PACKET_BUFFER],
    packet_tx: [u8; PACKET_BUFFER],
}

impl Buffers {
    pub fn take() -> Option<&'static mut Buffers> {
        static BUFFERS: StaticCell<Buffers> = StaticCell::new();
        BUFFERS.try_init(Buffers {
            tcp_rx: [0; TCP_BUFFER],
            tcp_tx: [0; TCP_BUFFER],
            packet_rx: [0; PACKET_BUFFER],
            packet_tx: [0; PACKET_BUFFER],
        })
    }
}

/// Adapts an embassy-net socket to the `embedded-io-async` traits rust-mqtt
/// reads and writes through.
///
/// The socket sits in a `RefCell` so the session can wait for readability
/// between packets. Both run in the broker task and never overlap.
pub struct EmbassyNetTransport<'s, 'b> {
    socket: &'s RefCell<TcpSocket<'b>>,
}

impl ErrorType for EmbassyNetTransport<'_, '_> {
    type Error = embassy_net::tcp::Error;
}

impl Read for EmbassyNetTransport<'_, '_> {
    #[allow(clippy::await_holding_refcell_ref)]
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.borrow_mut().read(buf).await
    }
}

impl Write for EmbassyNetTransport<'_, '_> {
    #[allow(clippy::await_holding_refcell_ref)]
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.borrow_mut().write(buf).await
    }

    #[allow(clippy::await_holding_refcell_ref)]
    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.borrow_mut().flush().await
    }
}

enum Request {
    Connect,
    Disconnect,
    Subscribe(String),
    Publish { topic: String, payload: Vec<u8> },
    Poll,
}

type Response = Result<Option<InboundMessage>, MqttError>;

struct Mailbox {
    requests: Channel<CriticalSectionRawMutex, Request, 1>,
    responses: Channel<CriticalSectionRawMutex, Response, 1>,
}

static MAILBOX: Mailbox = Mailbox {
    requests: Channel::new(),
    responses: Channel::new(),
};

/// Handle to the broker task.
pub struct BrokerClient {
    mailbox: &'static Mailbox,
    connected: bool,
}

impl BrokerClient {
    /// Spawn the broker task over `buffers`. Call once per boot.
    pub fn new(
        spawner: &Spawner,
        stack: Stack<'static>,
        config: BrokerConfig,
        buffers: &'static mut Buffers,
    ) -> Result<Self, SpawnError> {
        spawner.spawn(broker_task(stack, config, buffers, &MAILBOX))?;
        Ok(Self {
            mailbox: &MAILBOX,
            connected: false,
        })
    }

    async fn call(&mut self, request: Request) -> Response {
        self.mailbox.requests.send(request).await;
        let response = self.mailbox.responses.receive().await;
        if response.is_err() {
            self.connected = false;
        }
        response
    }

    fn require_session(&self) -> Result<(), MqttError> {
        if self.connected {
            Ok(())
        } else {
            Err(MqttError::NotConnected)
        }
    }
}

impl StatePublisher for BrokerClient {
    type Error = MqttError;

    async fn publish_retained(&mut self, topic: &str, payload: &[u8]) -> Result<(), MqttError> {
        self.require_session()?;
        debug!("mqtt: publish {} ({} bytes)", topic, payload.len());
        self.call(Request::Publish {
            topic: topic.into(),
            payload: payload.into(),
        })
        .await
        .map(|_| ())
    }
}

impl PubSubClient for BrokerClient {
    async fn connect(&mut self) -> Result<(), MqttError> {
        self.connected = false;
        self.call(Request::Connect).await?;
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        self.call(Request::Disconnect).await.map(|_| ())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.require_session()?;
        self.call(Request::Subscribe(topic.into())).await.map(|_| ())
    }

    async fn poll(&mut self) -> Result<Option<InboundMessage>, MqttError> {
        self.require_session()?;
        self.call(Request::Poll).await
    }
}

#[embassy_executor::task]
async fn broker_task(
    stack: Stack<'static>,
    config: BrokerConfig,
    buffers: &'static mut Buffers,
    mailbox: &'static Mailbox,
) -> ! {
    let mut pending = None;
    loop {
        let request = match pending.take() {
            Some(request) => request,
            None => mailbox.requests.receive().await,
        };
        match request {
            Request::Connect => pending = serve(stack, &config, buffers, mailbox).await,
            Request::Disconnect => mailbox.responses.send(Ok(None)).await,
            _ => mailbox.responses.send(Err(MqttError::NotConnected)).await,
        }
    }
}

async fn resolve(stack: Stack<'static>, host: &str) -> Result<IpAddress, MqttError> {
    if let Ok(address) = host.parse::<Ipv4Addr>() {
        return Ok(IpAddress::Ipv4(address));
    }

    let addresses = stack.dns_query(host, DnsQueryType::A).await.map_err(|e| {
        error!("mqtt: DNS lookup of {} failed: {:?}", host, e);
        MqttError::Dns
    })?;
    addresses.first().copied().ok_or(MqttError::Dns)
}

/// One broker connection, from the connect request to the failure or
/// disconnect that ends it. Every borrow of `buffers` is released on return.
///
/// Returns a connect request that arrived while connected, so the caller
/// reconnects over the freed buffers.
async fn serve(
    stack: Stack<'static>,
    config: &BrokerConfig,
    buffers: &mut Buffers,
    mailbox: &Mailbox,
) -> Option<Request> {
    let address = match resolve(stack, config.host).await {
        Ok(address) => address,
        Err(e) => {
            mailbox.responses.send(Err(e)).await;
            return None;
        }
    };

    let Buffers {
        tcp_rx,
        tcp_tx,
        packet_rx,
        packet_tx,
    } = buffers;

    let mut socket = TcpSocket::new(stack, tcp_rx, tcp_tx);
    socket.set_timeout(Some(SOCKET_TIMEOUT));
    info!("mqtt: connecting to {}:{}", address, config.port);
    if let Err(e) = socket.connect((address, config.port)).await {
        mailbox.responses.send(Err(MqttError::Tcp(e))).await;
        return None;
    }
    let socket = RefCell::new(socket);

    let mut client_config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(0));
    client_config.add_client_id(config.client_id);
    client_config.keep_alive = config.keep_alive_secs;
    if !config.username.is_empty() {
        client_config.add_username(config.username);
        client_config.add_password(config.password);
    }

    let mut client = MqttClient::<_, MAX_PROPERTIES, _>::new(
        EmbassyNetTransport { socket: &socket },
        packet_tx,
        PACKET_BUFFER,
        packet_rx,
        PACKET_BUFFER,
        client_config,
    );
    if let Err(code) = client.connect_to_broker().await {
        mailbox.responses.send(Err(MqttError::Protocol(code))).await;
        return None;
    }
    info!("mqtt: connected as {}", config.client_id);
    mailbox.responses.send(Ok(None)).await;

    loop {
        let result = match mailbox.requests.receive().await {
            Request::Connect => return Some(Request::Connect),
            Request::Disconnect => {
                let result = client.disconnect().await.map(|()| None);
                mailbox.responses.send(result.map_err(MqttError::Protocol)).await;
                return None;
            }
            Request::Subscribe(topic) => client.subscribe_to_topic(&topic).await.map(|()| None),
            Request::Publish { topic, payload } => {
                match client
                    .send_message(&topic, &payload, QualityOfService::QoS1, true)
                    .await
                {
                    Err(ReasonCode::NoMatchingSubscribers) => Ok(None),
                    other => other.map(|()| None),
                }
            }
            Request::Poll => {
                // rust-mqtt cannot resume a packet it was cancelled halfway
                // through, so the window only bounds the wait for its first
                // byte. Once data is readable the whole packet is read under
                // the socket timeout.
                let ready = with_timeout(RECEIVE_WINDOW, socket.borrow().wait_read_ready()).await;
                if ready.is_err() {
                    Ok(None)
                } else {
                    client
                        .receive_message()
                        .await
                        .map(|(topic, payload)| Some(InboundMessage::new(topic, payload)))
                }
            }
        };

        match result {
            Ok(message) => mailbox.responses.send(Ok(message)).await,
            Err(code) => {
                error!("mqtt: {:?}, dropping session", code);
                mailbox.responses.send(Err(MqttError::Protocol(code))).await;
                return None;
            }
        }
    }
}
