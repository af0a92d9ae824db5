//! Link and pub/sub session lifecycle.
//!
//! Connection failures the node cannot work around (no Wi-Fi after the
//! bounded retries, broker refusing the connection) surface as a
//! [`RestartReason`]; everything else is logged and absorbed.

use core::net::Ipv4Addr;

use embedded_hal_async::delay::DelayNs;
use log::{error, info, warn};

use super::link::{Clock, TimeSource, WirelessLink};
use super::mqtt::PubSubClient;
use super::router::Router;
use crate::config::NodeConfig;
use crate::power::RestartReason;
use crate::retained::{RecordStore, RetainedMemory};

/// Upper bound on messages handled per `service` call.
const MAX_INBOUND_PER_SERVICE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub wifi_attempts: u8,
    pub wifi_retry_delay_ms: u32,
    pub link_cycle_delay_ms: u32,
    pub ping_address: Ipv4Addr,
}

impl From<&NodeConfig<'_>> for RetryPolicy {
    fn from(config: &NodeConfig<'_>) -> Self {
        Self {
            wifi_attempts: config.wifi_attempts.max(1),
            wifi_retry_delay_ms: config.wifi_retry_delay_ms,
            link_cycle_delay_ms: config.link_cycle_delay_ms,
            ping_address: config.ping_address,
        }
    }
}

/// What the node cycle needs from the network, independent of the concrete
/// link, client and time source.
#[allow(async_fn_in_trait)]
pub trait Uplink<M: RetainedMemory> {
    type Client: PubSubClient;

    async fn connect(&mut self, router: &Router<M>) -> Result<(), RestartReason>;

    async fn disconnect(&mut self);

    async fn service(
        &mut self,
        store: &mut RecordStore<M>,
        router: &Router<M>,
        recover: bool,
    ) -> Result<(), RestartReason>;

    async fn recover(&mut self, router: &Router<M>) -> Result<(), RestartReason>;

    fn is_connected(&self) -> bool;

    async fn sync_time<K: Clock>(&mut self, clock: &mut K) -> bool;

    fn client_mut(&mut self) -> &mut Self::Client;
}

pub struct NetworkSession<L, C, T, D> {
    link: L,
    client: C,
    time: T,
    delay: D,
    policy: RetryPolicy,
}

impl<L, C, T, D> NetworkSession<L, C, T, D>
where
    L: WirelessLink,
    C: PubSubClient,
    T: TimeSource,
    D: DelayNs,
{
    /// Build a session with the radio off.
    pub fn new(link: L, client: C, time: T, delay: D, policy: RetryPolicy) -> Self {
        Self {
            link,
            client,
            time,
            delay,
            policy,
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }

    /// Associate with the access point, retrying a bounded number of times.
    async fn join_link(&mut self) -> Result<(), RestartReason> {
        if self.link.is_up() {
            return Ok(());
        }

        if let Err(e) = self.link.enable().await {
            warn!("Failed to enable radio: {:?}", e);
        }

        let attempts = self.policy.wifi_attempts;
        for attempt in 1..=attempts {
            info!("Connecting to AP (attempt {} of {})", attempt, attempts);
            match self.link.join().await {
                Ok(()) if self.link.is_up() => {
                    info!("Wi-Fi connected");
                    return Ok(());
                }
                Ok(()) => warn!("Associated but no address assigned"),
                Err(e) => warn!("Could not connect to AP: {:?}", e),
            }

            if attempt < attempts {
                info!("Retrying in {} ms", self.policy.wifi_retry_delay_ms);
                self.delay.delay_ms(self.policy.wifi_retry_delay_ms).await;
            }
        }

        error!("Failed to connect to Wi-Fi after {} attempts", attempts);
        Err(RestartReason::LinkUnavailable)
    }

    async fn connect_client<M: RetainedMemory>(
        &mut self,
        router: &Router<M>,
        force: bool,
    ) -> Result<(), RestartReason> {
        if self.client.is_connected() && !force {
            info!("MQTT is already connected");
            return Ok(());
        }

        self.client.connect().await.map_err(|e| {
            error!("Failed to connect MQTT: {:?}", e);
            RestartReason::BrokerUnavailable
        })?;
        info!("MQTT is connected");

        for topic in router.topics() {
            info!("Subscribing to {}", topic);
            if let Err(e) = self.client.subscribe(topic).await {
                warn!("Subscribe to {} failed: {:?}", topic, e);
            }
        }

        Ok(())
    }

    async fn disconnect_client(&mut self, force: bool) {
        if !self.client.is_connected() && !force {
            return;
        }

        match self.client.disconnect().await {
            Ok(()) => info!("MQTT disconnected"),
            Err(e) => warn!("Failed to disconnect MQTT: {:?}", e),
        }
    }
}

impl<M, L, C, T, D> Uplink<M> for NetworkSession<L, C, T, D>
where
    M: RetainedMemory,
    L: WirelessLink,
    C: PubSubClient,
    T: TimeSource,
    D: DelayNs,
{
    type Client = C;

    /// Bring up Wi-Fi, then the client, then subscribe every routed topic.
    async fn connect(&mut self, router: &Router<M>) -> Result<(), RestartReason> {
        info!("Connecting network devices...");
        self.join_link().await?;
        self.connect_client(router, false).await
    }

    async fn disconnect(&mut self) {
        info!("Disconnecting network devices...");
        self.disconnect_client(false).await;

        if let Err(e) = self.link.disable().await {
            warn!("Failed to disable radio: {:?}", e);
        }
    }

    /// Drain pending inbound messages through `router`. Every handler has run
    /// by the time this returns.
    async fn service(
        &mut self,
        store: &mut RecordStore<M>,
        router: &Router<M>,
        recover: bool,
    ) -> Result<(), RestartReason> {
        for _ in 0..MAX_INBOUND_PER_SERVICE {
            match self.client.poll().await {
                Ok(Some(message)) => {
                    router.dispatch(store, &message);
                }
                Ok(None) => return Ok(()),
                Err(e) => {
                    error!("MQTT loop failure: {:?}", e);
                    if recover {
                        return self.recover(router).await;
                    }
                    return Ok(());
                }
            }
        }

        warn!("Inbound queue not drained after {} messages", MAX_INBOUND_PER_SERVICE);
        Ok(())
    }

    /// Reset the link if it is up but cannot reach the ping address, rejoin
    /// if it is down, then always force a fresh client connection.
    async fn recover(&mut self, router: &Router<M>) -> Result<(), RestartReason> {
        info!("Recovering network devices...");

        if self.link.is_up() {
            if !self.link.ping(self.policy.ping_address).await {
                warn!("Ping target {} unreachable, cycling link", self.policy.ping_address);
                if let Err(e) = self.link.disable().await {
                    warn!("Failed to disable radio: {:?}", e);
                }
                self.delay.delay_ms(self.policy.link_cycle_delay_ms).await;
                self.join_link().await?;
            }
        } else {
            self.join_link().await?;
        }

        self.disconnect_client(true).await;
        self.connect_client(router, true).await
    }

    fn is_connected(&self) -> bool {
        self.client.is_connected()
    }

    async fn sync_time<K: Clock>(&mut self, clock: &mut K) -> bool {
        if !self.link.is_up() {
            warn!("Time sync skipped, link is down");
            return false;
        }

        match self.time.fetch_epoch().await {
            Ok(epoch) => {
                clock.set(epoch);
                info!("Time synced: {}", epoch);
                true
            }
            Err(e) => {
                error!("Time sync failed: {:?}", e);
                false
            }
        }
    }

    fn client_mut(&mut self) -> &mut C {
        &mut self.client
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use crate::network::mqtt::InboundMessage;
    use crate::retained::Value;
    use crate::testing::{FakeClient, FakeClock, FakeDelay, FakeLink, FakeTime};
    use embassy_futures::block_on;

    type Session = NetworkSession<FakeLink, FakeClient, FakeTime, FakeDelay>;
    type Arena = [u8; 256];

    const COMMAND_TOPIC: &str = "homeassistant/number/dev/cmd";

    fn session(link: FakeLink, client: FakeClient) -> Session {
        NetworkSession::new(
            link,
            client,
            FakeTime::new(Some(1_700_000_000)),
            FakeDelay::default(),
            RetryPolicy::from(&NodeConfig::default()),
        )
    }

    fn router() -> Router<Arena> {
        Router::for_node("pressure", COMMAND_TOPIC)
    }

    fn node_store() -> RecordStore<Arena> {
        let mut store = RecordStore::create([0u8; 256]);
        fields::initialize(&mut store, &NodeConfig::default()).unwrap();
        store
    }

    #[test]
    fn test_connect_subscribes_routed_topics() {
        let mut session = session(FakeLink::joining_after(1), FakeClient::default());
        let router = router();

        block_on(Uplink::<Arena>::connect(&mut session, &router)).unwrap();

        assert!(Uplink::<Arena>::is_connected(&session));
        assert_eq!(session.client().subscriptions, ["pressure", COMMAND_TOPIC]);
        assert_eq!(session.link().join_calls, 1);
    }

    #[test]
    fn test_link_failure_requests_restart_after_bounded_attempts() {
        let mut session = session(FakeLink::never_joining(), FakeClient::default());

        let result = block_on(Uplink::<Arena>::connect(&mut session, &router()));

        assert_eq!(result, Err(RestartReason::LinkUnavailable));
        assert_eq!(session.link().join_calls, 5);
        assert_eq!(session.delay.total_ms, 4 * 3000, "delay between attempts only");
        assert!(!session.client().connected, "client must not connect without link");
    }

    #[test]
    fn test_broker_failure_requests_restart() {
        let mut client = FakeClient::default();
        client.fail_connect = true;
        let mut session = session(FakeLink::joining_after(1), client);

        let result = block_on(Uplink::<Arena>::connect(&mut session, &router()));
        assert_eq!(result, Err(RestartReason::BrokerUnavailable));
    }

    #[test]
    fn test_service_dispatches_before_returning() {
        let mut client = FakeClient::default();
        client
            .inbox
            .push_back(InboundMessage::new(COMMAND_TOPIC, br#"{"CO2 Ref": 450}"#));
        let mut session = session(FakeLink::joining_after(1), client);
        let router = router();
        let mut store = node_store();

        block_on(session.connect(&router)).unwrap();
        block_on(session.service(&mut store, &router, false)).unwrap();

        assert_eq!(store.get(fields::FORCED_CAL), Ok(Value::I32(450)));
        assert!(session.client().inbox.is_empty());
    }

    #[test]
    fn test_empty_receive_window_keeps_session() {
        let router = router();
        let mut store = node_store();
        let mut session = session(FakeLink::joining_after(1), FakeClient::default());

        block_on(session.connect(&router)).unwrap();
        for _ in 0..3 {
            block_on(session.service(&mut store, &router, true)).unwrap();
        }

        assert!(Uplink::<Arena>::is_connected(&session));
        assert_eq!(session.client().connect_calls, 1, "nothing inbound is not a failure");
        assert_eq!(session.client().disconnect_calls, 0);
    }

    #[test]
    fn test_loop_failure_recovers_only_when_asked() {
        let router = router();
        let mut store = node_store();

        let mut quiet = session(FakeLink::joining_after(1), FakeClient::default());
        block_on(quiet.connect(&router)).unwrap();
        quiet.client.fail_poll = true;
        block_on(quiet.service(&mut store, &router, false)).unwrap();
        assert_eq!(quiet.client().connect_calls, 1, "no recovery without the flag");

        let mut recovering = session(FakeLink::joining_after(1), FakeClient::default());
        block_on(recovering.connect(&router)).unwrap();
        recovering.client.fail_poll = true;
        block_on(recovering.service(&mut store, &router, true)).unwrap();
        assert_eq!(recovering.client().connect_calls, 2, "forced reconnect");
        assert_eq!(recovering.client().disconnect_calls, 1);
    }

    #[test]
    fn test_recover_cycles_link_only_when_ping_fails() {
        let router = router();

        let mut healthy = session(FakeLink::joining_after(1), FakeClient::default());
        block_on(healthy.connect(&router)).unwrap();
        block_on(Uplink::<Arena>::recover(&mut healthy, &router)).unwrap();
        assert_eq!(healthy.link().disable_calls, 0);
        assert_eq!(healthy.link().join_calls, 1);

        let mut broken = session(FakeLink::joining_after(1), FakeClient::default());
        block_on(broken.connect(&router)).unwrap();
        broken.link.ping_ok = false;
        block_on(Uplink::<Arena>::recover(&mut broken, &router)).unwrap();
        assert_eq!(broken.link().disable_calls, 1);
        assert_eq!(broken.link().join_calls, 2);
        assert_eq!(broken.delay.total_ms, 1000);
        assert_eq!(broken.client().connect_calls, 2);
    }

    #[test]
    fn test_disconnect_drops_client_and_link() {
        let router = router();
        let mut session = session(FakeLink::joining_after(1), FakeClient::default());
        block_on(session.connect(&router)).unwrap();

        block_on(Uplink::<Arena>::disconnect(&mut session));

        assert!(!Uplink::<Arena>::is_connected(&session));
        assert!(!session.link().is_up());
    }

    #[test]
    fn test_time_sync_sets_clock() {
        let router = router();
        let mut session = session(FakeLink::joining_after(1), FakeClient::default());
        let mut clock = FakeClock::new(0);

        assert!(!block_on(Uplink::<Arena>::sync_time(&mut session, &mut clock)));
        block_on(session.connect(&router)).unwrap();
        assert!(block_on(Uplink::<Arena>::sync_time(&mut session, &mut clock)));
        assert_eq!(clock.now(), 1_700_000_000);

        session.time = FakeTime::new(None);
        clock.set(5);
        assert!(!block_on(Uplink::<Arena>::sync_time(&mut session, &mut clock)));
        assert_eq!(clock.now(), 5);
    }
}
