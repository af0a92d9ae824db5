//! Network session management: link, pub/sub client, time sync and the
//! inbound message dispatch table.

pub mod link;
pub mod mqtt;
pub mod router;
pub mod session;
pub mod sntp;

pub use link::{Clock, TimeSource, WirelessLink};
pub use mqtt::{InboundMessage, PubSubClient, StatePublisher};
pub use router::{Command, CommandError, Router};
pub use session::{NetworkSession, RetryPolicy, Uplink};
