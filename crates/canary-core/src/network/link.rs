use core::fmt::Debug;
use core::net::Ipv4Addr;

/// Wi-Fi station interface.
#[allow(async_fn_in_trait)]
pub trait WirelessLink {
    type Error: Debug;

    /// Power the radio up.
    async fn enable(&mut self) -> Result<(), Self::Error>;

    /// Drop the association and power the radio down.
    async fn disable(&mut self) -> Result<(), Self::Error>;

    /// One association attempt, including address acquisition.
    async fn join(&mut self) -> Result<(), Self::Error>;

    /// Associated and holding an IPv4 address.
    fn is_up(&self) -> bool;

    /// Single ICMP echo to `address`; `true` on reply.
    async fn ping(&mut self, address: Ipv4Addr) -> bool;
}

/// Network time (SNTP) client.
#[allow(async_fn_in_trait)]
pub trait TimeSource {
    type Error: Debug;

    /// Current UTC time as Unix epoch seconds.
    async fn fetch_epoch(&mut self) -> Result<u32, Self::Error>;
}

/// Wall clock kept by the platform (RTC), in Unix epoch seconds.
pub trait Clock {
    fn now(&self) -> u32;

    fn set(&mut self, epoch: u32);
}
