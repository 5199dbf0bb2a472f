use crate::{BusInfo, Result};

/// A minimal blocking register bus.
///
/// Every call blocks until the device answers or the backend gives up. Retry
/// and backoff policy, if any, is the backend's own business: callers make at
/// most one attempt per request.
pub trait RegisterBus {
    /// Create a bus for an endpoint (e.g. "192.168.1.50:5743", "mock0").
    /// Opening does not connect; see [`RegisterBus::connect`].
    fn open(endpoint: &str) -> Result<Self>
    where
        Self: Sized;

    /// Name and driver of this bus.
    fn info(&self) -> BusInfo;

    /// Establish (or re-establish) the underlying connection.
    fn connect(&mut self) -> Result<()>;

    /// Close the connection. Closing an already closed bus is a no-op.
    fn disconnect(&mut self) {}

    /// Whether the underlying connection is currently believed to be live.
    fn is_connected(&self) -> bool;

    /// Read `count` consecutive words starting at `start`.
    ///
    /// On success exactly `count` words are returned; anything else is an error.
    fn read_span(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Write a single word.
    fn write_word(&mut self, address: u16, value: u16) -> Result<()>;
}
