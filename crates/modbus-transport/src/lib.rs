//! modbus-transport: blocking register bus abstractions
//!
//! This crate provides the trait and error types the acquisition engine uses to
//! talk to a device that exposes 16-bit holding registers. Wire framing belongs
//! to concrete backends; the default build enables a `mock` backend that keeps
//! an in-memory register bank so binaries and tests run without hardware.

mod types;
pub use types::BusInfo;

mod error;
pub use error::{Result, TransportError};

mod traits;
pub use traits::RegisterBus;

#[cfg(feature = "mock")]
mod mock;

#[cfg(feature = "mock")]
pub use mock::MockBus;
