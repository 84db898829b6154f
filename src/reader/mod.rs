//! Packet-reader pipeline layers
//!
//! Each layer wraps the one below it and exposes the same pull
//! interface; the session assembles them once at creation.

pub mod delayed;
pub mod sorted;
pub mod watchdog;

#[cfg(test)]
mod tests;

pub use delayed::DelayedReader;
pub use sorted::SortedReader;
pub use watchdog::{Watchdog, WatchdogConfig, WatchdogCtl};
