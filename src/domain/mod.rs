//! Domain types and ports: denominations, coin arithmetic, and the traits
//! the application layer consumes for inventory, settings, and hardware.

pub mod change;
pub mod denomination;
pub mod hardware;
pub mod ports;
