//! Adapters behind the domain ports: in-memory stores, the simulated
//! hardware backend, and the pigpio daemon client.

pub mod in_memory;
pub mod pigpio;
pub mod simulated;
