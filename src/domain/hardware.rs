use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Direction of a sensor transition. The sensor input is pulled up, so a
/// coin entering the optical gate produces a falling edge and a coin
/// clearing it produces a rising edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Falling,
    Rising,
}

/// One sensor transition, timestamped with the daemon's microsecond tick.
///
/// Ticks are 32-bit and wrap roughly every 72 minutes; consumers must use
/// wrapping arithmetic when computing intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeEvent {
    pub edge: Edge,
    pub tick_us: u32,
}

impl EdgeEvent {
    pub fn new(edge: Edge, tick_us: u32) -> Self {
        Self { edge, tick_us }
    }
}

/// GPIO wiring of a single hopper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HopperPins {
    /// Passage-sensor input (pull-up, edge triggered).
    pub sensor_pin: u8,
    /// Motor-enable output.
    pub enable_pin: u8,
    /// Whether the enable line is active-low (the deployed wiring is).
    pub enable_active_low: bool,
}

impl HopperPins {
    pub fn new(sensor_pin: u8, enable_pin: u8) -> Self {
        Self {
            sensor_pin,
            enable_pin,
            enable_active_low: true,
        }
    }
}

/// Control over one hopper motor. `set_enabled(true)` starts the motor
/// spinning; implementations apply the wiring polarity themselves.
#[async_trait]
pub trait MotorSwitch: Send + Sync {
    async fn set_enabled(&self, enabled: bool) -> Result<()>;
}

/// A hopper's bound hardware lines: the motor switch plus the stream of
/// sensor edge events for its passage sensor.
///
/// Each link owns an independent event channel, so passages on one hopper
/// can never be attributed to another.
pub struct HopperLink {
    pub motor: Box<dyn MotorSwitch>,
    pub edges: mpsc::UnboundedReceiver<EdgeEvent>,
}

/// A live connection to the GPIO layer, shared by every hopper in the
/// process. Binding a hopper configures its lines (sensor input with
/// pull-up, enable output driven to the inactive level) and subscribes to
/// its edge events.
#[async_trait]
pub trait HardwareConnection: Send + Sync {
    async fn bind_hopper(&self, pins: HopperPins) -> Result<HopperLink>;

    /// Whether the connection is still usable. A dead connection is
    /// replaced before the next dispense, never mid-attempt.
    fn is_alive(&self) -> bool;
}

/// Produces `HardwareConnection`s; called once at startup and again for
/// each reconnect attempt.
#[async_trait]
pub trait HardwareBackend: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn HardwareConnection>>;
}

pub type HardwareBackendBox = Box<dyn HardwareBackend>;
