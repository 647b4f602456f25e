use crate::domain::hardware::{
    Edge, EdgeEvent, HardwareBackend, HardwareConnection, HopperLink, HopperPins, MotorSwitch,
};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Synthetic falling-to-rising interval; comfortably above the 10 ms
/// debounce so every simulated passage counts as valid.
const PASSAGE_PULSE_US: u32 = 15_000;

/// Hardware stand-in for machines without the GPIO daemon.
///
/// Every motor activation yields exactly one clean coin passage after a
/// fixed delay, through the same link contract the real adapter provides,
/// so the dispense path is identical in simulation.
pub struct SimulatedBackend {
    coin_delay: Duration,
}

impl SimulatedBackend {
    pub fn new(coin_delay: Duration) -> Self {
        Self { coin_delay }
    }
}

impl Default for SimulatedBackend {
    /// The per-coin delay the kiosk has always used in simulation.
    fn default() -> Self {
        Self::new(Duration::from_millis(1500))
    }
}

#[async_trait]
impl HardwareBackend for SimulatedBackend {
    async fn connect(&self) -> Result<Arc<dyn HardwareConnection>> {
        debug!("simulated hardware connection established");
        Ok(Arc::new(SimulatedConnection {
            coin_delay: self.coin_delay,
            started: Instant::now(),
        }))
    }
}

struct SimulatedConnection {
    coin_delay: Duration,
    started: Instant,
}

#[async_trait]
impl HardwareConnection for SimulatedConnection {
    async fn bind_hopper(&self, pins: HopperPins) -> Result<HopperLink> {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(sensor = pins.sensor_pin, enable = pins.enable_pin, "simulated hopper bound");
        Ok(HopperLink {
            motor: Box::new(SimulatedMotor {
                events: tx,
                coin_delay: self.coin_delay,
                started: self.started,
                pending: Mutex::new(None),
            }),
            edges: rx,
        })
    }

    fn is_alive(&self) -> bool {
        true
    }
}

struct SimulatedMotor {
    events: mpsc::UnboundedSender<EdgeEvent>,
    coin_delay: Duration,
    started: Instant,
    pending: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MotorSwitch for SimulatedMotor {
    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut pending = self.pending.lock().expect("simulated motor lock");
        if let Some(task) = pending.take() {
            task.abort();
        }
        if !enabled {
            return Ok(());
        }

        let events = self.events.clone();
        let coin_delay = self.coin_delay;
        let started = self.started;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(coin_delay).await;
            let tick = started.elapsed().as_micros() as u32;
            let _ = events.send(EdgeEvent::new(Edge::Falling, tick));
            let _ = events.send(EdgeEvent::new(
                Edge::Rising,
                tick.wrapping_add(PASSAGE_PULSE_US),
            ));
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_one_passage_per_activation() {
        let backend = SimulatedBackend::new(Duration::from_millis(2));
        let connection = backend.connect().await.unwrap();
        let mut link = connection.bind_hopper(HopperPins::new(6, 26)).await.unwrap();

        link.motor.set_enabled(true).await.unwrap();
        let falling = link.edges.recv().await.unwrap();
        let rising = link.edges.recv().await.unwrap();
        assert_eq!(falling.edge, Edge::Falling);
        assert_eq!(rising.edge, Edge::Rising);
        assert_eq!(
            rising.tick_us.wrapping_sub(falling.tick_us),
            PASSAGE_PULSE_US
        );

        link.motor.set_enabled(false).await.unwrap();
        // Motor off: no further passages arrive.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(link.edges.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disable_cancels_pending_passage() {
        let backend = SimulatedBackend::new(Duration::from_millis(50));
        let connection = backend.connect().await.unwrap();
        let mut link = connection.bind_hopper(HopperPins::new(21, 16)).await.unwrap();

        link.motor.set_enabled(true).await.unwrap();
        link.motor.set_enabled(false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(70)).await;
        assert!(link.edges.try_recv().is_err());
    }
}
