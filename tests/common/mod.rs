#![allow(dead_code)]

use async_trait::async_trait;
use coinflow::application::dispenser::DispenserConfig;
use coinflow::application::feasibility::FeasibilityEngine;
use coinflow::application::hopper::HopperTiming;
use coinflow::domain::change::CoinCounts;
use coinflow::domain::hardware::{
    Edge, EdgeEvent, HardwareBackend, HardwareConnection, HopperLink, HopperPins, MotorSwitch,
};
use coinflow::domain::ports::{InventoryStoreBox, SettingsStoreBox};
use coinflow::error::Result;
use coinflow::infrastructure::in_memory::{InMemoryInventoryStore, InMemorySettingsStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Engine over in-memory stores, seeded with an inventory and raw settings
/// strings. The inventory handle is returned too, so tests can observe
/// what `commit_dispensed` wrote.
pub async fn engine_with(
    counts: CoinCounts,
    settings: &[(&str, &str)],
) -> (FeasibilityEngine, InMemoryInventoryStore) {
    let inventory = InMemoryInventoryStore::with_counts(counts);
    let store = InMemorySettingsStore::new();
    for (key, value) in settings {
        store.set(key, value).await;
    }
    let inventory_box: InventoryStoreBox = Box::new(inventory.clone());
    let settings_box: SettingsStoreBox = Box::new(store);
    (
        FeasibilityEngine::new(inventory_box, settings_box),
        inventory,
    )
}

/// How a scripted hopper reacts each time its motor is switched on.
#[derive(Debug, Clone, Copy)]
pub enum HopperScript {
    /// One clean coin passage after the given delay.
    Dispense(Duration),
    /// The motor spins but no coin ever breaks the beam.
    Silent,
}

/// Test backend with per-sensor-pin behavior, for fault injection the
/// plain simulated backend cannot express.
pub struct ScriptedBackend {
    scripts: HashMap<u8, HopperScript>,
}

impl ScriptedBackend {
    pub fn new(scripts: impl IntoIterator<Item = (u8, HopperScript)>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
        }
    }
}

#[async_trait]
impl HardwareBackend for ScriptedBackend {
    async fn connect(&self) -> Result<Arc<dyn HardwareConnection>> {
        Ok(Arc::new(ScriptedConnection {
            scripts: self.scripts.clone(),
            started: Instant::now(),
        }))
    }
}

struct ScriptedConnection {
    scripts: HashMap<u8, HopperScript>,
    started: Instant,
}

#[async_trait]
impl HardwareConnection for ScriptedConnection {
    async fn bind_hopper(&self, pins: HopperPins) -> Result<HopperLink> {
        let (tx, rx) = mpsc::unbounded_channel();
        let script = self
            .scripts
            .get(&pins.sensor_pin)
            .copied()
            .unwrap_or(HopperScript::Silent);
        Ok(HopperLink {
            motor: Box::new(ScriptedMotor {
                events: tx,
                script,
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

struct ScriptedMotor {
    events: mpsc::UnboundedSender<EdgeEvent>,
    script: HopperScript,
    started: Instant,
    pending: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl MotorSwitch for ScriptedMotor {
    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut pending = self.pending.lock().expect("scripted motor lock");
        if let Some(task) = pending.take() {
            task.abort();
        }
        if !enabled {
            return Ok(());
        }
        let HopperScript::Dispense(delay) = self.script else {
            return Ok(());
        };

        let events = self.events.clone();
        let started = self.started;
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let tick = started.elapsed().as_micros() as u32;
            let _ = events.send(EdgeEvent::new(Edge::Falling, tick));
            // 15 ms beam break, well past the 10 ms debounce.
            let _ = events.send(EdgeEvent::new(Edge::Rising, tick.wrapping_add(15_000)));
        }));
        Ok(())
    }
}

/// Default pins with millisecond-scale timing so tests stay fast.
pub fn fast_config() -> DispenserConfig {
    DispenserConfig {
        timing: HopperTiming {
            spin_up: Duration::from_millis(1),
            dispense_timeout: Duration::from_millis(40),
            max_retry_attempts: 2,
            retry_delay: Duration::from_millis(1),
            settle_delay: Duration::from_millis(1),
            debounce: Duration::from_millis(10),
        },
        ..DispenserConfig::default()
    }
}
