use crate::domain::change::{CoinCounts, DispenseResult, to_units};
use crate::domain::denomination::Denomination;
use crate::domain::hardware::{HardwareBackendBox, HardwareConnection, HopperPins};
use crate::error::{ChangeError, Result};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::hopper::{HopperActuator, HopperTiming};

/// Invoked after each coin and once at completion with a progress line.
/// Crosses back to the caller's side; everything else stays on the
/// dispense task.
pub type StatusCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Wiring and timing for both hoppers. Pin defaults match the deployed
/// kiosk: the 1-unit hopper on sensor 21 / enable 16, the 5-unit hopper on
/// sensor 6 / enable 26.
#[derive(Debug, Clone, Copy)]
pub struct DispenserConfig {
    pub ones_pins: HopperPins,
    pub fives_pins: HopperPins,
    pub timing: HopperTiming,
}

impl Default for DispenserConfig {
    fn default() -> Self {
        Self {
            ones_pins: HopperPins::new(21, 16),
            fives_pins: HopperPins::new(6, 26),
            timing: HopperTiming::default(),
        }
    }
}

struct DispenserInner {
    connection: Option<Arc<dyn HardwareConnection>>,
    ones: HopperActuator,
    fives: HopperActuator,
}

/// Orchestrates both hoppers to turn a change amount into physical coins.
///
/// One dispense operation may be in flight at a time: `dispense_change`
/// serializes behind an internal lock, `try_dispense_change` fails fast
/// instead. The dispenser reports the truth of what left the machine and
/// never mutates inventory; callers persist the dispensed counts.
pub struct ChangeDispenser {
    backend: HardwareBackendBox,
    fallback: Option<HardwareBackendBox>,
    config: DispenserConfig,
    inner: Mutex<DispenserInner>,
    cancel_requested: AtomicBool,
}

impl ChangeDispenser {
    pub fn new(backend: HardwareBackendBox, config: DispenserConfig) -> Self {
        Self {
            backend,
            fallback: None,
            config,
            inner: Mutex::new(DispenserInner {
                connection: None,
                ones: HopperActuator::new(Denomination::One, config.ones_pins, config.timing),
                fives: HopperActuator::new(Denomination::Five, config.fives_pins, config.timing),
            }),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Backend used when the primary one cannot produce a connection
    /// (typically the simulated backend, preserving the call contract on
    /// machines without the GPIO daemon).
    pub fn with_fallback(mut self, fallback: HardwareBackendBox) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Requests a cancel of the in-flight dispense. Honored only at coin
    /// boundaries, never while a motor is spinning.
    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Dispenses `amount` in change, blocking if another dispense is in
    /// flight. Always returns a result; partial failure shows up as
    /// `dispensed_coins < requested_coins` with `success` still true.
    pub async fn dispense_change(
        &self,
        amount: Decimal,
        status: Option<&StatusCallback>,
    ) -> DispenseResult {
        if amount <= Decimal::ZERO {
            return DispenseResult::empty_success();
        }
        let mut inner = self.inner.lock().await;
        self.run_dispense(&mut inner, amount, status).await
    }

    /// Like `dispense_change`, but fails with `DispenserBusy` when another
    /// operation holds the dispenser.
    pub async fn try_dispense_change(
        &self,
        amount: Decimal,
        status: Option<&StatusCallback>,
    ) -> Result<DispenseResult> {
        if amount <= Decimal::ZERO {
            return Ok(DispenseResult::empty_success());
        }
        let mut inner = self.inner.try_lock().map_err(|_| ChangeError::DispenserBusy)?;
        Ok(self.run_dispense(&mut inner, amount, status).await)
    }

    /// Runs the dispense on a dedicated background task.
    pub fn spawn_dispense(
        self: &Arc<Self>,
        amount: Decimal,
        status: Option<StatusCallback>,
    ) -> JoinHandle<DispenseResult> {
        let dispenser = Arc::clone(self);
        tokio::spawn(async move { dispenser.dispense_change(amount, status.as_ref()).await })
    }

    async fn run_dispense(
        &self,
        inner: &mut DispenserInner,
        amount: Decimal,
        status: Option<&StatusCallback>,
    ) -> DispenseResult {
        self.cancel_requested.store(false, Ordering::SeqCst);

        let units = to_units(amount);
        let requested = CoinCounts::for_units(units);
        let expected_change = Decimal::from(units);

        if !self.ensure_hardware(inner).await {
            warn!("no hardware connection available, dispense aborted");
            emit(status, "Change dispensing failed: hardware unavailable.");
            return DispenseResult {
                success: false,
                requested_coins: requested,
                dispensed_coins: CoinCounts::ZERO,
                actual_change: Decimal::ZERO,
                expected_change,
            };
        }

        info!(
            amount = %expected_change,
            fives = requested.fives,
            ones = requested.ones,
            "dispensing change"
        );
        emit(status, &format!("Preparing to dispense {expected_change} in change..."));

        let mut dispensed = CoinCounts::ZERO;
        dispensed.fives = self
            .dispense_denomination(&mut inner.fives, requested.fives, status)
            .await;
        // A shortfall in fives is not compensated with ones: the caller
        // reconciles against the dispensed counts instead.
        dispensed.ones = self
            .dispense_denomination(&mut inner.ones, requested.ones, status)
            .await;

        let actual_change = Decimal::from(dispensed.units());
        let summary = format!(
            "Change dispensing complete. Dispensed {actual_change} ({}x5 + {}x1) of {expected_change} expected.",
            dispensed.fives, dispensed.ones
        );
        if dispensed == requested {
            info!(%actual_change, "change dispensed in full");
        } else {
            warn!(
                %actual_change,
                %expected_change,
                "change dispensed short"
            );
        }
        emit(status, &summary);

        DispenseResult {
            success: true,
            requested_coins: requested,
            dispensed_coins: dispensed,
            actual_change,
            expected_change,
        }
    }

    /// Dispenses up to `count` coins of one denomination, stopping at the
    /// first failed coin or at a cancel request (coin boundaries only).
    async fn dispense_denomination(
        &self,
        actuator: &mut HopperActuator,
        count: u64,
        status: Option<&StatusCallback>,
    ) -> u64 {
        let denomination = actuator.denomination();
        let mut dispensed = 0;
        for i in 0..count {
            if self.cancel_requested.load(Ordering::SeqCst) {
                warn!(%denomination, dispensed, "dispense cancelled at coin boundary");
                emit(
                    status,
                    &format!("Dispense cancelled. {dispensed} of {count} {denomination} coins out."),
                );
                break;
            }

            emit(
                status,
                &format!("Dispensing {denomination} coin ({} of {count})", i + 1),
            );
            let outcome = actuator.dispense_single_coin().await;
            if outcome.is_dispensed() {
                dispensed += 1;
            } else {
                warn!(
                    %denomination,
                    coin = i + 1,
                    dispensed,
                    requested = count,
                    ?outcome,
                    "failed to dispense coin, stopping this denomination"
                );
                emit(
                    status,
                    &format!(
                        "Failed to dispense {denomination} coin {}. Dispensed {dispensed}/{count} so far.",
                        i + 1
                    ),
                );
                break;
            }
        }
        dispensed
    }

    /// Makes sure a live connection is bound to both actuators. Attempts
    /// one reconnect through the primary backend, then the fallback.
    /// Rebinding preserves actuator identity and statistics.
    async fn ensure_hardware(&self, inner: &mut DispenserInner) -> bool {
        if let Some(connection) = &inner.connection {
            if connection.is_alive() && inner.ones.is_bound() && inner.fives.is_bound() {
                return true;
            }
            warn!("hardware connection is stale, reconnecting");
        }

        match self.backend.connect().await {
            Ok(connection) => {
                if Self::bind_all(inner, connection).await {
                    return true;
                }
            }
            Err(e) => warn!(error = %e, "hardware backend connect failed"),
        }

        let Some(fallback) = &self.fallback else {
            inner.connection = None;
            return false;
        };
        match fallback.connect().await {
            Ok(connection) => {
                info!("falling back to simulated hardware");
                Self::bind_all(inner, connection).await
            }
            Err(e) => {
                warn!(error = %e, "fallback backend connect failed");
                inner.connection = None;
                false
            }
        }
    }

    async fn bind_all(inner: &mut DispenserInner, connection: Arc<dyn HardwareConnection>) -> bool {
        if let Err(e) = inner.fives.rebind(connection.as_ref()).await {
            warn!(error = %e, "failed to bind 5-unit hopper");
            return false;
        }
        if let Err(e) = inner.ones.rebind(connection.as_ref()).await {
            warn!(error = %e, "failed to bind 1-unit hopper");
            return false;
        }
        inner.connection = Some(connection);
        true
    }
}

fn emit(status: Option<&StatusCallback>, message: &str) {
    if let Some(callback) = status {
        callback(message);
    }
}
