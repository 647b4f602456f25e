use crate::domain::denomination::Denomination;
use crate::domain::hardware::{Edge, EdgeEvent, HardwareConnection, HopperLink, HopperPins};
use crate::error::Result;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, trace, warn};

/// Timing envelope for a single hopper. Defaults match the deployed
/// hardware; tests shrink them to keep runs fast.
#[derive(Debug, Clone, Copy)]
pub struct HopperTiming {
    /// Motor spin-up time before the sensor is consulted.
    pub spin_up: Duration,
    /// Maximum wait for a single coin passage per attempt.
    pub dispense_timeout: Duration,
    /// Attempts per coin before giving up.
    pub max_retry_attempts: u32,
    /// Pause between retry attempts.
    pub retry_delay: Duration,
    /// Pause after the final outcome, letting the mechanism settle.
    pub settle_delay: Duration,
    /// Minimum falling-to-rising interval for a valid passage.
    pub debounce: Duration,
}

impl Default for HopperTiming {
    fn default() -> Self {
        Self {
            spin_up: Duration::from_millis(500),
            dispense_timeout: Duration::from_secs(10),
            max_retry_attempts: 5,
            retry_delay: Duration::from_millis(500),
            settle_delay: Duration::from_secs(1),
            debounce: Duration::from_millis(10),
        }
    }
}

/// Final outcome of `dispense_single_coin`, with the number of attempts it
/// took. Only `Dispensed` means a coin left the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoinOutcome {
    Dispensed { attempts: u32 },
    /// More than one passage in a single attempt. Never retried: the
    /// hardware has no way to take a coin back.
    OverDispensed { attempts: u32, passages: u32 },
    TimedOut { attempts: u32 },
    /// The hardware link failed mid-attempt; a reconnect happens only
    /// before the next dispense operation.
    Faulted { attempts: u32 },
}

impl CoinOutcome {
    pub fn is_dispensed(self) -> bool {
        matches!(self, CoinOutcome::Dispensed { .. })
    }

    pub fn attempts(self) -> u32 {
        match self {
            CoinOutcome::Dispensed { attempts }
            | CoinOutcome::OverDispensed { attempts, .. }
            | CoinOutcome::TimedOut { attempts }
            | CoinOutcome::Faulted { attempts } => attempts,
        }
    }
}

/// Lifetime counters for one actuator. Survive rebinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HopperStats {
    pub attempts: u64,
    pub coins_dispensed: u64,
    pub over_dispenses: u64,
    pub timeouts: u64,
}

/// Result of one motor-on/motor-off cycle.
enum Attempt {
    Single,
    Multiple(u32),
    Timeout,
    Fault,
}

/// Debounced passage counting over raw edge events.
///
/// A passage is a falling edge followed by a rising edge at least the
/// debounce interval later; shorter pulses are false triggers. Tick
/// arithmetic wraps (32-bit microsecond ticks).
struct PassageCounter {
    debounce_us: u32,
    entered_at: Option<u32>,
    passages: u32,
}

impl PassageCounter {
    fn new(debounce: Duration) -> Self {
        Self {
            debounce_us: debounce.as_micros() as u32,
            entered_at: None,
            passages: 0,
        }
    }

    fn observe(&mut self, event: EdgeEvent) {
        match event.edge {
            Edge::Falling => {
                if self.entered_at.is_none() {
                    trace!(tick = event.tick_us, "coin entering sensor");
                    self.entered_at = Some(event.tick_us);
                }
            }
            Edge::Rising => {
                if let Some(entered) = self.entered_at.take() {
                    let held_us = event.tick_us.wrapping_sub(entered);
                    if held_us >= self.debounce_us {
                        self.passages += 1;
                        trace!(held_us, passages = self.passages, "coin passage complete");
                    } else {
                        trace!(held_us, "false trigger, pulse too short");
                    }
                }
            }
        }
    }
}

/// Drives one hopper: a motor-enable output plus a passage-sensor input
/// for a single denomination. Dispenses exactly one verified coin per
/// call, retrying within a bound and aborting outright on over-dispense.
pub struct HopperActuator {
    denomination: Denomination,
    pins: HopperPins,
    timing: HopperTiming,
    link: Option<HopperLink>,
    stats: HopperStats,
}

impl HopperActuator {
    pub fn new(denomination: Denomination, pins: HopperPins, timing: HopperTiming) -> Self {
        Self {
            denomination,
            pins,
            timing,
            link: None,
            stats: HopperStats::default(),
        }
    }

    pub fn denomination(&self) -> Denomination {
        self.denomination
    }

    pub fn stats(&self) -> HopperStats {
        self.stats
    }

    pub fn is_bound(&self) -> bool {
        self.link.is_some()
    }

    /// Binds (or re-binds) this actuator to a connection, replacing its
    /// motor handle and edge stream. Identity and statistics persist.
    pub async fn rebind(&mut self, connection: &dyn HardwareConnection) -> Result<()> {
        let link = connection.bind_hopper(self.pins).await?;
        debug!(
            denomination = %self.denomination,
            sensor = self.pins.sensor_pin,
            enable = self.pins.enable_pin,
            "hopper bound"
        );
        self.link = Some(link);
        Ok(())
    }

    /// Attaches an already-built link directly. Test seam; production code
    /// goes through `rebind`.
    pub fn attach_link(&mut self, link: HopperLink) {
        self.link = Some(link);
    }

    /// Dispenses exactly one coin, verified by sensor feedback.
    ///
    /// Retries up to the configured bound on timeout; an over-dispense
    /// aborts immediately with no further retries. The motor is disabled
    /// after every attempt regardless of outcome, and the settle delay is
    /// applied after the final outcome.
    pub async fn dispense_single_coin(&mut self) -> CoinOutcome {
        let timing = self.timing;
        let Some(link) = self.link.as_mut() else {
            warn!(denomination = %self.denomination, "dispense requested with no hardware link");
            return CoinOutcome::Faulted { attempts: 0 };
        };

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            self.stats.attempts += 1;
            debug!(
                denomination = %self.denomination,
                attempt = attempts,
                max = timing.max_retry_attempts,
                "dispensing one coin"
            );

            match Self::attempt_once(link, &timing).await {
                Attempt::Single => {
                    self.stats.coins_dispensed += 1;
                    debug!(denomination = %self.denomination, attempts, "coin dispensed and verified");
                    break CoinOutcome::Dispensed { attempts };
                }
                Attempt::Multiple(passages) => {
                    self.stats.over_dispenses += 1;
                    warn!(
                        denomination = %self.denomination,
                        passages, "over-dispense detected, aborting retries"
                    );
                    break CoinOutcome::OverDispensed { attempts, passages };
                }
                Attempt::Fault => {
                    warn!(denomination = %self.denomination, "hardware link lost mid-attempt");
                    break CoinOutcome::Faulted { attempts };
                }
                Attempt::Timeout => {
                    self.stats.timeouts += 1;
                    if attempts >= timing.max_retry_attempts {
                        warn!(
                            denomination = %self.denomination,
                            attempts, "no coin passage after all attempts"
                        );
                        break CoinOutcome::TimedOut { attempts };
                    }
                    debug!(denomination = %self.denomination, attempt = attempts, "attempt timed out, retrying");
                    tokio::time::sleep(timing.retry_delay).await;
                }
            }
        };

        tokio::time::sleep(timing.settle_delay).await;
        outcome
    }

    /// One motor cycle: enable, spin up, count passages until exactly one
    /// clean passage, an over-dispense, or the timeout; then disable.
    async fn attempt_once(link: &mut HopperLink, timing: &HopperTiming) -> Attempt {
        // Stale edges from a previous cycle must not count toward this one.
        while link.edges.try_recv().is_ok() {}

        if link.motor.set_enabled(true).await.is_err() {
            return Attempt::Fault;
        }
        tokio::time::sleep(timing.spin_up).await;

        let deadline = Instant::now() + timing.dispense_timeout;
        let mut counter = PassageCounter::new(timing.debounce);

        let result = loop {
            let event = match timeout_at(deadline, link.edges.recv()).await {
                Err(_) => {
                    break if counter.passages == 1 {
                        Attempt::Single
                    } else {
                        Attempt::Timeout
                    };
                }
                Ok(None) => break Attempt::Fault,
                Ok(Some(event)) => event,
            };

            counter.observe(event);
            if counter.passages >= 1 {
                // A second passage already queued behind the first means the
                // motor pushed out more than one coin this cycle.
                while let Ok(event) = link.edges.try_recv() {
                    counter.observe(event);
                }
                break if counter.passages == 1 {
                    Attempt::Single
                } else {
                    Attempt::Multiple(counter.passages)
                };
            }
        };

        // Motor off no matter how the attempt ended.
        let _ = link.motor.set_enabled(false).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn test_timing() -> HopperTiming {
        HopperTiming {
            spin_up: Duration::from_millis(1),
            dispense_timeout: Duration::from_millis(30),
            max_retry_attempts: 5,
            retry_delay: Duration::from_millis(1),
            settle_delay: Duration::from_millis(1),
            debounce: Duration::from_millis(10),
        }
    }

    /// Emits a scripted number of passages each time the motor turns on,
    /// starting at a given enable cycle.
    struct ScriptMotor {
        tx: mpsc::UnboundedSender<EdgeEvent>,
        enables: AtomicU32,
        passages_from_cycle: u32,
        passages: u32,
        pulse_us: u32,
    }

    #[async_trait]
    impl crate::domain::hardware::MotorSwitch for ScriptMotor {
        async fn set_enabled(&self, enabled: bool) -> Result<()> {
            if !enabled {
                return Ok(());
            }
            let cycle = self.enables.fetch_add(1, Ordering::SeqCst) + 1;
            if cycle >= self.passages_from_cycle {
                let base = cycle * 1_000_000;
                for p in 0..self.passages {
                    let fall = base + p * 100_000;
                    let _ = self.tx.send(EdgeEvent::new(Edge::Falling, fall));
                    let _ = self.tx.send(EdgeEvent::new(Edge::Rising, fall + self.pulse_us));
                }
            }
            Ok(())
        }
    }

    fn scripted_actuator(passages: u32, passages_from_cycle: u32, pulse_us: u32) -> HopperActuator {
        let (tx, rx) = mpsc::unbounded_channel();
        let motor = ScriptMotor {
            tx,
            enables: AtomicU32::new(0),
            passages_from_cycle,
            passages,
            pulse_us,
        };
        let mut actuator =
            HopperActuator::new(Denomination::Five, HopperPins::new(6, 26), test_timing());
        actuator.attach_link(HopperLink {
            motor: Box::new(motor),
            edges: rx,
        });
        actuator
    }

    #[tokio::test]
    async fn test_single_passage_succeeds_first_attempt() {
        let mut actuator = scripted_actuator(1, 1, 20_000);
        let outcome = actuator.dispense_single_coin().await;
        assert_eq!(outcome, CoinOutcome::Dispensed { attempts: 1 });
        assert_eq!(actuator.stats().coins_dispensed, 1);
        assert_eq!(actuator.stats().attempts, 1);
    }

    #[tokio::test]
    async fn test_over_dispense_aborts_without_retry() {
        let mut actuator = scripted_actuator(2, 1, 20_000);
        let outcome = actuator.dispense_single_coin().await;
        assert_eq!(
            outcome,
            CoinOutcome::OverDispensed {
                attempts: 1,
                passages: 2
            }
        );
        assert!(!outcome.is_dispensed());
        assert_eq!(actuator.stats().over_dispenses, 1);
        // Exactly one attempt: over-dispense is never retried.
        assert_eq!(actuator.stats().attempts, 1);
    }

    #[tokio::test]
    async fn test_timeouts_then_success_on_final_attempt() {
        // Silent on attempts 1..4, one clean passage on attempt 5.
        let mut actuator = scripted_actuator(1, 5, 20_000);
        let outcome = actuator.dispense_single_coin().await;
        assert_eq!(outcome, CoinOutcome::Dispensed { attempts: 5 });
        assert_eq!(actuator.stats().timeouts, 4);
        assert_eq!(actuator.stats().coins_dispensed, 1);
    }

    #[tokio::test]
    async fn test_all_attempts_silent_times_out() {
        let mut actuator = scripted_actuator(1, 99, 20_000);
        let outcome = actuator.dispense_single_coin().await;
        assert_eq!(outcome, CoinOutcome::TimedOut { attempts: 5 });
        assert_eq!(actuator.stats().timeouts, 5);
        assert_eq!(actuator.stats().coins_dispensed, 0);
    }

    #[tokio::test]
    async fn test_short_pulse_is_false_trigger() {
        // 2 ms pulse is below the 10 ms debounce, so no passage counts.
        let mut actuator = scripted_actuator(1, 1, 2_000);
        let outcome = actuator.dispense_single_coin().await;
        assert_eq!(outcome, CoinOutcome::TimedOut { attempts: 5 });
    }

    #[tokio::test]
    async fn test_unbound_actuator_faults() {
        let mut actuator =
            HopperActuator::new(Denomination::One, HopperPins::new(21, 16), test_timing());
        let outcome = actuator.dispense_single_coin().await;
        assert_eq!(outcome, CoinOutcome::Faulted { attempts: 0 });
    }

    #[test]
    fn test_passage_counter_wraparound() {
        let mut counter = PassageCounter::new(Duration::from_millis(10));
        // Falling just before the 32-bit tick wraps, rising just after.
        counter.observe(EdgeEvent::new(Edge::Falling, u32::MAX - 5_000));
        counter.observe(EdgeEvent::new(Edge::Rising, 15_000));
        assert_eq!(counter.passages, 1);
    }
}
