use crate::domain::change::{
    CoinCounts, Feasibility, FeasibilityReason, PaymentSuggestion, SuggestionPriority,
    SuggestionReason, to_units,
};
use crate::domain::denomination::{ACCEPTED_TENDER, BILL_DENOMINATIONS, Denomination};
use crate::domain::ports::{InventoryStoreBox, SettingsStoreBox};
use crate::error::{ChangeError, Result};
use rust_decimal::Decimal;
use tracing::debug;

/// Change candidates offered as "pay a little extra" suggestions go up to
/// this much change.
const SMALL_CHANGE_LIMIT: u64 = 20;
/// Suggestions with change at or below this rank as high priority.
const SMALL_CHANGE_HIGH_PRIORITY: u64 = 5;
/// At most this many ranked suggestions are returned.
const MAX_SUGGESTIONS: usize = 5;

/// Validated feasibility settings, loaded once per computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum coin counts that must remain after a dispense.
    pub reserve_thresholds: CoinCounts,
    /// Ceiling on total change in a single transaction, in whole units.
    pub max_change_limit: u64,
}

impl EngineConfig {
    pub const DEFAULT_MAX_CHANGE_LIMIT: u64 = 50;

    /// Reads and validates settings. Missing keys fall back to defaults;
    /// malformed or negative values are rejected outright rather than
    /// flowing into the feasibility arithmetic.
    pub async fn load(settings: &SettingsStoreBox) -> Result<Self> {
        let mut reserve_thresholds = CoinCounts::ZERO;
        for denomination in Denomination::ALL {
            let key = denomination.threshold_key();
            let threshold = match settings.get(key).await? {
                None => 0,
                Some(raw) => parse_non_negative(key, &raw)?,
            };
            reserve_thresholds.set_count(denomination, threshold);
        }

        let max_change_limit = match settings.get("max_change_limit").await? {
            None => Self::DEFAULT_MAX_CHANGE_LIMIT,
            Some(raw) => {
                // Stored as int or float by the settings layer.
                let value: Decimal =
                    raw.trim()
                        .parse()
                        .map_err(|_| ChangeError::InvalidSetting {
                            key: "max_change_limit".into(),
                            value: raw.clone(),
                        })?;
                if value < Decimal::ZERO {
                    return Err(ChangeError::InvalidSetting {
                        key: "max_change_limit".into(),
                        value: raw,
                    });
                }
                to_units(value)
            }
        };

        Ok(Self {
            reserve_thresholds,
            max_change_limit,
        })
    }
}

fn parse_non_negative(key: &str, raw: &str) -> Result<u64> {
    let value: i64 = raw.trim().parse().map_err(|_| ChangeError::InvalidSetting {
        key: key.to_string(),
        value: raw.to_string(),
    })?;
    u64::try_from(value).map_err(|_| ChangeError::InvalidSetting {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

/// Decides, without touching hardware, whether a change amount is
/// currently dispensable, and computes payment suggestions from a live
/// inventory snapshot.
///
/// Settings and inventory are read once per public call; nothing is cached
/// across calls, so results always reflect the store.
pub struct FeasibilityEngine {
    inventory: InventoryStoreBox,
    settings: SettingsStoreBox,
}

impl FeasibilityEngine {
    pub fn new(inventory: InventoryStoreBox, settings: SettingsStoreBox) -> Self {
        Self {
            inventory,
            settings,
        }
    }

    /// Current coin inventory snapshot.
    pub async fn coin_inventory(&self) -> Result<CoinCounts> {
        self.inventory.coin_counts().await
    }

    /// Whether `change` can be dispensed right now, with the reason and the
    /// coins it would take. Infeasibility is an expected outcome, not an
    /// error.
    pub async fn can_dispense_change(&self, change: Decimal) -> Result<Feasibility> {
        if change <= Decimal::ZERO {
            return Ok(Feasibility::feasible(
                FeasibilityReason::NoChangeNeeded,
                CoinCounts::ZERO,
            ));
        }
        let config = EngineConfig::load(&self.settings).await?;
        let inventory = self.inventory.coin_counts().await?;
        Ok(check_change(to_units(change), &inventory, &config))
    }

    /// The most change the machine could currently hand out: inventory
    /// minus reserves, capped by the per-transaction limit.
    pub async fn max_dispensable_change(&self) -> Result<u64> {
        let config = EngineConfig::load(&self.settings).await?;
        let inventory = self.inventory.coin_counts().await?;
        Ok(max_change_capacity(&inventory, &config))
    }

    /// The single best payment suggestion for `total_cost`.
    ///
    /// Scans downward for the largest feasible change to bound the search
    /// (the feasible set is non-contiguous, e.g. feasible at 7 but not 6
    /// once the ones run out, so no closed form applies), then suggests
    /// the nearest round tender above the cost whose change the machine
    /// can fully dispense. Falls back to exact payment.
    pub async fn find_best_payment_amount(&self, total_cost: Decimal) -> Result<PaymentSuggestion> {
        let config = EngineConfig::load(&self.settings).await?;
        let inventory = self.inventory.coin_counts().await?;
        let base = to_units(total_cost);

        let max_possible = max_change_capacity(&inventory, &config);
        let best_change = (1..=max_possible)
            .rev()
            .find(|&change| check_change(change, &inventory, &config).dispensable);
        let Some(best_change) = best_change else {
            debug!(cost = base, "no change dispensable, suggesting exact payment");
            return Ok(PaymentSuggestion::exact(Decimal::from(base)));
        };

        let ceiling = base + best_change;
        let mut candidates: Vec<u64> = ACCEPTED_TENDER
            .iter()
            .map(|d| base.div_ceil(*d) * d)
            .filter(|&amount| amount > base && amount <= ceiling)
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        for amount in candidates {
            let change = amount - base;
            let feasibility = check_change(change, &inventory, &config);
            if feasibility.dispensable {
                debug!(cost = base, amount, change, "best payment found");
                return Ok(PaymentSuggestion {
                    amount: Decimal::from(amount),
                    change: Decimal::from(change),
                    required_coins: feasibility.required_coins,
                    reason: SuggestionReason::RoundTender { tender: amount },
                    priority: SuggestionPriority::High,
                });
            }
        }

        debug!(cost = base, "no round tender fits, suggesting exact payment");
        Ok(PaymentSuggestion::exact(Decimal::from(base)))
    }

    /// A small ranked list of payment suggestions: exact payment first,
    /// then amounts with small dispensable change, then bill round-ups.
    /// Every entry is re-validated against the same snapshot.
    pub async fn find_optimal_payment_amounts(
        &self,
        total_cost: Decimal,
    ) -> Result<Vec<PaymentSuggestion>> {
        let config = EngineConfig::load(&self.settings).await?;
        let inventory = self.inventory.coin_counts().await?;
        let base = to_units(total_cost);

        let max_change = max_change_capacity(&inventory, &config);
        if max_change == 0 {
            return Ok(vec![PaymentSuggestion {
                amount: Decimal::from(base),
                change: Decimal::ZERO,
                required_coins: CoinCounts::ZERO,
                reason: SuggestionReason::NoChangeAvailable,
                priority: SuggestionPriority::High,
            }]);
        }

        let mut suggestions = vec![PaymentSuggestion::exact(Decimal::from(base))];

        for change in 1..=max_change.min(SMALL_CHANGE_LIMIT) {
            let feasibility = check_change(change, &inventory, &config);
            if feasibility.dispensable {
                suggestions.push(PaymentSuggestion {
                    amount: Decimal::from(base + change),
                    change: Decimal::from(change),
                    required_coins: feasibility.required_coins,
                    reason: SuggestionReason::SmallChange { change },
                    priority: if change <= SMALL_CHANGE_HIGH_PRIORITY {
                        SuggestionPriority::High
                    } else {
                        SuggestionPriority::Medium
                    },
                });
            }
        }

        for bill in BILL_DENOMINATIONS {
            if bill <= base {
                continue;
            }
            let change = bill - base;
            if change > max_change {
                continue;
            }
            let feasibility = check_change(change, &inventory, &config);
            if feasibility.dispensable {
                suggestions.push(PaymentSuggestion {
                    amount: Decimal::from(bill),
                    change: Decimal::from(change),
                    required_coins: feasibility.required_coins,
                    reason: SuggestionReason::BillPayment { bill },
                    priority: SuggestionPriority::Medium,
                });
            }
        }

        suggestions.sort_by(|a, b| a.priority.cmp(&b.priority).then(a.amount.cmp(&b.amount)));
        suggestions.truncate(MAX_SUGGESTIONS);
        Ok(suggestions)
    }

    /// Validates a concrete payment against the current change capacity.
    pub async fn validate_payment(
        &self,
        total_cost: Decimal,
        payment: Decimal,
    ) -> Result<PaymentValidation> {
        if payment < total_cost {
            return Ok(PaymentValidation {
                approved: false,
                change: Decimal::ZERO,
                required_coins: CoinCounts::ZERO,
                message: format!("Payment {payment} is less than the total cost {total_cost}"),
            });
        }
        let change = payment - total_cost;
        let feasibility = self.can_dispense_change(change).await?;
        Ok(PaymentValidation {
            approved: feasibility.dispensable,
            change,
            required_coins: feasibility.required_coins,
            message: feasibility.reason.to_string(),
        })
    }

    /// Persists post-dispense inventory: subtracts the *actually* dispensed
    /// counts, saturating at zero. Requested counts must never be written.
    pub async fn commit_dispensed(&self, dispensed: &CoinCounts) -> Result<()> {
        let current = self.inventory.coin_counts().await?;
        for denomination in Denomination::ALL {
            let taken = dispensed.count(denomination);
            if taken == 0 {
                continue;
            }
            let remaining = current.count(denomination).saturating_sub(taken);
            self.inventory
                .set_coin_count(denomination, remaining)
                .await?;
            debug!(
                %denomination,
                taken,
                remaining,
                "inventory updated after dispense"
            );
        }
        Ok(())
    }
}

/// Result of `validate_payment`.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentValidation {
    pub approved: bool,
    pub change: Decimal,
    pub required_coins: CoinCounts,
    pub message: String,
}

/// Pure feasibility check for a whole-unit change amount against one
/// inventory snapshot and config.
fn check_change(units: u64, inventory: &CoinCounts, config: &EngineConfig) -> Feasibility {
    if units == 0 {
        return Feasibility::feasible(FeasibilityReason::NoChangeNeeded, CoinCounts::ZERO);
    }
    let required = CoinCounts::for_units(units);

    if units > config.max_change_limit {
        return Feasibility::infeasible(
            FeasibilityReason::ExceedsChangeLimit {
                requested: units,
                limit: config.max_change_limit,
            },
            required,
        );
    }

    for denomination in Denomination::ALL {
        let needed = required.count(denomination);
        let available = inventory.count(denomination);
        if available < needed {
            return Feasibility::infeasible(
                FeasibilityReason::InsufficientCoins {
                    denomination,
                    required: needed,
                    available,
                },
                required,
            );
        }
    }

    for denomination in Denomination::ALL {
        let threshold = config.reserve_thresholds.count(denomination);
        if threshold == 0 {
            continue;
        }
        let remaining_after =
            inventory.count(denomination) - required.count(denomination);
        if remaining_after < threshold {
            return Feasibility::infeasible(
                FeasibilityReason::ReserveViolation {
                    denomination,
                    remaining_after,
                    threshold,
                },
                required,
            );
        }
    }

    Feasibility::feasible(FeasibilityReason::Dispensable, required)
}

/// Spendable change in whole units: inventory minus reserves, capped.
fn max_change_capacity(inventory: &CoinCounts, config: &EngineConfig) -> u64 {
    let spare_fives = inventory
        .fives
        .saturating_sub(config.reserve_thresholds.fives);
    let spare_ones = inventory
        .ones
        .saturating_sub(config.reserve_thresholds.ones);
    (spare_fives * 5 + spare_ones).min(config.max_change_limit)
}
