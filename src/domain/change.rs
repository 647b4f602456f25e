use crate::domain::denomination::Denomination;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

/// Rounds a monetary amount to whole currency units, clamping below zero.
///
/// Fractional coins are not modeled; amounts round to the nearest whole unit
/// the same way the settings and pricing layers do.
pub fn to_units(amount: Decimal) -> u64 {
    amount.round().to_u64().unwrap_or(0)
}

/// Per-denomination coin counts.
///
/// Used for inventory snapshots, change breakdowns, reserve thresholds, and
/// dispense tallies alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CoinCounts {
    pub ones: u64,
    pub fives: u64,
}

impl CoinCounts {
    pub const ZERO: Self = Self { ones: 0, fives: 0 };

    pub fn new(ones: u64, fives: u64) -> Self {
        Self { ones, fives }
    }

    /// Canonical (minimal-coin) breakdown of a whole-unit amount.
    ///
    /// Greedy is optimal here because 5 is an integer multiple of 1.
    pub fn for_units(units: u64) -> Self {
        Self {
            fives: units / 5,
            ones: units % 5,
        }
    }

    /// Total value of these coins in whole currency units.
    pub fn units(&self) -> u64 {
        self.fives * 5 + self.ones
    }

    pub fn is_zero(&self) -> bool {
        self.ones == 0 && self.fives == 0
    }

    pub fn count(&self, denomination: Denomination) -> u64 {
        match denomination {
            Denomination::One => self.ones,
            Denomination::Five => self.fives,
        }
    }

    pub fn set_count(&mut self, denomination: Denomination, count: u64) {
        match denomination {
            Denomination::One => self.ones = count,
            Denomination::Five => self.fives = count,
        }
    }
}

/// Outcome of one `dispense_change` operation.
///
/// `success` means the operation ran to completion; a shortfall shows up as
/// `dispensed_coins` falling short of `requested_coins`, never as an error.
/// Callers reconcile inventory against the *dispensed* counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispenseResult {
    pub success: bool,
    pub requested_coins: CoinCounts,
    pub dispensed_coins: CoinCounts,
    pub actual_change: Decimal,
    pub expected_change: Decimal,
}

impl DispenseResult {
    /// A completed no-op dispense (zero or negative amount requested).
    pub fn empty_success() -> Self {
        Self {
            success: true,
            requested_coins: CoinCounts::ZERO,
            dispensed_coins: CoinCounts::ZERO,
            actual_change: Decimal::ZERO,
            expected_change: Decimal::ZERO,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.success && self.dispensed_coins == self.requested_coins
    }
}

/// Why a change amount is (or is not) dispensable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FeasibilityReason {
    NoChangeNeeded,
    Dispensable,
    ExceedsChangeLimit {
        requested: u64,
        limit: u64,
    },
    InsufficientCoins {
        denomination: Denomination,
        required: u64,
        available: u64,
    },
    ReserveViolation {
        denomination: Denomination,
        remaining_after: u64,
        threshold: u64,
    },
}

impl std::fmt::Display for FeasibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoChangeNeeded => write!(f, "No change needed"),
            Self::Dispensable => write!(f, "Change can be dispensed"),
            Self::ExceedsChangeLimit { requested, limit } => write!(
                f,
                "Change of {requested} exceeds the per-transaction limit of {limit}"
            ),
            Self::InsufficientCoins {
                denomination,
                required,
                available,
            } => write!(
                f,
                "Insufficient {denomination} coins: required {required}, available {available}"
            ),
            Self::ReserveViolation {
                denomination,
                remaining_after,
                threshold,
            } => write!(
                f,
                "Dispensing would leave {remaining_after} {denomination} coins, below the reserve of {threshold}"
            ),
        }
    }
}

/// Verdict of a feasibility check, with the coins the change would take.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Feasibility {
    pub dispensable: bool,
    pub reason: FeasibilityReason,
    pub required_coins: CoinCounts,
}

impl Feasibility {
    pub fn feasible(reason: FeasibilityReason, required_coins: CoinCounts) -> Self {
        Self {
            dispensable: true,
            reason,
            required_coins,
        }
    }

    pub fn infeasible(reason: FeasibilityReason, required_coins: CoinCounts) -> Self {
        Self {
            dispensable: false,
            reason,
            required_coins,
        }
    }
}

/// Ranking bucket for payment suggestions; lower sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestionPriority {
    Highest,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SuggestionReason {
    ExactPayment,
    NoChangeAvailable,
    SmallChange { change: u64 },
    RoundTender { tender: u64 },
    BillPayment { bill: u64 },
}

impl std::fmt::Display for SuggestionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExactPayment => write!(f, "Exact payment - no change needed"),
            Self::NoChangeAvailable => {
                write!(f, "No change available - exact payment required")
            }
            Self::SmallChange { change } => write!(f, "Payment with {change} change"),
            Self::RoundTender { tender } => {
                write!(f, "Nearest round payment we can fully change: {tender}")
            }
            Self::BillPayment { bill } => write!(f, "Pay with a {bill} bill"),
        }
    }
}

/// One suggested payment amount, computed from a live inventory snapshot.
///
/// Ephemeral: recomputed on demand and never cached across inventory
/// mutations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentSuggestion {
    pub amount: Decimal,
    pub change: Decimal,
    pub required_coins: CoinCounts,
    pub reason: SuggestionReason,
    pub priority: SuggestionPriority,
}

impl PaymentSuggestion {
    /// Exact payment of `amount`, no change involved.
    pub fn exact(amount: Decimal) -> Self {
        Self {
            amount,
            change: Decimal::ZERO,
            required_coins: CoinCounts::ZERO,
            reason: SuggestionReason::ExactPayment,
            priority: SuggestionPriority::Highest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_canonical_breakdown_identity() {
        for units in 0..=500 {
            let counts = CoinCounts::for_units(units);
            assert_eq!(counts.fives, units / 5);
            assert_eq!(counts.ones, units % 5);
            assert_eq!(counts.units(), units);
            assert!(counts.ones < 5, "canonical breakdown never uses 5+ ones");
        }
    }

    #[test]
    fn test_to_units_rounds_to_nearest_whole() {
        assert_eq!(to_units(dec!(7)), 7);
        assert_eq!(to_units(dec!(7.4)), 7);
        assert_eq!(to_units(dec!(7.6)), 8);
        assert_eq!(to_units(dec!(-3)), 0);
    }

    #[test]
    fn test_counts_accessors() {
        let mut counts = CoinCounts::new(3, 2);
        assert_eq!(counts.count(Denomination::One), 3);
        assert_eq!(counts.count(Denomination::Five), 2);
        assert_eq!(counts.units(), 13);

        counts.set_count(Denomination::Five, 4);
        assert_eq!(counts.units(), 23);
    }

    #[test]
    fn test_empty_success_result() {
        let result = DispenseResult::empty_success();
        assert!(result.success);
        assert!(result.is_complete());
        assert_eq!(result.actual_change, Decimal::ZERO);
    }
}
