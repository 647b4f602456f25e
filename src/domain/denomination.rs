use serde::{Deserialize, Serialize};

/// Payment amounts a customer can realistically hand over in one piece,
/// in whole currency units.
pub const ACCEPTED_TENDER: [u64; 6] = [1, 5, 10, 20, 50, 100];

/// Bill denominations used when suggesting round-up payments.
pub const BILL_DENOMINATIONS: [u64; 6] = [20, 50, 100, 200, 500, 1000];

/// One of the two coin denominations the hoppers can dispense.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Denomination {
    One,
    Five,
}

impl Denomination {
    /// Both denominations, largest first (the dispense order).
    pub const ALL: [Denomination; 2] = [Denomination::Five, Denomination::One];

    /// Coin value in whole currency units.
    pub fn unit_value(self) -> u64 {
        match self {
            Denomination::One => 1,
            Denomination::Five => 5,
        }
    }

    /// Settings key holding the reserve threshold for this denomination.
    pub fn threshold_key(self) -> &'static str {
        match self {
            Denomination::One => "min_coin_threshold_1",
            Denomination::Five => "min_coin_threshold_5",
        }
    }
}

impl std::fmt::Display for Denomination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-unit", self.unit_value())
    }
}
