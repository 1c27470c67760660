use std::fmt;

use alloy::primitives::U256;
use fastnum::{UD64, decimal::UnsignedDecimal};

/// Decimals the gas multiplier is fixed to before integer math.
const MULTIPLIER_DECIMALS: u8 = 4;

/// Fixed-point to decimal converter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Converter {
    decimals: i32,
}

impl Converter {
    pub(crate) fn new(decimals: u8) -> Self {
        Self {
            decimals: decimals as i32,
        }
    }

    pub fn to_unsigned<const N: usize>(&self, value: UnsignedDecimal<N>) -> U256 {
        let rescaled = value.rescale(self.decimals as i16);
        U256::from_le_slice(rescaled.digits().to_radix_le(256).as_slice())
    }
}

/// Multiplier applied to gas estimates to produce transaction gas limits.
#[derive(Clone, Copy, derive_more::Debug)]
pub struct GasMultiplier {
    #[debug("{value}")]
    value: UD64,
    scaled: U256,
}

impl GasMultiplier {
    pub fn new(value: UD64) -> Self {
        Self {
            value,
            scaled: Converter::new(MULTIPLIER_DECIMALS).to_unsigned(value),
        }
    }

    pub fn value(&self) -> UD64 {
        self.value
    }

    /// Gas limit for the given estimate, rounded up.
    pub fn apply(&self, estimate: u64) -> u64 {
        let denom = U256::from(10u64.pow(MULTIPLIER_DECIMALS as u32));
        let limit = (U256::from(estimate) * self.scaled + denom - U256::from(1)) / denom;
        limit.saturating_to()
    }
}

impl Default for GasMultiplier {
    fn default() -> Self {
        Self::new(UD64::ONE)
    }
}

impl fmt::Display for GasMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
