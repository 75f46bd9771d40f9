use derive_more::{Add, AddAssign, Sum};
use serde::{Deserialize, Serialize};

pub type ResourceUnits = u32;
pub type ResourceFractions = u32;

pub const FRACTIONS_PER_UNIT: ResourceFractions = 10_000;

/// Fixed-point amount of a resource (vcpus, GB, Gbps) with four decimal digits.
///
/// Amounts are compared exactly, which is what resource compatibility checks rely on.
#[derive(
    Debug,
    Default,
    Serialize,
    Deserialize,
    Clone,
    Copy,
    Hash,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    AddAssign,
    Add,
    Sum,
)]
#[serde(transparent)]
pub struct ResourceAmount(u64);

impl ResourceAmount {
    pub const ZERO: ResourceAmount = ResourceAmount(0);

    pub fn new(units: ResourceUnits, fractions: ResourceFractions) -> Self {
        assert!(fractions < FRACTIONS_PER_UNIT);
        ResourceAmount(units as u64 * FRACTIONS_PER_UNIT as u64 + fractions as u64)
    }

    pub fn new_units(units: ResourceUnits) -> Self {
        ResourceAmount(units as u64 * FRACTIONS_PER_UNIT as u64)
    }

    /// Rounds to the nearest representable amount; negative values become zero.
    pub fn from_f64(value: f64) -> Self {
        if value <= 0.0 || value.is_nan() {
            return Self::ZERO;
        }
        ResourceAmount((value * FRACTIONS_PER_UNIT as f64).round() as u64)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn units(&self) -> ResourceUnits {
        (self.0 / (FRACTIONS_PER_UNIT as u64)) as ResourceUnits
    }

    pub fn fractions(&self) -> ResourceFractions {
        (self.0 % (FRACTIONS_PER_UNIT as u64)) as ResourceFractions
    }

    pub fn saturating_sub(self, other: ResourceAmount) -> ResourceAmount {
        ResourceAmount(self.0.saturating_sub(other.0))
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / FRACTIONS_PER_UNIT as f64
    }
}

impl From<ResourceUnits> for ResourceAmount {
    fn from(units: ResourceUnits) -> Self {
        ResourceAmount::new_units(units)
    }
}

impl From<f64> for ResourceAmount {
    fn from(value: f64) -> Self {
        ResourceAmount::from_f64(value)
    }
}

impl std::fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let fractions = self.fractions();
        write!(f, "{}", self.units())?;
        if fractions != 0 {
            let num = format!("{fractions:04}");
            write!(f, ".{}", num.trim_end_matches('0'))?;
        }
        Ok(())
    }
}
