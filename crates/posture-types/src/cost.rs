//! Fixed-point planning cost.
//!
//! Edge costs, goal costs, and route lengths are all expressed in one unit
//! (one metre of walking is one unit) and stored as thousandths in a `u64`.
//! Integer storage gives costs a total order, so they can key the
//! `BTreeSet` priority queues used by every search in the planner.

use core::fmt;
use core::iter::Sum;
use core::ops::Add;

use serde::{Deserialize, Serialize};

/// Thousandths per cost unit.
const SCALE: f64 = 1000.0;

/// Largest representable cost, used as "unreachable".
const MAX_MILLI: u64 = u64::MAX / 4;

/// A non-negative planning cost with millesimal precision.
///
/// Serialized as a plain floating-point number of units so configuration
/// files can write `sit: 1.5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Cost(u64);

impl Cost {
    /// Zero cost.
    pub const ZERO: Self = Self(0);

    /// Saturated cost standing in for "unreachable".
    pub const MAX: Self = Self(MAX_MILLI);

    /// Cost from thousandths of a unit.
    pub const fn from_milli(milli: u64) -> Self {
        if milli > MAX_MILLI {
            Self(MAX_MILLI)
        } else {
            Self(milli)
        }
    }

    /// Cost from a whole number of units.
    pub fn from_units(units: u32) -> Self {
        Self(u64::from(units).saturating_mul(1000))
    }

    /// Cost from a floating-point number of units. Negative and NaN values
    /// clamp to zero, huge values to [`Cost::MAX`].
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn new(units: f64) -> Self {
        if units.is_nan() || units <= 0.0 {
            return Self::ZERO;
        }
        let milli = (units * SCALE).round();
        if milli >= MAX_MILLI as f64 {
            Self::MAX
        } else {
            Self(milli as u64)
        }
    }

    /// Thousandths of a unit.
    pub const fn milli(self) -> u64 {
        self.0
    }

    /// Value in units.
    #[allow(clippy::cast_precision_loss)]
    pub fn units(self) -> f64 {
        self.0 as f64 / SCALE
    }

    /// Whether this cost is [`Cost::MAX`].
    pub const fn is_max(self) -> bool {
        self.0 >= MAX_MILLI
    }

    /// Sum clamped at [`Cost::MAX`].
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self::from_milli(self.0.saturating_add(other.0))
    }

    /// Difference clamped at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Sum, or `None` past [`Cost::MAX`].
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(sum) if sum <= MAX_MILLI => Some(Self(sum)),
            _ => None,
        }
    }

    /// Cost scaled by a non-negative factor.
    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self::new(self.units() * factor)
    }
}

impl Add for Cost {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

impl From<f64> for Cost {
    fn from(units: f64) -> Self {
        Self::new(units)
    }
}

impl From<Cost> for f64 {
    fn from(cost: Cost) -> Self {
        cost.units()
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversion_rounds_to_milli() {
        assert_eq!(Cost::new(1.5).milli(), 1500);
        assert_eq!(Cost::new(0.0004).milli(), 0);
        assert_eq!(Cost::new(-3.0), Cost::ZERO);
        assert_eq!(Cost::new(f64::NAN), Cost::ZERO);
        assert_eq!(Cost::from_units(2), Cost::new(2.0));
    }

    #[test]
    fn addition_saturates() {
        assert_eq!(Cost::MAX + Cost::from_units(1), Cost::MAX);
        assert!(Cost::MAX.checked_add(Cost::from_milli(1)).is_none());
        assert_eq!(Cost::from_units(1).saturating_sub(Cost::from_units(2)), Cost::ZERO);
    }

    #[test]
    fn sum_and_display() {
        let total: Cost = [Cost::new(0.25), Cost::new(1.5), Cost::from_milli(1)]
            .into_iter()
            .sum();
        assert_eq!(total.to_string(), "1.751");
    }

    #[test]
    fn serializes_as_units() {
        let json = serde_json::to_string(&Cost::new(2.5)).unwrap_or_default();
        assert_eq!(json, "2.5");
        let back: Cost = serde_json::from_str("0.75").unwrap_or_default();
        assert_eq!(back.milli(), 750);
    }
}
