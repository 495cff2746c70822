//! Unit newtypes for engineering quantities.
//!
//! Network data arrives in engineering units (MW, Mvar, kV) while every solver
//! works in per-unit on the system MVA base. Wrapping the engineering values
//! keeps the two from being mixed: converting to per-unit is always an
//! explicit call that names the base.
//!
//! ```
//! use volta_core::units::{Megawatts, Degrees};
//!
//! let p = Megawatts(50.0);
//! assert_eq!(p.to_per_unit(100.0), 0.5);
//!
//! let shift = Degrees(30.0).to_radians();
//! assert!((shift.value() - std::f64::consts::FRAC_PI_6).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Div<$type> for $type {
            type Output = f64;
            fn div(self, rhs: $type) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.4} {}", self.0, $unit_name)
            }
        }

        impl $type {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Raw numeric value
            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }
        }

        impl std::iter::Sum for $type {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }
    };
}

// =============================================================================
// Power
// =============================================================================

/// Active power in megawatts (MW)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Megawatts(pub f64);

impl_unit_ops!(Megawatts, "MW");

/// Reactive power in megavolt-amperes reactive (Mvar)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Megavars(pub f64);

impl_unit_ops!(Megavars, "Mvar");

/// Apparent power in megavolt-amperes (MVA)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct MegavoltAmperes(pub f64);

impl_unit_ops!(MegavoltAmperes, "MVA");

impl Megawatts {
    /// Per-unit value on the given MVA base.
    #[inline]
    pub fn to_per_unit(self, base_mva: f64) -> f64 {
        self.0 / base_mva
    }

    /// S = √(P² + Q²)
    #[inline]
    pub fn apparent_power(self, q: Megavars) -> MegavoltAmperes {
        MegavoltAmperes(self.0.hypot(q.0))
    }
}

impl Megavars {
    /// Per-unit value on the given MVA base.
    #[inline]
    pub fn to_per_unit(self, base_mva: f64) -> f64 {
        self.0 / base_mva
    }
}

impl MegavoltAmperes {
    /// Per-unit value on the given MVA base.
    #[inline]
    pub fn to_per_unit(self, base_mva: f64) -> f64 {
        self.0 / base_mva
    }
}

// =============================================================================
// Voltage
// =============================================================================

/// Voltage magnitude in per-unit (pu)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PerUnit(pub f64);

impl_unit_ops!(PerUnit, "pu");

impl PerUnit {
    pub const ONE: Self = Self(1.0);
}

/// Line-to-line voltage in kilovolts (kV)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kilovolts(pub f64);

impl_unit_ops!(Kilovolts, "kV");

impl PerUnit {
    #[inline]
    pub fn to_kilovolts(self, base_kv: Kilovolts) -> Kilovolts {
        Kilovolts(self.0 * base_kv.0)
    }
}

// =============================================================================
// Angles
// =============================================================================

/// Angle in radians
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Radians(pub f64);

impl_unit_ops!(Radians, "rad");

/// Angle in degrees. Used for every angle stored on the model.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Degrees(pub f64);

impl_unit_ops!(Degrees, "°");

impl Radians {
    #[inline]
    pub fn to_degrees(self) -> Degrees {
        Degrees(self.0.to_degrees())
    }
}

impl Degrees {
    #[inline]
    pub fn to_radians(self) -> Radians {
        Radians(self.0.to_radians())
    }

    pub const ZERO: Self = Self(0.0);
}

// =============================================================================
// Current
// =============================================================================

/// Current in kiloamperes (kA)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct Kiloamperes(pub f64);

impl_unit_ops!(Kiloamperes, "kA");

/// Current in per-unit (pu)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct CurrentPu(pub f64);

impl_unit_ops!(CurrentPu, "pu");

/// Base current I_base = S_base / (√3 · V_base), in kA for MVA and kV.
#[inline]
pub fn base_current_ka(base_mva: f64, base_kv: Kilovolts) -> Kiloamperes {
    if base_kv.0.abs() < 1e-12 {
        Kiloamperes(0.0)
    } else {
        Kiloamperes(base_mva / (3.0_f64.sqrt() * base_kv.0))
    }
}

impl CurrentPu {
    /// Convert to kiloamperes at a bus of the given nominal voltage.
    #[inline]
    pub fn to_kiloamperes(self, base_mva: f64, base_kv: Kilovolts) -> Kiloamperes {
        Kiloamperes(self.0 * base_current_ka(base_mva, base_kv).0)
    }
}

impl Kiloamperes {
    #[inline]
    pub fn to_amperes(self) -> f64 {
        self.0 * 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_megawatts_arithmetic() {
        let p1 = Megawatts(100.0);
        let p2 = Megawatts(50.0);

        assert_eq!((p1 + p2).value(), 150.0);
        assert_eq!((p1 - p2).value(), 50.0);
        assert_eq!((-p1).value(), -100.0);
        assert_eq!((p1 * 2.0).value(), 200.0);
        assert_eq!(p1 / p2, 2.0);
    }

    #[test]
    fn test_per_unit_conversion() {
        assert_eq!(Megawatts(50.0).to_per_unit(100.0), 0.5);
        assert_eq!(Megavars(-20.0).to_per_unit(100.0), -0.2);
        assert_eq!(MegavoltAmperes(250.0).to_per_unit(100.0), 2.5);
    }

    #[test]
    fn test_apparent_power() {
        let s = Megawatts(30.0).apparent_power(Megavars(40.0));
        assert!((s.value() - 50.0).abs() < 1e-10);
    }

    #[test]
    fn test_angle_conversion() {
        let rad = Degrees(180.0).to_radians();
        assert!((rad.value() - std::f64::consts::PI).abs() < 1e-10);
        assert!((rad.to_degrees().value() - 180.0).abs() < 1e-10);
    }

    #[test]
    fn test_base_current() {
        // 100 MVA at 13.8 kV: 100 / (√3 · 13.8) = 4.1837 kA
        let i_base = base_current_ka(100.0, Kilovolts(13.8));
        assert!((i_base.value() - 4.1837).abs() < 1e-3);

        let i = CurrentPu(20.0).to_kiloamperes(100.0, Kilovolts(13.8));
        assert!((i.value() - 83.674).abs() < 1e-2);
        assert!((i.to_amperes() - 83_674.0).abs() < 10.0);
    }

    #[test]
    fn test_sum_iterator() {
        let total: Megawatts = vec![Megawatts(10.0), Megawatts(20.0)].into_iter().sum();
        assert_eq!(total.value(), 30.0);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Megawatts(100.0)), "100.0000 MW");
        assert_eq!(format!("{}", PerUnit(1.0)), "1.0000 pu");
    }
}
