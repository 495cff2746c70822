//! Phasor helpers and symmetrical components.
//!
//! All complex arithmetic uses [`num_complex::Complex64`]. This module adds
//! the pieces power engineers reach for on top of it: polar construction in
//! degrees, the Fortescue operator `a = 1∠120°`, and conversion between
//! sequence (0, 1, 2) and phase (a, b, c) quantities.
//!
//! ```text
//!   ┌ Va ┐   ┌ 1  1   1  ┐ ┌ V0 ┐
//!   │ Vb │ = │ 1  a²  a  │ │ V1 │
//!   └ Vc ┘   └ 1  a   a² ┘ └ V2 ┘
//! ```

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Build a phasor from magnitude and angle in degrees.
#[inline]
pub fn polar_deg(magnitude: f64, angle_deg: f64) -> Complex64 {
    Complex64::from_polar(magnitude, angle_deg.to_radians())
}

/// The Fortescue operator a = 1∠120°.
#[inline]
pub fn fortescue_a() -> Complex64 {
    polar_deg(1.0, 120.0)
}

/// Magnitude/angle accessors with engineering names.
pub trait PhasorExt {
    fn magnitude(&self) -> f64;
    fn angle_deg(&self) -> f64;
}

impl PhasorExt for Complex64 {
    #[inline]
    fn magnitude(&self) -> f64 {
        self.norm()
    }

    #[inline]
    fn angle_deg(&self) -> f64 {
        self.arg().to_degrees()
    }
}

/// Zero, positive and negative sequence components of a three-phase quantity.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SequenceComponents {
    pub zero: Complex64,
    pub positive: Complex64,
    pub negative: Complex64,
}

/// Phase a, b, c quantities.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseComponents {
    pub a: Complex64,
    pub b: Complex64,
    pub c: Complex64,
}

impl SequenceComponents {
    pub fn new(zero: Complex64, positive: Complex64, negative: Complex64) -> Self {
        Self {
            zero,
            positive,
            negative,
        }
    }

    /// A balanced set containing only a positive-sequence component.
    pub fn positive_only(positive: Complex64) -> Self {
        Self {
            positive,
            ..Self::default()
        }
    }

    pub fn from_phases(phases: &PhaseComponents) -> Self {
        phases.to_sequence()
    }

    /// Synthesis: phase quantities from sequence quantities.
    pub fn to_phases(&self) -> PhaseComponents {
        let a = fortescue_a();
        let a2 = a * a;
        PhaseComponents {
            a: self.zero + self.positive + self.negative,
            b: self.zero + a2 * self.positive + a * self.negative,
            c: self.zero + a * self.positive + a2 * self.negative,
        }
    }
}

impl PhaseComponents {
    /// Analysis: sequence quantities from phase quantities.
    pub fn to_sequence(&self) -> SequenceComponents {
        let a = fortescue_a();
        let a2 = a * a;
        SequenceComponents {
            zero: (self.a + self.b + self.c) / 3.0,
            positive: (self.a + a * self.b + a2 * self.c) / 3.0,
            negative: (self.a + a2 * self.b + a * self.c) / 3.0,
        }
    }

    pub fn magnitudes(&self) -> [f64; 3] {
        [self.a.norm(), self.b.norm(), self.c.norm()]
    }

    /// Largest of the three phase magnitudes.
    pub fn max_magnitude(&self) -> f64 {
        self.magnitudes().into_iter().fold(0.0, f64::max)
    }

    /// Residual (neutral/ground) quantity a + b + c.
    pub fn residual(&self) -> Complex64 {
        self.a + self.b + self.c
    }
}
