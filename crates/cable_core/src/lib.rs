#![forbid(unsafe_code)]

//! Shared types and the unit contract of the cable-cell core.
//!
//! All public vectors and functions across the workspace use a fixed unit
//! system: mV for membrane potential, ms for time, µm for lengths, µm² for
//! areas, mA/cm² for membrane current densities, nA for point currents,
//! F/m² for specific membrane capacitance, Ω·cm for axial resistivity and
//! mM for ion concentrations. The scale constants below reconcile those
//! units inside the implicit voltage update and must change together with
//! the mechanism current units if they change at all.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Index of a control volume within one cell's discretization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CvIndex(pub usize);

/// Identifier of a point-process mechanism within one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MechanismId(pub u32);

/// Event target local to one point-process mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetId(pub u32);

/// Converts face coupling terms `dt · α` (ms·µm / (F/m² · Ω·cm)) to µm²,
/// the unit of the matrix diagonal.
pub const FACE_AREA_SCALE: f64 = 1e5;

/// Converts `dt · I / c_m` (ms · mA/cm² / (F/m²)) to mV.
pub const CURRENT_TO_VOLTAGE_SCALE: f64 = 10.0;

/// Converts a point current in nA spread over an area in µm² to mA/cm².
pub const POINT_CURRENT_SCALE: f64 = 100.0;

/// Membrane resting potential in mV; voltages start here.
pub const RESTING_POTENTIAL_MV: f64 = -65.0;

/// Ion species a mechanism may read or write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IonKind {
    Na,
    K,
    Ca,
}

impl IonKind {
    pub const ALL: [IonKind; 3] = [IonKind::Na, IonKind::K, IonKind::Ca];

    pub fn name(self) -> &'static str {
        match self {
            IonKind::Na => "na",
            IonKind::K => "k",
            IonKind::Ca => "ca",
        }
    }
}

/// Initial reversal potential (mV) and internal/external concentrations (mM)
/// of one ion species.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IonDefaults {
    pub reversal_potential: f64,
    pub internal_concentration: f64,
    pub external_concentration: f64,
}

/// Default ion values, matching NEURON's membdef.h table.
pub fn ion_defaults(kind: IonKind) -> IonDefaults {
    match kind {
        IonKind::Na => IonDefaults {
            reversal_potential: 115.0 + RESTING_POTENTIAL_MV,
            internal_concentration: 10.0,
            external_concentration: 140.0,
        },
        IonKind::K => IonDefaults {
            reversal_potential: -12.0 + RESTING_POTENTIAL_MV,
            internal_concentration: 54.4,
            external_concentration: 2.5,
        },
        IonKind::Ca => IonDefaults {
            reversal_potential: 12.5 * (2.0_f64 / 5e-5).ln(),
            internal_concentration: 5e-5,
            external_concentration: 2.0,
        },
    }
}

/// Surface area of a sphere of radius `r`.
pub fn area_sphere(r: f64) -> f64 {
    4.0 * PI * r * r
}

/// Area of a circle of radius `r`.
pub fn area_circle(r: f64) -> f64 {
    PI * r * r
}

/// Lateral surface area of a cone frustum of height `h` and end radii
/// `a` and `b`.
pub fn area_frustum(h: f64, a: f64, b: f64) -> f64 {
    PI * (a + b) * (h * h + (a - b) * (a - b)).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_degenerates_to_cylinder() {
        let lateral = area_frustum(10.0, 2.0, 2.0);
        assert!((lateral - 2.0 * PI * 2.0 * 10.0).abs() < 1e-12);
    }

    #[test]
    fn frustum_is_additive_along_a_taper() {
        // Splitting a frustum at the midpoint must conserve lateral area.
        let whole = area_frustum(10.0, 1.0, 3.0);
        let left = area_frustum(5.0, 1.0, 2.0);
        let right = area_frustum(5.0, 2.0, 3.0);
        assert!((whole - (left + right)).abs() < 1e-9);
    }

    #[test]
    fn ion_defaults_match_the_contract() {
        assert_eq!(ion_defaults(IonKind::Na).reversal_potential, 50.0);
        assert_eq!(ion_defaults(IonKind::K).reversal_potential, -77.0);
        let ca = ion_defaults(IonKind::Ca).reversal_potential;
        assert!((ca - 132.457).abs() < 1e-2);
    }
}
