//! Oxygen saturation used as the upper calibration bound.

use serde::{Deserialize, Serialize};

/// Temperature (°C) and salinity of the overlying water.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaterConditions {
    pub temperature: f64,
    pub salinity: f64,
}

impl Default for WaterConditions {
    fn default() -> Self {
        Self {
            temperature: 15.0,
            salinity: 35.0,
        }
    }
}

/// Saturation concentration for given water conditions.
pub trait Solubility: Send + Sync {
    fn saturation(&self, temperature_c: f64, salinity: f64) -> f64;
}

/// Garcia & Gordon (1992) fit to the Benson & Krause data, in µmol/kg.
#[derive(Debug, Clone, Copy, Default)]
pub struct GarciaGordon;

const A: [f64; 6] = [5.80871, 3.20291, 4.17887, 5.10006, -9.86643e-2, 3.80369];
const B: [f64; 4] = [-7.01577e-3, -7.70028e-3, -1.13864e-2, -9.51519e-3];
const C0: f64 = -2.75915e-7;

impl Solubility for GarciaGordon {
    fn saturation(&self, temperature_c: f64, salinity: f64) -> f64 {
        let ts = ((298.15 - temperature_c) / (273.15 + temperature_c)).ln();
        let poly = |coeffs: &[f64]| coeffs.iter().rev().fold(0.0, |acc, c| acc * ts + c);
        (poly(&A[..]) + salinity * poly(&B[..]) + C0 * salinity * salinity).exp()
    }
}

/// A constant saturation bound, e.g. the top standard of a sulfide calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedSaturation(pub f64);

impl Solubility for FixedSaturation {
    fn saturation(&self, _temperature_c: f64, _salinity: f64) -> f64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seawater_at_twenty_degrees() {
        let c = GarciaGordon.saturation(20.0, 35.0);
        assert!((220.0..232.0).contains(&c), "c={c}");
    }

    #[test]
    fn cold_fresh_water_holds_more_oxygen() {
        let cold = GarciaGordon.saturation(0.0, 0.0);
        assert!((440.0..470.0).contains(&cold), "cold={cold}");
        assert!(cold > GarciaGordon.saturation(25.0, 0.0));
        assert!(GarciaGordon.saturation(10.0, 0.0) > GarciaGordon.saturation(10.0, 35.0));
    }

    #[test]
    fn fixed_ignores_conditions() {
        assert_eq!(FixedSaturation(120.0).saturation(4.0, 30.0), 120.0);
    }
}
