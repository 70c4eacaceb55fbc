//! Invariant-coordinate calculators
//!
//! Each calculator maps trace-derived quantities for one position and pitch
//! angle to a coordinate pair (X2, X3):
//!
//! | calculator | X2 | X3 |
//! |------------|----|----|
//! | [`AlphaLm`] | equatorial pitch angle [deg] | Lm |
//! | [`KPhi`] | K [G^½ Re] | Φ [G Re²] |
//! | [`KHmin`] | K [G^½ Re] | Hmin [km] |
//!
//! K always comes from I and Bmirror directly. Φ and Hmin come from a
//! surrogate network so no drift-shell tracing is needed.

use crate::network::Network;
use geomag_field::invariants::k_from;
use geomag_field::{AdiabaticInvariantSet, MagFieldError, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::sync::Arc;

const NT_TO_GAUSS: f64 = 1e-5;

// ============================================================================
// Inputs and limits
// ============================================================================

/// Trace-derived quantities for one (position, pitch angle) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordInputs {
    /// nT
    pub bmin: f64,
    /// Re
    pub i: f64,
    /// nT
    pub bmirror: f64,
    pub lm: f64,
}

impl CoordInputs {
    /// One entry per pitch angle of `set`, in request order.
    pub fn from_invariants(set: &AdiabaticInvariantSet) -> Vec<Self> {
        set.pitch
            .iter()
            .map(|p| Self {
                bmin: set.bmin,
                i: p.i,
                bmirror: p.bmirror,
                lm: p.lm,
            })
            .collect()
    }

    pub fn k(&self) -> f64 {
        k_from(self.i, self.bmirror)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn check(&self, label: &str, value: f64) -> Result<f64> {
        if self.contains(value) {
            Ok(value)
        } else {
            Err(MagFieldError::OutOfRange(format!(
                "{} = {} outside [{}, {}]",
                label, value, self.min, self.max
            )))
        }
    }
}

/// Accepted output ranges per coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SurrogateLimits {
    pub alpha_deg: Bounds,
    pub lm: Bounds,
    pub k: Bounds,
    /// G Re²
    pub phi: Bounds,
    pub hmin_km: Bounds,
}

impl Default for SurrogateLimits {
    fn default() -> Self {
        Self {
            alpha_deg: Bounds::new(0.0, 90.0),
            lm: Bounds::new(0.0, 1000.0),
            k: Bounds::new(0.0, 15.0),
            phi: Bounds::new(0.15849, 2.0),
            hmin_km: Bounds::new(-500.0, 10000.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordPair {
    pub x2: f64,
    pub x3: f64,
}

impl CoordPair {
    pub const NAN: CoordPair = CoordPair {
        x2: f64::NAN,
        x3: f64::NAN,
    };

    pub fn is_nan(&self) -> bool {
        self.x2.is_nan() || self.x3.is_nan()
    }
}

/// Roederer L* of a third invariant Φ [G Re²] for dipole moment `b0_nt`.
pub fn lstar_from_phi(phi: f64, b0_nt: f64) -> f64 {
    2.0 * PI * b0_nt * NT_TO_GAUSS / phi
}

fn log10_positive(label: &str, value: f64) -> Result<f64> {
    if value > 0.0 && value.is_finite() {
        Ok(value.log10())
    } else {
        Err(MagFieldError::OutOfRange(format!("{} = {} has no logarithm", label, value)))
    }
}

fn check_inputs(net: &Network, expected: usize, label: &str) -> Result<()> {
    if net.n_inputs() != expected || net.n_outputs() != 1 {
        return Err(MagFieldError::NotInitialized(format!(
            "{} table '{}' is {} -> {}, expected {} -> 1",
            label,
            net.name(),
            net.n_inputs(),
            net.n_outputs(),
            expected
        )));
    }
    Ok(())
}

// ============================================================================
// Calculator contract
// ============================================================================

pub trait CoordCalculator {
    /// Labels of X2 and X3.
    fn labels(&self) -> (&'static str, &'static str);

    fn bounds(&self) -> (Bounds, Bounds);

    /// Network-ready input vector.
    fn normalize(&self, inputs: &CoordInputs) -> Result<DVector<f64>>;

    fn evaluate_network(&self, x_hat: &DVector<f64>) -> DVector<f64>;

    /// Physical (X2, X3) from the network output.
    fn denormalize(&self, inputs: &CoordInputs, y_hat: &DVector<f64>) -> Result<CoordPair>;

    /// OutOfRange when either coordinate leaves its bounds.
    fn calculate(&self, inputs: &CoordInputs) -> Result<CoordPair> {
        let x_hat = self.normalize(inputs)?;
        let y_hat = self.evaluate_network(&x_hat);
        let pair = self.denormalize(inputs, &y_hat)?;
        let (l2, l3) = self.labels();
        let (b2, b3) = self.bounds();
        Ok(CoordPair {
            x2: b2.check(l2, pair.x2)?,
            x3: b3.check(l3, pair.x3)?,
        })
    }

    /// Failed or out-of-range elements become NaN.
    fn calculate_batch(&self, inputs: &[CoordInputs]) -> Vec<CoordPair> {
        inputs
            .iter()
            .map(|i| self.calculate(i).unwrap_or(CoordPair::NAN))
            .collect()
    }
}

// ============================================================================
// Alpha-Lm
// ============================================================================

/// Equatorial pitch angle asin(sqrt(Bmin/Bmirror)) and the traced Lm.
///
/// Both values follow exactly from the traced invariants, so this calculator
/// loads no weight table; its network stage passes the normalized pair
/// through unchanged. A table stored under an Alpha-Lm name is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaLm {
    limits: SurrogateLimits,
}

impl AlphaLm {
    pub fn new(limits: SurrogateLimits) -> Self {
        Self { limits }
    }
}

impl CoordCalculator for AlphaLm {
    fn labels(&self) -> (&'static str, &'static str) {
        ("alpha", "Lm")
    }

    fn bounds(&self) -> (Bounds, Bounds) {
        (self.limits.alpha_deg, self.limits.lm)
    }

    fn normalize(&self, inputs: &CoordInputs) -> Result<DVector<f64>> {
        if !(inputs.bmirror > 0.0 && inputs.bmin > 0.0) {
            return Err(MagFieldError::OutOfRange(format!(
                "Bmin {} / Bmirror {}",
                inputs.bmin, inputs.bmirror
            )));
        }
        Ok(DVector::from_column_slice(&[inputs.bmin / inputs.bmirror, inputs.lm]))
    }

    fn evaluate_network(&self, x_hat: &DVector<f64>) -> DVector<f64> {
        x_hat.clone()
    }

    fn denormalize(&self, _inputs: &CoordInputs, y_hat: &DVector<f64>) -> Result<CoordPair> {
        let ratio = y_hat[0].clamp(0.0, 1.0);
        Ok(CoordPair {
            x2: ratio.sqrt().asin().to_degrees().min(90.0),
            x3: y_hat[1],
        })
    }
}

// ============================================================================
// K-Phi
// ============================================================================

/// Φ from features [K, log10 Bmirror, Lm].
#[derive(Debug, Clone)]
pub struct KPhi {
    net: Arc<Network>,
    limits: SurrogateLimits,
}

impl KPhi {
    pub const N_FEATURES: usize = 3;

    pub fn new(net: Arc<Network>, limits: SurrogateLimits) -> Result<Self> {
        check_inputs(&net, Self::N_FEATURES, "K-Phi")?;
        Ok(Self { net, limits })
    }

    pub fn features(inputs: &CoordInputs) -> Result<[f64; 3]> {
        Ok([inputs.k(), log10_positive("Bmirror", inputs.bmirror)?, inputs.lm])
    }
}

impl CoordCalculator for KPhi {
    fn labels(&self) -> (&'static str, &'static str) {
        ("K", "Phi")
    }

    fn bounds(&self) -> (Bounds, Bounds) {
        (self.limits.k, self.limits.phi)
    }

    fn normalize(&self, inputs: &CoordInputs) -> Result<DVector<f64>> {
        self.net.normalize(&Self::features(inputs)?)
    }

    fn evaluate_network(&self, x_hat: &DVector<f64>) -> DVector<f64> {
        self.net.forward(x_hat)
    }

    fn denormalize(&self, inputs: &CoordInputs, y_hat: &DVector<f64>) -> Result<CoordPair> {
        Ok(CoordPair {
            x2: inputs.k(),
            x3: self.net.denormalize(y_hat)[0],
        })
    }
}

// ============================================================================
// K-Hmin
// ============================================================================

/// Hmin from features [K, log10 Bmirror, log10 Bmin, Lm], plus the table's
/// log10(Bmirror) polynomial.
#[derive(Debug, Clone)]
pub struct KHmin {
    net: Arc<Network>,
    limits: SurrogateLimits,
}

impl KHmin {
    pub const N_FEATURES: usize = 4;

    pub fn new(net: Arc<Network>, limits: SurrogateLimits) -> Result<Self> {
        check_inputs(&net, Self::N_FEATURES, "K-Hmin")?;
        Ok(Self { net, limits })
    }

    pub fn features(inputs: &CoordInputs) -> Result<[f64; 4]> {
        Ok([
            inputs.k(),
            log10_positive("Bmirror", inputs.bmirror)?,
            log10_positive("Bmin", inputs.bmin)?,
            inputs.lm,
        ])
    }
}

impl CoordCalculator for KHmin {
    fn labels(&self) -> (&'static str, &'static str) {
        ("K", "Hmin")
    }

    fn bounds(&self) -> (Bounds, Bounds) {
        (self.limits.k, self.limits.hmin_km)
    }

    fn normalize(&self, inputs: &CoordInputs) -> Result<DVector<f64>> {
        self.net.normalize(&Self::features(inputs)?)
    }

    fn evaluate_network(&self, x_hat: &DVector<f64>) -> DVector<f64> {
        self.net.forward(x_hat)
    }

    fn denormalize(&self, inputs: &CoordInputs, y_hat: &DVector<f64>) -> Result<CoordPair> {
        let log_bm = log10_positive("Bmirror", inputs.bmirror)?;
        Ok(CoordPair {
            x2: inputs.k(),
            x3: self.net.denormalize(y_hat)[0] + self.net.polynomial(log_bm),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::tests::constant_model;

    fn inputs() -> CoordInputs {
        CoordInputs {
            bmin: 100.0,
            i: 0.5,
            bmirror: 1000.0,
            lm: 4.2,
        }
    }

    fn net(nx: usize, value: f64) -> Arc<Network> {
        Arc::new(Network::from_model(constant_model("test", nx, value)).unwrap())
    }

    #[test]
    fn test_alpha_lm_exact() {
        let calc = AlphaLm::default();
        let pair = calc
            .calculate(&CoordInputs {
                bmirror: 200.0,
                ..inputs()
            })
            .unwrap();
        assert!((pair.x2 - 45.0).abs() < 1e-12);
        assert_eq!(pair.x3, 4.2);

        let pair = calc
            .calculate(&CoordInputs {
                bmirror: 100.0,
                ..inputs()
            })
            .unwrap();
        assert!((pair.x2 - 90.0).abs() < 1e-12);
    }

    #[test]
    fn test_k_phi_constant_network() {
        let calc = KPhi::new(net(3, 1.0), SurrogateLimits::default()).unwrap();
        let pair = calc.calculate(&inputs()).unwrap();
        // 0.5 · sqrt(1000 nT in G)
        assert!((pair.x2 - 0.05).abs() < 1e-12);
        assert!((pair.x3 - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_k_phi_out_of_range() {
        let calc = KPhi::new(net(3, 5.0), SurrogateLimits::default()).unwrap();
        let err = calc.calculate(&inputs()).unwrap_err();
        assert!(matches!(err, MagFieldError::OutOfRange(_)));

        let batch = calc.calculate_batch(&[inputs(), inputs()]);
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(CoordPair::is_nan));
    }

    #[test]
    fn test_k_bound_applies() {
        let calc = KPhi::new(net(3, 1.0), SurrogateLimits::default()).unwrap();
        let big_i = CoordInputs {
            i: 500.0,
            ..inputs()
        };
        // K = 50 > 15
        assert!(calc.calculate(&big_i).is_err());
        let batch = calc.calculate_batch(&[inputs(), big_i]);
        assert!(!batch[0].is_nan());
        assert!(batch[1].is_nan());
    }

    #[test]
    fn test_k_hmin_polynomial_correction() {
        let mut model = constant_model("hmin", 4, 200.0);
        model.poly_log10_b = vec![10.0, 0.0];
        let net = Arc::new(Network::from_model(model).unwrap());
        let calc = KHmin::new(net, SurrogateLimits::default()).unwrap();
        let pair = calc.calculate(&inputs()).unwrap();
        // 200 + 10 · log10(1000)
        assert!((pair.x3 - 230.0).abs() < 1e-9);
    }

    #[test]
    fn test_custom_limits() {
        let limits = SurrogateLimits {
            hmin_km: Bounds::new(0.0, 100.0),
            ..Default::default()
        };
        let calc = KHmin::new(net(4, 200.0), limits).unwrap();
        assert!(matches!(
            calc.calculate(&inputs()).unwrap_err(),
            MagFieldError::OutOfRange(_)
        ));
    }

    #[test]
    fn test_table_shape_checked() {
        let err = KPhi::new(net(4, 1.0), SurrogateLimits::default()).unwrap_err();
        assert!(matches!(err, MagFieldError::NotInitialized(_)));
        assert!(KHmin::new(net(3, 1.0), SurrogateLimits::default()).is_err());
    }

    #[test]
    fn test_bad_field_inputs() {
        let calc = KHmin::new(net(4, 200.0), SurrogateLimits::default()).unwrap();
        let bad = CoordInputs {
            bmin: 0.0,
            ..inputs()
        };
        assert!(calc.calculate(&bad).is_err());
        assert!(AlphaLm::default().calculate(&bad).is_err());
    }

    #[test]
    fn test_lstar_from_phi() {
        // Φ = 2π B0 / L*
        let b0 = 29805.9;
        let phi = 2.0 * PI * b0 * 1e-5 / 5.0;
        assert!((lstar_from_phi(phi, b0) - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_limits_json_partial() {
        let limits: SurrogateLimits = serde_json::from_str(r#"{"k": {"min": 0.0, "max": 25.0}}"#).unwrap();
        assert_eq!(limits.k.max, 25.0);
        assert_eq!(limits.phi, SurrogateLimits::default().phi);
    }
}
