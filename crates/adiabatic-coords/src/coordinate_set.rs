//! Coordinate sets over a field engine
//!
//! Traces each position once through [`MagField::compute_ad_invariants`] and
//! hands the per-angle results to the calculators. A position that cannot be
//! traced, or an angle whose coordinates fall outside the limits, yields NaN
//! for the affected entries while the batch itself succeeds.

use crate::calculators::{
    lstar_from_phi, AlphaLm, CoordCalculator, CoordInputs, KHmin, KPhi, SurrogateLimits,
};
use crate::store::{SurrogateStore, K_HMIN_TABLE, K_PHI_TABLE};
use geomag_field::invariants::pitch_angle_sines;
use geomag_field::{MagField, MagFieldError, Position, Result, TimeValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Per-position coordinates, one entry per pitch angle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateSet {
    pub pitch_angles: Vec<f64>,
    /// Equatorial pitch angle, degrees
    pub alpha: Vec<f64>,
    pub lm: Vec<f64>,
    pub k: Vec<f64>,
    pub phi: Vec<f64>,
    /// km
    pub hmin: Vec<f64>,
    pub lstar: Vec<f64>,
}

impl CoordinateSet {
    fn nan(pitch_angles: &[f64]) -> Self {
        let n = pitch_angles.len();
        Self {
            pitch_angles: pitch_angles.to_vec(),
            alpha: vec![f64::NAN; n],
            lm: vec![f64::NAN; n],
            k: vec![f64::NAN; n],
            phi: vec![f64::NAN; n],
            hmin: vec![f64::NAN; n],
            lstar: vec![f64::NAN; n],
        }
    }

    pub fn len(&self) -> usize {
        self.pitch_angles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pitch_angles.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct CoordinateModel {
    field: MagField,
    limits: SurrogateLimits,
    alpha_lm: AlphaLm,
    k_phi: Option<KPhi>,
    k_hmin: Option<KHmin>,
}

impl CoordinateModel {
    /// Alpha-Lm only; Φ, Hmin and L* stay NaN until a table is attached.
    pub fn new(field: MagField, limits: SurrogateLimits) -> Self {
        Self {
            field,
            limits,
            alpha_lm: AlphaLm::new(limits),
            k_phi: None,
            k_hmin: None,
        }
    }

    /// Attach the K-Phi and K-Hmin tables found in `store`.
    pub fn from_store(field: MagField, store: &SurrogateStore, limits: SurrogateLimits) -> Result<Self> {
        let mut model = Self::new(field, limits);
        if let Ok(net) = store.load_surrogate(K_PHI_TABLE) {
            model.k_phi = Some(KPhi::new(net, limits)?);
        }
        if let Ok(net) = store.load_surrogate(K_HMIN_TABLE) {
            model.k_hmin = Some(KHmin::new(net, limits)?);
        }
        info!(
            "Coordinate model: K-Phi {}, K-Hmin {}",
            if model.k_phi.is_some() { "loaded" } else { "absent" },
            if model.k_hmin.is_some() { "loaded" } else { "absent" }
        );
        Ok(model)
    }

    pub fn with_k_phi(mut self, calc: KPhi) -> Self {
        self.k_phi = Some(calc);
        self
    }

    pub fn with_k_hmin(mut self, calc: KHmin) -> Self {
        self.k_hmin = Some(calc);
        self
    }

    pub fn field(&self) -> &MagField {
        &self.field
    }

    pub fn field_mut(&mut self) -> &mut MagField {
        &mut self.field
    }

    /// The same pitch angles at every position.
    pub fn compute_coordinate_set(
        &mut self,
        times: &[TimeValue],
        positions: &[Position],
        pitch_angles_deg: &[f64],
    ) -> Result<Vec<CoordinateSet>> {
        pitch_angle_sines(pitch_angles_deg)?;
        check_times(times, positions.len())?;
        positions
            .iter()
            .enumerate()
            .map(|(i, p)| self.compute_one(&time_for(times, i), p, pitch_angles_deg))
            .collect()
    }

    /// A separate pitch-angle list per position.
    pub fn compute_coordinate_set_var_pitch(
        &mut self,
        times: &[TimeValue],
        positions: &[Position],
        pitch_angles_deg: &[Vec<f64>],
    ) -> Result<Vec<CoordinateSet>> {
        check_times(times, positions.len())?;
        if pitch_angles_deg.len() != positions.len() {
            return Err(MagFieldError::InsufficientStorage {
                needed: positions.len(),
                available: pitch_angles_deg.len(),
            });
        }
        for angles in pitch_angles_deg {
            pitch_angle_sines(angles)?;
        }
        positions
            .iter()
            .zip(pitch_angles_deg)
            .enumerate()
            .map(|(i, (p, angles))| self.compute_one(&time_for(times, i), p, angles))
            .collect()
    }

    fn compute_one(
        &mut self,
        time: &TimeValue,
        position: &Position,
        pitch_angles_deg: &[f64],
    ) -> Result<CoordinateSet> {
        let mut set = CoordinateSet::nan(pitch_angles_deg);
        let invariants = match self.field.compute_ad_invariants(time, position, pitch_angles_deg) {
            Ok(inv) => inv,
            Err(e) => {
                debug!("No coordinates at {:?}: {}", position.coords, e);
                return Ok(set);
            }
        };
        let b0 = self.field.dipole()?.moment_nt;
        let inputs = CoordInputs::from_invariants(&invariants);

        for (j, pair) in self.alpha_lm.calculate_batch(&inputs).into_iter().enumerate() {
            set.alpha[j] = pair.x2;
            set.lm[j] = pair.x3;
        }
        for (j, input) in inputs.iter().enumerate() {
            let k = input.k();
            set.k[j] = if self.limits.k.contains(k) { k } else { f64::NAN };
        }
        if let Some(calc) = &self.k_phi {
            for (j, pair) in calc.calculate_batch(&inputs).into_iter().enumerate() {
                set.phi[j] = pair.x3;
                set.lstar[j] = lstar_from_phi(pair.x3, b0);
            }
        }
        if let Some(calc) = &self.k_hmin {
            for (j, pair) in calc.calculate_batch(&inputs).into_iter().enumerate() {
                set.hmin[j] = pair.x3;
            }
        }
        Ok(set)
    }
}

fn time_for(times: &[TimeValue], index: usize) -> TimeValue {
    times[index.min(times.len() - 1)]
}

fn check_times(times: &[TimeValue], positions: usize) -> Result<()> {
    if !times.is_empty() && (times.len() == 1 || times.len() == positions) {
        Ok(())
    } else {
        Err(MagFieldError::InsufficientStorage {
            needed: positions,
            available: times.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_broadcast() {
        let t = [TimeValue::from_mjd(58849.0)];
        assert!(check_times(&t, 5).is_ok());
        assert_eq!(time_for(&t, 3), t[0]);
        let two = [TimeValue::from_mjd(58849.0), TimeValue::from_mjd(58850.0)];
        assert!(matches!(
            check_times(&two, 3).unwrap_err(),
            MagFieldError::InsufficientStorage { needed: 3, available: 2 }
        ));
        assert!(check_times(&[], 0).is_err());
    }

    #[test]
    fn test_nan_set_shape() {
        let set = CoordinateSet::nan(&[90.0, 45.0]);
        assert_eq!(set.len(), 2);
        assert!(set.alpha.iter().chain(&set.lstar).all(|v| v.is_nan()));
    }
}
