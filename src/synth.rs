use std::fmt;
use std::str::FromStr;

use num_complex::Complex;

use crate::error::{SynthError, SynthResult};
use crate::phases::PhaseCombination;
use crate::resample::FieldGrid;

/// How the coherent field sum is reduced to one scalar per grid point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PowerMode {
    /// `0.5 * Σ_axis |ΣE|²`, averaged over one period. Invariant under a
    /// global phase offset.
    #[default]
    TimeAveraged,
    /// `0.5 * Σ_axis (Re ΣE)²`, the field at the reference instant.
    RealPart,
}

impl fmt::Display for PowerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerMode::RealPart => f.write_str("real"),
            PowerMode::TimeAveraged => f.write_str("time-averaged"),
        }
    }
}

impl FromStr for PowerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "real" | "realpart" | "instantaneous" => Ok(PowerMode::RealPart),
            "time-averaged" | "timeaveraged" | "average" | "rms" => Ok(PowerMode::TimeAveraged),
            other => Err(format!(
                "power mode must be real or time-averaged, got {other:?}"
            )),
        }
    }
}

/// Scalar power per grid point for one excitation.
#[derive(Clone, Debug, PartialEq)]
pub struct PowerMap {
    values: Vec<f64>,
}

impl PowerMap {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Largest value; `0.0` for an empty map.
    pub fn max(&self) -> f64 {
        peak(&self.values)
    }
}

pub fn peak(values: &[f64]) -> f64 {
    values.iter().copied().fold(0.0_f64, f64::max)
}

/// Per-antenna phasor `amplitude · e^{iφ}`.
fn excitation_weights(combination: &PhaseCombination<'_>) -> Vec<Complex<f64>> {
    combination
        .phases
        .iter()
        .zip(combination.amplitudes.iter())
        .map(|(&phase, &amplitude)| Complex::from_polar(amplitude, phase))
        .collect()
}

/// Superpose all antennas of `grid` driven by `combination` and reduce to a
/// power map.
pub fn synthesize(
    grid: &FieldGrid,
    combination: &PhaseCombination<'_>,
    mode: PowerMode,
) -> SynthResult<PowerMap> {
    let mut values = vec![0.0; grid.n_points()];
    synthesize_into(grid, combination, mode, &mut values)?;
    Ok(PowerMap::new(values))
}

/// Same as [`synthesize`], writing into a caller-owned buffer of
/// `grid.n_points()` values.
pub fn synthesize_into(
    grid: &FieldGrid,
    combination: &PhaseCombination<'_>,
    mode: PowerMode,
    out: &mut [f64],
) -> SynthResult<()> {
    let antennas = grid.antennas();
    if combination.phases.len() != antennas || combination.amplitudes.len() != antennas {
        return Err(SynthError::AntennaCountMismatch {
            grid: antennas,
            combination: combination.phases.len(),
        });
    }
    if out.len() != grid.n_points() {
        return Err(SynthError::LayoutMismatch {
            expected: grid.n_points(),
            found: out.len(),
        });
    }

    let weights = excitation_weights(combination);
    for (point, power) in out.iter_mut().enumerate() {
        let field = grid.point_values(point);
        // antennas are summed as phasors before squaring
        let mut sum = [Complex::new(0.0, 0.0); 3];
        for (weight, vector) in weights.iter().zip(field.chunks_exact(3)) {
            for (acc, &component) in sum.iter_mut().zip(vector.iter()) {
                *acc += component * weight;
            }
        }
        *power = 0.5
            * match mode {
                PowerMode::RealPart => sum.iter().map(|c| c.re * c.re).sum::<f64>(),
                PowerMode::TimeAveraged => sum.iter().map(|c| c.norm_sqr()).sum::<f64>(),
            };
    }
    Ok(())
}
