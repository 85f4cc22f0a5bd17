//! Enumeration of per-antenna excitations.
//!
//! Antenna 0 is the phase reference and is always driven at phase 0: the
//! power map only depends on relative phases, so the set spans the
//! remaining `A - 1` antennas.

use std::f64::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{SynthError, SynthResult};
use crate::utils::integer_root;

const PHASE_STREAM: u64 = 0;
const AMPLITUDE_STREAM: u64 = 1;

/// Noise standard deviation as a fraction of the phase step, per unit of
/// randomness.
const NOISE_FRACTION_OF_STEP: f64 = 0.2;

#[derive(Clone, Debug, PartialEq)]
pub enum AmplitudePolicy {
    /// Every antenna at gain 1.0.
    Unit,
    /// One fixed gain per antenna, reference antenna included.
    Fixed(Vec<f64>),
    /// Independent uniform gain per antenna and combination.
    Uniform { low: f64, high: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub enum PhasePlan {
    /// Full Cartesian product of evenly spaced phase levels, optionally
    /// jittered with Gaussian noise scaled to the level spacing.
    Grid { randomness: f64 },
    /// `budget` independent draws with phases uniform in `[low, high)`.
    Random { low: f64, high: f64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorConfig {
    pub plan: PhasePlan,
    pub amplitudes: AmplitudePolicy,
    pub seed: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            plan: PhasePlan::Grid { randomness: 0.0 },
            amplitudes: AmplitudePolicy::Unit,
            seed: 0,
        }
    }
}

/// One excitation: phase (rad) and gain per antenna.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PhaseCombination<'a> {
    pub phases: &'a [f64],
    pub amplitudes: &'a [f64],
}

#[derive(Clone, Debug)]
pub struct PhaseCombinationSet {
    antennas: usize,
    n_steps: Option<usize>,
    phases: Vec<f64>,
    amplitudes: Vec<f64>,
}

impl PhaseCombinationSet {
    pub fn generate(
        antennas: usize,
        budget: usize,
        config: &GeneratorConfig,
    ) -> SynthResult<Self> {
        if antennas < 2 {
            return Err(SynthError::TooFewAntennas(antennas));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(PHASE_STREAM);

        let (phases, n_steps) = match config.plan {
            PhasePlan::Grid { randomness } => {
                let (phases, n_steps) = grid_phases(antennas, budget, randomness, &mut rng)?;
                (phases, Some(n_steps))
            }
            PhasePlan::Random { low, high } => {
                (random_phases(antennas, budget, low, high, &mut rng)?, None)
            }
        };

        let count = phases.len() / antennas;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        rng.set_stream(AMPLITUDE_STREAM);
        let amplitudes = amplitudes_for(&config.amplitudes, antennas, count, &mut rng)?;

        Ok(Self {
            antennas,
            n_steps,
            phases,
            amplitudes,
        })
    }

    pub fn antennas(&self) -> usize {
        self.antennas
    }

    /// Phase levels per antenna; `None` for randomly drawn sets.
    pub fn n_steps(&self) -> Option<usize> {
        self.n_steps
    }

    pub fn len(&self) -> usize {
        self.phases.len() / self.antennas
    }

    pub fn combination(&self, index: usize) -> PhaseCombination<'_> {
        let range = index * self.antennas..(index + 1) * self.antennas;
        PhaseCombination {
            phases: &self.phases[range.clone()],
            amplitudes: &self.amplitudes[range],
        }
    }

    pub fn iter(&self) -> Combinations<'_> {
        Combinations {
            set: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a PhaseCombinationSet {
    type Item = PhaseCombination<'a>;
    type IntoIter = Combinations<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct Combinations<'a> {
    set: &'a PhaseCombinationSet,
    next: usize,
}

impl<'a> Iterator for Combinations<'a> {
    type Item = PhaseCombination<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.set.len() {
            return None;
        }
        let combination = self.set.combination(self.next);
        self.next += 1;
        Some(combination)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.set.len() - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Combinations<'_> {}

fn grid_phases(
    antennas: usize,
    budget: usize,
    randomness: f64,
    rng: &mut ChaCha8Rng,
) -> SynthResult<(Vec<f64>, usize)> {
    if !randomness.is_finite() || randomness < 0.0 {
        return Err(SynthError::InvalidRandomness(randomness));
    }
    let free = (antennas - 1) as u32;
    let n_steps = integer_root(budget, free);
    if n_steps < 1 {
        return Err(SynthError::EmptyCombinationSet { budget, antennas });
    }
    // n_steps^free <= budget, so this cannot overflow
    let count = n_steps.pow(free);
    let step = 2.0 * PI / n_steps as f64;

    let mut phases = vec![0.0; count * antennas];
    for (idx, row) in phases.chunks_exact_mut(antennas).enumerate() {
        let mut rest = idx;
        // last antenna varies fastest
        for antenna in (1..antennas).rev() {
            row[antenna] = (rest % n_steps) as f64 * step;
            rest /= n_steps;
        }
    }

    if randomness > 0.0 {
        let sigma = randomness * NOISE_FRACTION_OF_STEP * step;
        let noise =
            Normal::new(0.0, sigma).map_err(|_| SynthError::InvalidRandomness(randomness))?;
        for row in phases.chunks_exact_mut(antennas) {
            for phase in row.iter_mut().skip(1) {
                *phase += noise.sample(rng);
            }
        }
    }

    Ok((phases, n_steps))
}

fn random_phases(
    antennas: usize,
    budget: usize,
    low: f64,
    high: f64,
    rng: &mut ChaCha8Rng,
) -> SynthResult<Vec<f64>> {
    if !(low.is_finite() && high.is_finite() && low < high) {
        return Err(SynthError::InvalidRange(format!(
            "phase range [{low}, {high}) is empty or not finite"
        )));
    }
    if budget == 0 {
        return Err(SynthError::EmptyCombinationSet { budget, antennas });
    }
    let mut phases = vec![0.0; budget * antennas];
    for row in phases.chunks_exact_mut(antennas) {
        for phase in row.iter_mut().skip(1) {
            *phase = rng.gen_range(low..high);
        }
    }
    Ok(phases)
}

fn amplitudes_for(
    policy: &AmplitudePolicy,
    antennas: usize,
    count: usize,
    rng: &mut ChaCha8Rng,
) -> SynthResult<Vec<f64>> {
    match policy {
        AmplitudePolicy::Unit => Ok(vec![1.0; count * antennas]),
        AmplitudePolicy::Fixed(gains) => {
            if gains.len() != antennas {
                return Err(SynthError::InvalidRange(format!(
                    "{} fixed amplitudes given for {antennas} antennas",
                    gains.len()
                )));
            }
            if let Some(bad) = gains.iter().find(|g| !g.is_finite() || **g < 0.0) {
                return Err(SynthError::InvalidRange(format!(
                    "amplitude {bad} must be finite and >= 0"
                )));
            }
            Ok(gains
                .iter()
                .copied()
                .cycle()
                .take(count * antennas)
                .collect())
        }
        AmplitudePolicy::Uniform { low, high } => {
            let (low, high) = (*low, *high);
            if !(low.is_finite() && high.is_finite() && 0.0 <= low && low <= high) {
                return Err(SynthError::InvalidRange(format!(
                    "amplitude range [{low}, {high}] must be finite, ordered and >= 0"
                )));
            }
            Ok((0..count * antennas)
                .map(|_| rng.gen_range(low..=high))
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(randomness: f64, seed: u64) -> GeneratorConfig {
        GeneratorConfig {
            plan: PhasePlan::Grid { randomness },
            amplitudes: AmplitudePolicy::Unit,
            seed,
        }
    }

    #[test]
    fn set_size_follows_integer_root_of_budget() {
        for (antennas, budget) in [(2, 7), (3, 10), (3, 16), (4, 1000), (5, 80), (4, 7)] {
            let set = PhaseCombinationSet::generate(antennas, budget, &grid(0.0, 0)).unwrap();
            let free = (antennas - 1) as u32;
            let n = (budget as f64).powf(1.0 / free as f64).floor() as usize;
            let n = if (n + 1).pow(free) <= budget { n + 1 } else { n };
            assert_eq!(set.len(), n.pow(free), "A={antennas} M={budget}");
            assert_eq!(set.n_steps(), Some(n));
            assert!(set.iter().all(|c| c.phases[0] == 0.0));
            assert!(set.iter().all(|c| c.phases.len() == antennas));
        }
    }

    #[test]
    fn three_antennas_with_fifty_thousand_budget() {
        let set = PhaseCombinationSet::generate(3, 50_000, &grid(0.0, 0)).unwrap();
        assert_eq!(set.n_steps(), Some(223));
        assert_eq!(set.len(), 49_729);
        assert_eq!(set.iter().count(), 49_729);
    }

    #[test]
    fn last_antenna_varies_fastest() {
        let set = PhaseCombinationSet::generate(3, 4, &grid(0.0, 0)).unwrap();
        let rows: Vec<Vec<f64>> = set.iter().map(|c| c.phases.to_vec()).collect();
        assert_eq!(
            rows,
            vec![
                vec![0.0, 0.0, 0.0],
                vec![0.0, 0.0, PI],
                vec![0.0, PI, 0.0],
                vec![0.0, PI, PI],
            ]
        );
        assert!(set.iter().all(|c| c.amplitudes == [1.0, 1.0, 1.0]));
    }

    #[test]
    fn zero_randomness_is_bit_reproducible() {
        let a = PhaseCombinationSet::generate(4, 500, &grid(0.0, 1)).unwrap();
        let b = PhaseCombinationSet::generate(4, 500, &grid(0.0, 99)).unwrap();
        let a: Vec<u64> = a.iter().flat_map(|c| c.phases.iter().map(|p| p.to_bits())).collect();
        let b: Vec<u64> = b.iter().flat_map(|c| c.phases.iter().map(|p| p.to_bits())).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn jitter_is_seeded_and_scaled_to_the_step() {
        let a = PhaseCombinationSet::generate(2, 400, &grid(1.0, 7)).unwrap();
        let b = PhaseCombinationSet::generate(2, 400, &grid(1.0, 7)).unwrap();
        let c = PhaseCombinationSet::generate(2, 400, &grid(1.0, 8)).unwrap();
        let phases = |s: &PhaseCombinationSet| -> Vec<f64> { s.iter().map(|x| x.phases[1]).collect() };
        assert_eq!(phases(&a), phases(&b));
        assert_ne!(phases(&a), phases(&c));

        let step = 2.0 * PI / 400.0;
        let residuals: Vec<f64> = a
            .iter()
            .enumerate()
            .map(|(i, x)| x.phases[1] - i as f64 * step)
            .collect();
        let mean = residuals.iter().sum::<f64>() / residuals.len() as f64;
        let var = residuals.iter().map(|r| (r - mean).powi(2)).sum::<f64>()
            / residuals.len() as f64;
        let expected = 0.2 * step;
        assert!(mean.abs() < 0.05 * step);
        assert!((var.sqrt() - expected).abs() < 0.2 * expected);
        assert!(a.iter().all(|x| x.phases[0] == 0.0));
    }

    #[test]
    fn rejects_single_antenna_and_empty_budget() {
        assert!(matches!(
            PhaseCombinationSet::generate(1, 100, &grid(0.0, 0)),
            Err(SynthError::TooFewAntennas(1))
        ));
        assert!(matches!(
            PhaseCombinationSet::generate(3, 0, &grid(0.0, 0)),
            Err(SynthError::EmptyCombinationSet {
                budget: 0,
                antennas: 3
            })
        ));
        assert!(matches!(
            PhaseCombinationSet::generate(3, 10, &grid(-0.5, 0)),
            Err(SynthError::InvalidRandomness(_))
        ));
    }

    #[test]
    fn random_plan_draws_budget_samples_in_range() {
        let config = GeneratorConfig {
            plan: PhasePlan::Random {
                low: 0.0,
                high: 2.0 * PI,
            },
            amplitudes: AmplitudePolicy::Uniform {
                low: 0.0,
                high: 1.0,
            },
            seed: 3,
        };
        let set = PhaseCombinationSet::generate(4, 250, &config).unwrap();
        assert_eq!(set.len(), 250);
        assert_eq!(set.n_steps(), None);
        for c in &set {
            assert_eq!(c.phases[0], 0.0);
            assert!(c.phases[1..].iter().all(|p| (0.0..2.0 * PI).contains(p)));
            assert!(c.amplitudes.iter().all(|a| (0.0..=1.0).contains(a)));
        }
        let again = PhaseCombinationSet::generate(4, 250, &config).unwrap();
        assert_eq!(set.combination(17), again.combination(17));
    }

    #[test]
    fn amplitude_stream_does_not_disturb_phase_jitter() {
        let unit = grid(0.5, 11);
        let mut uniform = unit.clone();
        uniform.amplitudes = AmplitudePolicy::Uniform {
            low: 0.5,
            high: 1.0,
        };
        let a = PhaseCombinationSet::generate(3, 100, &unit).unwrap();
        let b = PhaseCombinationSet::generate(3, 100, &uniform).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.phases, y.phases);
        }
    }

    #[test]
    fn fixed_amplitudes_must_match_antenna_count() {
        let mut config = grid(0.0, 0);
        config.amplitudes = AmplitudePolicy::Fixed(vec![1.0, 0.5]);
        assert!(matches!(
            PhaseCombinationSet::generate(3, 9, &config),
            Err(SynthError::InvalidRange(_))
        ));
        config.amplitudes = AmplitudePolicy::Fixed(vec![1.0, 0.5, 0.25]);
        let set = PhaseCombinationSet::generate(3, 9, &config).unwrap();
        assert!(set.iter().all(|c| c.amplitudes == [1.0, 0.5, 0.25]));
    }

    #[test]
    fn iteration_restarts_in_the_same_order() {
        let set = PhaseCombinationSet::generate(3, 30, &grid(0.3, 5)).unwrap();
        let first: Vec<_> = set.iter().collect();
        let second: Vec<_> = set.iter().collect();
        assert_eq!(first, second);
        assert_eq!(set.iter().len(), set.len());
    }
}
