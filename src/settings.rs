//! Run settings: an optional key=value file layered under the command line.
//!
//! File syntax: `key = value` per line, `#` starts a comment, lines starting
//! with `;` are ignored, keys are case-insensitive and `_` is dropped, values
//! may be quoted.

use std::collections::HashMap;
use std::f64::consts::PI;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::str::FromStr;

use tracing::warn;

use crate::encode::Ceiling;
use crate::error::{SynthError, SynthResult};
use crate::phases::{AmplitudePolicy, GeneratorConfig, PhasePlan};
use crate::resample::{Projection, Resolution};
use crate::synth::PowerMode;

pub const DEFAULT_WIDTH: usize = 32;
pub const DEFAULT_HEIGHT: usize = 32;
pub const DEFAULT_MAX_COMBINATIONS: usize = 50_000;
pub const DEFAULT_BATCH: usize = 256;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Sampling {
    #[default]
    Grid,
    Random,
}

impl fmt::Display for Sampling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sampling::Grid => f.write_str("grid"),
            Sampling::Random => f.write_str("random"),
        }
    }
}

impl FromStr for Sampling {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid" | "linear" => Ok(Sampling::Grid),
            "random" | "uniform" => Ok(Sampling::Random),
            other => Err(format!("sampling must be grid or random, got {other:?}")),
        }
    }
}

/// Every tunable of a run, each optional so that sources can be layered.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Settings {
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub depth: Option<usize>,
    pub projection: Option<Projection>,
    pub max_combinations: Option<usize>,
    pub randomness: Option<f64>,
    pub seed: Option<u64>,
    pub ceiling: Option<f64>,
    pub sampling: Option<Sampling>,
    pub phase_low: Option<f64>,
    pub phase_high: Option<f64>,
    pub amplitude_low: Option<f64>,
    pub amplitude_high: Option<f64>,
    pub amplitudes: Option<Vec<f64>>,
    pub power_mode: Option<PowerMode>,
    pub batch: Option<usize>,
}

macro_rules! layer_fields {
    ($top:expr, $base:expr, $($field:ident),+ $(,)?) => {
        Settings {
            $($field: $top.$field.or($base.$field),)+
        }
    };
}

impl Settings {
    /// Values set in `self` win; unset ones fall back to `base`.
    pub fn layered_over(self, base: Settings) -> Settings {
        layer_fields!(
            self,
            base,
            width,
            height,
            depth,
            projection,
            max_combinations,
            randomness,
            seed,
            ceiling,
            sampling,
            phase_low,
            phase_high,
            amplitude_low,
            amplitude_high,
            amplitudes,
            power_mode,
            batch,
        )
    }
}

fn parse_value<T>(
    params: &HashMap<String, (usize, String)>,
    keys: &[&str],
    path: &Path,
) -> SynthResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    for key in keys {
        if let Some((line, value)) = params.get(*key) {
            return value
                .trim()
                .parse::<T>()
                .map(Some)
                .map_err(|e| SynthError::Parse {
                    path: path.to_path_buf(),
                    line: *line,
                    reason: format!("{key} = {value:?}: {e}"),
                });
        }
    }
    Ok(None)
}

fn parse_list(
    params: &HashMap<String, (usize, String)>,
    key: &str,
    path: &Path,
) -> SynthResult<Option<Vec<f64>>> {
    let Some((line, raw)) = params.get(key) else {
        return Ok(None);
    };
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>().map_err(|e| SynthError::Parse {
                path: path.to_path_buf(),
                line: *line,
                reason: format!("{key} entry {s:?}: {e}"),
            })
        })
        .collect::<SynthResult<Vec<_>>>()
        .map(Some)
}

const KNOWN_KEYS: &[&str] = &[
    "width",
    "height",
    "depth",
    "projection",
    "maxcombinations",
    "nmax",
    "randomness",
    "phaserandomness",
    "seed",
    "ceiling",
    "efield2max",
    "sampling",
    "phaselow",
    "phasehigh",
    "amplitudelow",
    "amplitudehigh",
    "amplitudes",
    "powermode",
    "batch",
];

pub fn parse_settings_str(text: &str, path: &Path) -> SynthResult<Settings> {
    let mut params = HashMap::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() || line.starts_with(';') {
            continue;
        }
        let Some(index) = line.find('=') else {
            return Err(SynthError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                reason: format!("expected key = value, got {line:?}"),
            });
        };
        let (key, value) = line.split_at(index);
        let key = key.trim().to_ascii_lowercase().replace('_', "");
        let value = value
            .trim_start_matches('=')
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .to_string();
        if !KNOWN_KEYS.contains(&key.as_str()) {
            warn!("{}:{}: ignoring unknown setting {key:?}", path.display(), idx + 1);
            continue;
        }
        params.insert(key, (idx + 1, value));
    }

    Ok(Settings {
        width: parse_value(&params, &["width"], path)?,
        height: parse_value(&params, &["height"], path)?,
        depth: parse_value(&params, &["depth"], path)?,
        projection: parse_value(&params, &["projection"], path)?,
        max_combinations: parse_value(&params, &["maxcombinations", "nmax"], path)?,
        randomness: parse_value(&params, &["randomness", "phaserandomness"], path)?,
        seed: parse_value(&params, &["seed"], path)?,
        ceiling: parse_value(&params, &["ceiling", "efield2max"], path)?,
        sampling: parse_value(&params, &["sampling"], path)?,
        phase_low: parse_value(&params, &["phaselow"], path)?,
        phase_high: parse_value(&params, &["phasehigh"], path)?,
        amplitude_low: parse_value(&params, &["amplitudelow"], path)?,
        amplitude_high: parse_value(&params, &["amplitudehigh"], path)?,
        amplitudes: parse_list(&params, "amplitudes", path)?,
        power_mode: parse_value(&params, &["powermode"], path)?,
        batch: parse_value(&params, &["batch"], path)?,
    })
}

pub fn parse_settings(path: &Path) -> SynthResult<Settings> {
    let mut text = String::new();
    for line in BufReader::new(File::open(path)?).lines() {
        text.push_str(&line?);
        text.push('\n');
    }
    parse_settings_str(&text, path)
}

/// Fully resolved run configuration threaded through the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct SynthesisConfig {
    pub resolution: Resolution,
    pub projection: Projection,
    pub max_combinations: usize,
    pub generator: GeneratorConfig,
    pub ceiling: Ceiling,
    pub power_mode: PowerMode,
    pub batch: usize,
}

impl SynthesisConfig {
    pub fn from_settings(settings: &Settings) -> SynthResult<Self> {
        let projection = settings.projection.unwrap_or(Projection::TwoD);
        let depth = match projection {
            Projection::TwoD => settings.depth,
            Projection::ThreeD => Some(settings.depth.unwrap_or(1)),
        };
        let resolution = Resolution {
            width: settings.width.unwrap_or(DEFAULT_WIDTH),
            height: settings.height.unwrap_or(DEFAULT_HEIGHT),
            depth,
        };

        let sampling = settings.sampling.unwrap_or_default();
        let plan = match sampling {
            Sampling::Grid => PhasePlan::Grid {
                randomness: settings.randomness.unwrap_or(0.0),
            },
            Sampling::Random => PhasePlan::Random {
                low: settings.phase_low.unwrap_or(0.0),
                high: settings.phase_high.unwrap_or(2.0 * PI),
            },
        };
        if sampling == Sampling::Grid
            && (settings.phase_low.is_some() || settings.phase_high.is_some())
        {
            warn!("phase range only applies to random sampling; ignored");
        }

        let amplitude_range = (settings.amplitude_low, settings.amplitude_high);
        let amplitudes = match (&settings.amplitudes, sampling, amplitude_range) {
            (Some(gains), _, _) => AmplitudePolicy::Fixed(gains.clone()),
            (None, Sampling::Grid, (None, None)) => AmplitudePolicy::Unit,
            (None, _, (low, high)) => AmplitudePolicy::Uniform {
                low: low.unwrap_or(0.0),
                high: high.unwrap_or(1.0),
            },
        };

        let ceiling = match settings.ceiling {
            Some(value) if !(value.is_finite() && value > 0.0) => {
                return Err(SynthError::NonPositiveCeiling(value))
            }
            Some(value) => Ceiling::Fixed(value),
            None => Ceiling::PerImage,
        };

        let batch = settings.batch.unwrap_or(DEFAULT_BATCH);
        if batch == 0 {
            return Err(SynthError::InvalidRange("batch size must be at least 1".into()));
        }

        Ok(Self {
            resolution,
            projection,
            max_combinations: settings.max_combinations.unwrap_or(DEFAULT_MAX_COMBINATIONS),
            generator: GeneratorConfig {
                plan,
                amplitudes,
                seed: settings.seed.unwrap_or(0),
            },
            ceiling,
            power_mode: settings.power_mode.unwrap_or_default(),
            batch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(text: &str) -> SynthResult<Settings> {
        parse_settings_str(text, Path::new("run.settings"))
    }

    #[test]
    fn parses_keys_comments_and_quotes() {
        let settings = parse(
            "; synthesis run\n\
             Width = 64   # pixels\n\
             HEIGHT=48\n\
             projection = \"2d\"\n\
             max_combinations = 1000\n\
             phase_randomness = 0.5\n\
             efield2_max = '4000'\n\
             power_mode = real\n\
             amplitudes = 1.0, 0.5 0.25\n",
        )
        .unwrap();
        assert_eq!(settings.width, Some(64));
        assert_eq!(settings.height, Some(48));
        assert_eq!(settings.projection, Some(Projection::TwoD));
        assert_eq!(settings.max_combinations, Some(1000));
        assert_eq!(settings.randomness, Some(0.5));
        assert_eq!(settings.ceiling, Some(4000.0));
        assert_eq!(settings.power_mode, Some(PowerMode::RealPart));
        assert_eq!(settings.amplitudes, Some(vec![1.0, 0.5, 0.25]));
        assert_eq!(settings.seed, None);
    }

    #[test]
    fn reports_bad_values_with_line_numbers() {
        let err = parse("width = 32\nheight = tall\n").unwrap_err();
        match err {
            SynthError::Parse { line, reason, .. } => {
                assert_eq!(line, 2);
                assert!(reason.contains("height"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(
            parse("width 32\n"),
            Err(SynthError::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn unknown_keys_are_skipped() {
        let settings = parse("colour = blue\nseed = 9\n").unwrap();
        assert_eq!(settings.seed, Some(9));
    }

    #[test]
    fn command_line_wins_over_file() {
        let file = Settings {
            width: Some(64),
            height: Some(64),
            seed: Some(3),
            ..Settings::default()
        };
        let cli = Settings {
            width: Some(16),
            ..Settings::default()
        };
        let merged = cli.layered_over(file);
        assert_eq!(merged.width, Some(16));
        assert_eq!(merged.height, Some(64));
        assert_eq!(merged.seed, Some(3));
    }

    #[test]
    fn defaults_match_the_reference_run() {
        let config = SynthesisConfig::from_settings(&Settings::default()).unwrap();
        assert_eq!(
            config.resolution,
            Resolution {
                width: 32,
                height: 32,
                depth: None
            }
        );
        assert_eq!(config.projection, Projection::TwoD);
        assert_eq!(config.max_combinations, 50_000);
        assert_eq!(config.generator, GeneratorConfig::default());
        assert_eq!(config.ceiling, Ceiling::PerImage);
        assert_eq!(config.power_mode, PowerMode::TimeAveraged);
    }

    #[test]
    fn default_power_depends_only_on_relative_phase() {
        use crate::phases::PhaseCombination;
        use crate::resample::FieldGrid;
        use crate::synth::synthesize;
        use num_complex::Complex;

        let config = SynthesisConfig::from_settings(&Settings::default()).unwrap();
        let a = [
            Complex::new(1.0, 2.0),
            Complex::new(3.0, 0.0),
            Complex::new(0.0, -1.0),
        ];
        let b = [
            Complex::new(0.5, -1.0),
            Complex::new(0.0, 2.0),
            Complex::new(1.5, 0.5),
        ];
        let grid = FieldGrid::uniform(&[a, b], 1, 1);
        let amplitudes = [1.0, 1.0];
        let power = |phases: &[f64]| {
            let combination = PhaseCombination {
                phases,
                amplitudes: &amplitudes,
            };
            synthesize(&grid, &combination, config.power_mode)
                .unwrap()
                .max()
        };
        assert!((power(&[0.0, 1.1]) - power(&[0.7, 1.8])).abs() < 1e-12);
    }

    #[test]
    fn random_sampling_draws_amplitudes_by_default() {
        let settings = Settings {
            sampling: Some(Sampling::Random),
            ceiling: Some(4e3),
            projection: Some(Projection::ThreeD),
            ..Settings::default()
        };
        let config = SynthesisConfig::from_settings(&settings).unwrap();
        assert_eq!(
            config.generator.plan,
            PhasePlan::Random {
                low: 0.0,
                high: 2.0 * PI
            }
        );
        assert_eq!(
            config.generator.amplitudes,
            AmplitudePolicy::Uniform {
                low: 0.0,
                high: 1.0
            }
        );
        assert_eq!(config.ceiling, Ceiling::Fixed(4e3));
        assert_eq!(config.resolution.depth, Some(1));
    }

    #[test]
    fn rejects_bad_ceiling_and_batch() {
        let settings = Settings {
            ceiling: Some(-1.0),
            ..Settings::default()
        };
        assert!(matches!(
            SynthesisConfig::from_settings(&settings),
            Err(SynthError::NonPositiveCeiling(_))
        ));
        let settings = Settings {
            batch: Some(0),
            ..Settings::default()
        };
        assert!(matches!(
            SynthesisConfig::from_settings(&settings),
            Err(SynthError::InvalidRange(_))
        ));
    }

    #[test]
    fn reads_settings_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "sampling = random\nphase_low = 0.5\nbatch = 8").unwrap();
        let settings = parse_settings(file.path()).unwrap();
        assert_eq!(settings.sampling, Some(Sampling::Random));
        assert_eq!(settings.phase_low, Some(0.5));
        assert_eq!(settings.batch, Some(8));
    }
}
