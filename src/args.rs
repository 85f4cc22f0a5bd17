use crate::resample::Projection;
use crate::settings::{Sampling, Settings};
use crate::synth::PowerMode;
use crate::utils::DynError;
use clap::Parser;
use std::path::PathBuf;

pub const DEFAULT_DST: &str = "dataset";

#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Synthesise antenna-array power-map datasets from per-antenna field exports",
    long_about = None,
    arg_required_else_help = true,
    after_help = "Examples:\n  field_synth --src sims --dst dataset\n  field_synth --src sims --dst dataset --width 64 --height 64 --nmax 10000 --randomness 0.5 --ceiling 4000\n  field_synth --src sims --settings run.settings --cpu 8\n  field_synth --src sims --sampling random --nmax 2000 --amplitude-low 0.2 --seed 7\n  field_synth --src sims --survey --nmax 5000\n  field_synth --src sims --dst preview_run --preview 4 --power-mode real\n"
)]
pub struct Args {
    /// Root directory; every subdirectory holds the per-antenna CSV exports of one simulation
    #[arg(long)]
    pub src: PathBuf,

    /// Output directory for images, dataset.csv and geometry.csv
    #[arg(long, default_value = DEFAULT_DST)]
    pub dst: PathBuf,

    /// Optional key=value settings file (command-line options take precedence)
    #[arg(long, visible_alias = "ifile")]
    pub settings: Option<PathBuf>,

    /// Image width in pixels (default 32)
    #[arg(long)]
    pub width: Option<usize>,

    /// Image height in pixels (default 32)
    #[arg(long)]
    pub height: Option<usize>,

    /// Grid depth for 3d projection (default 1)
    #[arg(long)]
    pub depth: Option<usize>,

    /// Projection of the simulation data: 2d (one cut-plane) or 3d
    #[arg(long)]
    pub projection: Option<Projection>,

    /// Upper bound on the number of phase combinations per simulation (default 50000)
    #[arg(long = "max-combinations", visible_alias = "nmax")]
    pub max_combinations: Option<usize>,

    /// Gaussian phase jitter in units of 0.2 phase steps (grid sampling only)
    #[arg(long, visible_alias = "phase-randomness")]
    pub randomness: Option<f64>,

    /// Seed for phase jitter and random sampling
    #[arg(long)]
    pub seed: Option<u64>,

    /// Power mapped to pixel 255 for every image. Without it each image uses its own maximum.
    #[arg(long, visible_alias = "efield2-max")]
    pub ceiling: Option<f64>,

    /// Phase sampling: grid (Cartesian product of phase levels) or random
    #[arg(long)]
    pub sampling: Option<Sampling>,

    /// Lower phase bound in radians for random sampling (default 0)
    #[arg(long, allow_hyphen_values = true)]
    pub phase_low: Option<f64>,

    /// Upper phase bound in radians for random sampling (default 2π)
    #[arg(long, allow_hyphen_values = true)]
    pub phase_high: Option<f64>,

    /// Lower amplitude bound for drawn amplitudes (default 0)
    #[arg(long)]
    pub amplitude_low: Option<f64>,

    /// Upper amplitude bound for drawn amplitudes (default 1)
    #[arg(long)]
    pub amplitude_high: Option<f64>,

    /// Comma-separated fixed amplitude per antenna, reference antenna first
    #[arg(long, value_delimiter = ',')]
    pub amplitudes: Option<Vec<f64>>,

    /// Power reduction: time-averaged (default) or real (instantaneous field)
    #[arg(long)]
    pub power_mode: Option<PowerMode>,

    /// Combinations synthesised per parallel batch (default 256)
    #[arg(long)]
    pub batch: Option<usize>,

    /// Number of parallel worker threads
    #[arg(long, default_value_t = 2)]
    pub cpu: usize,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Also render colour heatmaps of the first N combinations of each simulation
    #[arg(long)]
    pub preview: Option<usize>,

    /// Survey peak power over all combinations and recommend a ceiling; writes no images
    #[arg(long)]
    pub survey: bool,
}

impl Args {
    /// Options given on the command line, to be layered over the settings file.
    pub fn overrides(&self) -> Settings {
        Settings {
            width: self.width,
            height: self.height,
            depth: self.depth,
            projection: self.projection,
            max_combinations: self.max_combinations,
            randomness: self.randomness,
            seed: self.seed,
            ceiling: self.ceiling,
            sampling: self.sampling,
            phase_low: self.phase_low,
            phase_high: self.phase_high,
            amplitude_low: self.amplitude_low,
            amplitude_high: self.amplitude_high,
            amplitudes: self.amplitudes.clone(),
            power_mode: self.power_mode,
            batch: self.batch,
        }
    }
}

pub fn resolve_cpu(requested: usize, online: usize) -> Result<usize, DynError> {
    if requested == 0 {
        return Err("--cpu must be at least 1".into());
    }
    if requested > online {
        return Err(format!("--cpu {requested} exceeds the {online} online cores").into());
    }
    Ok(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_aliases_and_typed_values() {
        let args = Args::try_parse_from([
            "field_synth",
            "--src",
            "sims",
            "--nmax",
            "1000",
            "--efield2-max",
            "4000",
            "--projection",
            "3D",
            "--sampling",
            "random",
            "--phase-low",
            "-1.5",
            "--amplitudes",
            "1.0,0.5",
            "--power-mode",
            "time-averaged",
        ])
        .unwrap();
        assert_eq!(args.dst, PathBuf::from(DEFAULT_DST));
        assert_eq!(args.max_combinations, Some(1000));
        assert_eq!(args.ceiling, Some(4000.0));
        assert_eq!(args.projection, Some(Projection::ThreeD));
        assert_eq!(args.sampling, Some(Sampling::Random));
        assert_eq!(args.phase_low, Some(-1.5));
        assert_eq!(args.amplitudes, Some(vec![1.0, 0.5]));
        assert_eq!(args.power_mode, Some(PowerMode::TimeAveraged));
        assert_eq!(args.cpu, 2);
    }

    #[test]
    fn overrides_only_carry_given_options() {
        let args = Args::try_parse_from(["field_synth", "--src", "sims", "--width", "8"]).unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides.width, Some(8));
        assert_eq!(
            overrides,
            Settings {
                width: Some(8),
                ..Settings::default()
            }
        );
    }

    #[test]
    fn rejects_unknown_choices() {
        assert!(
            Args::try_parse_from(["field_synth", "--src", "s", "--projection", "4d"]).is_err()
        );
        assert!(
            Args::try_parse_from(["field_synth", "--src", "s", "--power-mode", "peak"]).is_err()
        );
    }

    #[test]
    fn cpu_is_bounded_by_online_cores() {
        assert_eq!(resolve_cpu(4, 8).unwrap(), 4);
        assert!(resolve_cpu(0, 8).is_err());
        assert!(resolve_cpu(9, 8).is_err());
    }
}
