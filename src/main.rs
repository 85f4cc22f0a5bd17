mod args;
mod dataset;
mod encode;
mod error;
mod field;
mod phases;
mod plot;
mod resample;
mod settings;
mod synth;
mod utils;

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{CommandFactory, Parser};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use dataset::{
    output_image_name, DatasetRecord, GeometryWriter, ManifestWriter, GEOMETRY_FILE, INPUT_DIR,
    MANIFEST_FILE, OUTPUT_DIR,
};
use encode::{encode, write_png, Ceiling};
use error::{SynthError, SynthResult};
use phases::PhaseCombinationSet;
use plot::{plot_peak_survey, plot_power_heatmap};
use resample::{resample, FieldGrid, RasterLayout};
use settings::{parse_settings, Settings, SynthesisConfig};
use synth::{peak, synthesize, synthesize_into};
use utils::{available_cores, DynError};

const PREVIEW_DIR: &str = "preview";
const SURVEY_PLOT: &str = "ceiling_survey.png";

/// Base simulations under `root`, one per subdirectory, in name order.
fn simulation_dirs(root: &Path) -> Result<Vec<PathBuf>, DynError> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    if dirs.is_empty() {
        return Err(format!("No simulation directories found in {}", root.display()).into());
    }
    Ok(dirs)
}

struct Simulation {
    name: String,
    grid: FieldGrid,
    layout: RasterLayout,
    set: PhaseCombinationSet,
}

fn prepare_simulation(dir: &Path, config: &SynthesisConfig) -> SynthResult<Simulation> {
    let started = Instant::now();
    let sample = field::load_simulation(dir)?;
    debug!(
        "loaded {} points x {} antennas in {:.2?}",
        sample.n_points(),
        sample.antennas(),
        started.elapsed()
    );

    let grid = resample(&sample, config.resolution, config.projection)?;
    let layout = grid.raster_layout();
    let plane = grid
        .plane()
        .map(|p| p.to_string())
        .unwrap_or_else(|| "3d".to_string());
    info!(
        "resampled to {:?} ({plane}, {:.4} mm/px)",
        grid.shape(),
        grid.mm_per_px()
    );

    let set = PhaseCombinationSet::generate(
        grid.antennas(),
        config.max_combinations,
        &config.generator,
    )?;
    match set.n_steps() {
        Some(steps) => info!(
            "{} phase combinations ({steps} steps over {} antennas)",
            set.len(),
            grid.antennas() - 1
        ),
        None => info!("{} randomly drawn combinations", set.len()),
    }

    Ok(Simulation {
        name: dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        grid,
        layout,
        set,
    })
}

/// Synthesise, encode and write one batch of combinations in parallel.
/// Records come back in combination order.
fn render_batch(
    sim: &Simulation,
    range: Range<usize>,
    first_output: usize,
    input: usize,
    config: &SynthesisConfig,
    dst: &Path,
) -> SynthResult<Vec<DatasetRecord>> {
    let start = range.start;
    range
        .into_par_iter()
        .map_init(
            || vec![0.0; sim.grid.n_points()],
            |power, index| {
                let combination = sim.set.combination(index);
                synthesize_into(&sim.grid, &combination, config.power_mode, power)?;
                let image = encode(power, &sim.layout, config.ceiling)?;
                let output = first_output + (index - start);
                write_png(&image, &dst.join(output_image_name(output)))?;
                Ok(DatasetRecord::new(output, input, &combination))
            },
        )
        .collect()
}

fn render_previews(
    sim: &Simulation,
    count: usize,
    input: usize,
    config: &SynthesisConfig,
    dst: &Path,
) -> Result<(), DynError> {
    let preview_dir = dst.join(PREVIEW_DIR);
    std::fs::create_dir_all(&preview_dir)?;
    let (x_label, y_label) = match sim.grid.plane() {
        Some(plane) => {
            let (col, row) = plane.raster_axes();
            (format!("{col} [px]"), format!("{row} [px]"))
        }
        None => ("x [px]".to_string(), "y, stacked z slices [px]".to_string()),
    };
    for (index, combination) in sim.set.iter().take(count).enumerate() {
        let map = synthesize(&sim.grid, &combination, config.power_mode)?;
        let filename = preview_dir.join(format!("{input:04}_{index:07}.png"));
        plot_power_heatmap(
            &sim.layout,
            map.values(),
            &format!("{} #{index} (peak {:.4e})", sim.name, map.max()),
            &filename.to_string_lossy(),
            &x_label,
            &y_label,
        )?;
    }
    Ok(())
}

fn run_dataset(
    dirs: &[PathBuf],
    config: &SynthesisConfig,
    dst: &Path,
    preview: Option<usize>,
) -> Result<(), DynError> {
    std::fs::create_dir_all(dst.join(OUTPUT_DIR))?;
    std::fs::create_dir_all(dst.join(INPUT_DIR))?;
    let mut geometry = GeometryWriter::create(&dst.join(GEOMETRY_FILE))?;
    let mut manifest: Option<ManifestWriter<_>> = None;
    let mut next_output = 0usize;

    for (input, dir) in dirs.iter().enumerate() {
        info!("simulation {input}: {}", dir.display());
        let started = Instant::now();
        let sim = prepare_simulation(dir, config)?;
        let mut writer = match manifest.take() {
            Some(writer) => writer,
            None => ManifestWriter::create(&dst.join(MANIFEST_FILE), sim.grid.antennas())?,
        };
        if writer.antennas() != sim.grid.antennas() {
            return Err(SynthError::AntennaCountMismatch {
                grid: writer.antennas(),
                combination: sim.grid.antennas(),
            }
            .into());
        }
        geometry.append(input, &sim.grid)?;
        geometry.flush()?;

        if let Some(count) = preview {
            render_previews(&sim, count, input, config, dst)?;
        }

        let total = sim.set.len();
        for start in (0..total).step_by(config.batch) {
            let end = (start + config.batch).min(total);
            let records = render_batch(&sim, start..end, next_output, input, config, dst)?;
            for record in &records {
                writer.append(record)?;
            }
            next_output += records.len();
            debug!("{end}/{total} images written");
        }
        writer.flush()?;
        manifest = Some(writer);

        info!(
            "{total} images from {} in {:.2?}; model image expected at {}",
            sim.name,
            started.elapsed(),
            dataset::input_image_name(input)
        );
    }

    info!(
        "dataset complete: {next_output} images, {} manifest rows in {}",
        manifest.as_ref().map_or(0, |m| m.rows()),
        dst.join(MANIFEST_FILE).display()
    );
    Ok(())
}

fn run_survey(dirs: &[PathBuf], config: &SynthesisConfig, dst: &Path) -> Result<(), DynError> {
    let mut peaks = Vec::new();
    for dir in dirs {
        info!("surveying {}", dir.display());
        let sim = prepare_simulation(dir, config)?;
        let sim_peaks = (0..sim.set.len())
            .into_par_iter()
            .map_init(
                || vec![0.0; sim.grid.n_points()],
                |power, index| {
                    synthesize_into(
                        &sim.grid,
                        &sim.set.combination(index),
                        config.power_mode,
                        power,
                    )?;
                    Ok(peak(power))
                },
            )
            .collect::<SynthResult<Vec<f64>>>()?;
        info!("{}: peak power {:.6e}", sim.name, peak(&sim_peaks));
        peaks.extend(sim_peaks);
    }

    let recommended = peak(&peaks);
    info!("recommended --ceiling {recommended:.6e} over {} combinations", peaks.len());
    if let Ceiling::Fixed(ceiling) = config.ceiling {
        if ceiling < recommended {
            warn!("configured ceiling {ceiling} is below the surveyed peak {recommended}");
        }
    }

    std::fs::create_dir_all(dst)?;
    let filename = dst.join(SURVEY_PLOT);
    plot_peak_survey(
        &peaks,
        recommended,
        &filename.to_string_lossy(),
        "combination",
        "peak power",
    )?;
    info!("survey plot written to {}", filename.display());
    Ok(())
}

fn main() -> Result<(), DynError> {
    if std::env::args_os().len() == 1 {
        args::Args::command().print_help()?;
        println!();
        return Ok(());
    }

    let args = args::Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(if args.debug {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .with_target(false)
        .init();

    let file_settings = match &args.settings {
        Some(path) => parse_settings(path)?,
        None => Settings::default(),
    };
    let config = SynthesisConfig::from_settings(&args.overrides().layered_over(file_settings))?;
    debug!("{config:?}");

    let cpu = args::resolve_cpu(args.cpu, available_cores())?;
    rayon::ThreadPoolBuilder::new()
        .num_threads(cpu)
        .build_global()
        .map_err(|_| "Failed to initialise rayon thread pool")?;

    let dirs = simulation_dirs(&args.src)?;
    info!(
        "{} simulations, {}x{} px, {} mode, up to {} combinations each",
        dirs.len(),
        config.resolution.width,
        config.resolution.height,
        config.power_mode,
        config.max_combinations
    );

    if args.survey {
        run_survey(&dirs, &config, &args.dst)
    } else {
        run_dataset(&dirs, &config, &args.dst, args.preview)
    }
}
