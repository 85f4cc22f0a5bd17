//! Dataset manifest (`dataset.csv`) and the geometry hand-off
//! (`geometry.csv`) consumed by the external model rasterizer.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::{SynthError, SynthResult};
use crate::phases::PhaseCombination;
use crate::resample::FieldGrid;
use crate::utils::normalized_phase;

pub const MANIFEST_FILE: &str = "dataset.csv";
pub const GEOMETRY_FILE: &str = "geometry.csv";
pub const OUTPUT_DIR: &str = "output";
pub const INPUT_DIR: &str = "input";

pub fn output_image_name(index: usize) -> String {
    format!("{OUTPUT_DIR}/{index:07}.png")
}

pub fn input_image_name(index: usize) -> String {
    format!("{INPUT_DIR}/{index:07}.png")
}

/// One manifest row: the synthesized image, the model image of its base
/// simulation and the labels of every non-reference antenna.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetRecord {
    pub output: usize,
    pub input: usize,
    /// (amplitude, phase as a fraction of a turn in [0, 1))
    pub labels: Vec<(f64, f64)>,
}

impl DatasetRecord {
    pub fn new(output: usize, input: usize, combination: &PhaseCombination<'_>) -> Self {
        let labels = combination
            .amplitudes
            .iter()
            .zip(combination.phases.iter())
            .skip(1)
            .map(|(&amplitude, &phase)| (amplitude, normalized_phase(phase)))
            .collect();
        Self {
            output,
            input,
            labels,
        }
    }

    pub fn output_image(&self) -> String {
        output_image_name(self.output)
    }

    pub fn input_image(&self) -> String {
        input_image_name(self.input)
    }
}

/// Appends records to `dataset.csv`. The header is sized from the first
/// simulation and every later record must carry the same antenna count.
pub struct ManifestWriter<W: Write> {
    out: W,
    antennas: usize,
    rows: usize,
}

impl ManifestWriter<BufWriter<File>> {
    pub fn create(path: &Path, antennas: usize) -> SynthResult<Self> {
        ManifestWriter::new(BufWriter::new(File::create(path)?), antennas)
    }
}

impl<W: Write> ManifestWriter<W> {
    pub fn new(mut out: W, antennas: usize) -> SynthResult<Self> {
        if antennas < 2 {
            return Err(SynthError::TooFewAntennas(antennas));
        }
        write!(out, "output_img;input_img")?;
        // antenna labels are 1-based; antenna 1 is the unlabeled reference
        for label in 2..=antennas {
            write!(out, ";amplitude_{label};phase_{label}")?;
        }
        writeln!(out)?;
        Ok(Self {
            out,
            antennas,
            rows: 0,
        })
    }

    pub fn antennas(&self) -> usize {
        self.antennas
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn append(&mut self, record: &DatasetRecord) -> SynthResult<()> {
        if record.labels.len() + 1 != self.antennas {
            return Err(SynthError::AntennaCountMismatch {
                grid: self.antennas,
                combination: record.labels.len() + 1,
            });
        }
        write!(
            self.out,
            "\"{}\";\"{}\"",
            record.output_image(),
            record.input_image()
        )?;
        for (amplitude, phase) in &record.labels {
            write!(self.out, ";{amplitude:.4};{phase:.4}")?;
        }
        writeln!(self.out)?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> SynthResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Per-simulation plane identity and pixel scale for the geometry rasterizer.
pub struct GeometryWriter<W: Write> {
    out: W,
}

impl GeometryWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> SynthResult<Self> {
        GeometryWriter::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> GeometryWriter<W> {
    pub fn new(mut out: W) -> SynthResult<Self> {
        writeln!(out, "input_img;plane;mm_per_px;width;height")?;
        Ok(Self { out })
    }

    pub fn append(&mut self, input: usize, grid: &FieldGrid) -> SynthResult<()> {
        let plane = grid
            .plane()
            .map(|p| p.to_string())
            .unwrap_or_else(|| "3d".to_string());
        let (width, height) = grid.raster_size();
        writeln!(
            self.out,
            "\"{}\";{};{:.6};{};{}",
            input_image_name(input),
            plane,
            grid.mm_per_px(),
            width,
            height
        )?;
        Ok(())
    }

    pub fn flush(&mut self) -> SynthResult<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
impl<W: Write> ManifestWriter<W> {
    pub(crate) fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
impl<W: Write> GeometryWriter<W> {
    pub(crate) fn into_inner(self) -> W {
        self.out
    }
}
