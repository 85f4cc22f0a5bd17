use std::path::Path;

use image::{GrayImage, ImageFormat};

use crate::error::{SynthError, SynthResult};
use crate::resample::RasterLayout;
use crate::synth::peak;

/// Value mapped to pixel 255.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Ceiling {
    /// Dataset-wide ceiling; every image is normalised against the same value.
    Fixed(f64),
    /// Each image normalised against its own maximum.
    PerImage,
}

impl Ceiling {
    fn resolve(self, max: f64) -> SynthResult<f64> {
        match self {
            Ceiling::Fixed(ceiling) => {
                if !(ceiling.is_finite() && ceiling > 0.0) {
                    return Err(SynthError::NonPositiveCeiling(ceiling));
                }
                if ceiling < max {
                    return Err(SynthError::CeilingTooLow { ceiling, max });
                }
                Ok(ceiling)
            }
            Ceiling::PerImage => {
                if max <= 0.0 {
                    return Err(SynthError::NonPositiveCeiling(max));
                }
                Ok(max)
            }
        }
    }
}

/// Quantise a power map to an 8-bit grayscale raster.
pub fn encode(power: &[f64], layout: &RasterLayout, ceiling: Ceiling) -> SynthResult<GrayImage> {
    let pixels_expected = layout.width * layout.height;
    if layout.index.len() != pixels_expected || power.len() != pixels_expected {
        return Err(SynthError::LayoutMismatch {
            expected: pixels_expected,
            found: power.len(),
        });
    }
    if let Some(bad) = power.iter().position(|v| !v.is_finite()) {
        return Err(SynthError::NonFinitePower(bad));
    }

    let ceiling = ceiling.resolve(peak(power))?;
    let pixels: Vec<u8> = layout
        .index
        .iter()
        .map(|&point| (power[point] * 255.0 / ceiling).round().clamp(0.0, 255.0) as u8)
        .collect();

    GrayImage::from_raw(layout.width as u32, layout.height as u32, pixels).ok_or(
        SynthError::LayoutMismatch {
            expected: pixels_expected,
            found: power.len(),
        },
    )
}

pub fn write_png(image: &GrayImage, path: &Path) -> SynthResult<()> {
    image.save_with_format(path, ImageFormat::Png)?;
    Ok(())
}
