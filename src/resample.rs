use std::fmt;
use std::str::FromStr;

use num_complex::Complex;
use rayon::prelude::*;

use crate::error::{SynthError, SynthResult};
use crate::field::{Axis, FieldSample};
use crate::utils::linspace;

/// Tolerance (relative to the axis extent) for treating a target coordinate
/// as lying on the source bounding box.
const BOUNDS_EPS: f64 = 1e-9;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Projection {
    TwoD,
    ThreeD,
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::TwoD => f.write_str("2d"),
            Projection::ThreeD => f.write_str("3d"),
        }
    }
}

impl FromStr for Projection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "2d" => Ok(Projection::TwoD),
            "3d" => Ok(Projection::ThreeD),
            other => Err(format!("projection must be 2d or 3d, got {other:?}")),
        }
    }
}

/// Orientation of a 2D cut-plane, named by its two in-plane axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Plane {
    Yz,
    Xz,
    Xy,
}

impl Plane {
    fn from_normal(axis: Axis) -> Self {
        match axis {
            Axis::X => Plane::Yz,
            Axis::Y => Plane::Xz,
            Axis::Z => Plane::Xy,
        }
    }

    /// (width axis, height axis) of the image raster for this plane.
    pub fn raster_axes(self) -> (Axis, Axis) {
        match self {
            Plane::Yz => (Axis::Z, Axis::Y),
            Plane::Xz => (Axis::X, Axis::Z),
            Plane::Xy => (Axis::X, Axis::Y),
        }
    }
}

impl fmt::Display for Plane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Plane::Yz => "yz",
            Plane::Xz => "xz",
            Plane::Xy => "xy",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Resolution {
    pub width: usize,
    pub height: usize,
    pub depth: Option<usize>,
}

/// Pixel order of an encoded image: `index[row * width + col]` is the grid
/// point shown at that pixel.
#[derive(Clone, Debug)]
pub struct RasterLayout {
    pub width: usize,
    pub height: usize,
    pub index: Vec<usize>,
}

/// Field resampled onto a regular grid.
#[derive(Clone, Debug)]
pub struct FieldGrid {
    shape: [usize; 3],
    coords: [Vec<f64>; 3],
    plane: Option<Plane>,
    resolution: Resolution,
    antennas: usize,
    values: Vec<Complex<f64>>,
}

impl FieldGrid {
    pub fn shape(&self) -> [usize; 3] {
        self.shape
    }

    pub fn n_points(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn antennas(&self) -> usize {
        self.antennas
    }

    pub fn plane(&self) -> Option<Plane> {
        self.plane
    }

    pub fn coordinates(&self, axis: Axis) -> &[f64] {
        &self.coords[axis.index()]
    }

    pub fn extent(&self, axis: Axis) -> (f64, f64) {
        let coords = self.coordinates(axis);
        (coords[0], coords[coords.len() - 1])
    }

    #[inline(always)]
    pub fn point_index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.shape[1] + iy) * self.shape[2] + iz
    }

    /// All antenna × axis values of one grid point, antenna-major.
    #[inline(always)]
    pub fn point_values(&self, point: usize) -> &[Complex<f64>] {
        let block = self.antennas * 3;
        &self.values[point * block..(point + 1) * block]
    }

    /// Physical size of one pixel along the image width, in the units of the
    /// source coordinates (mm for CST exports).
    pub fn mm_per_px(&self) -> f64 {
        let width_axis = self.plane.map(|p| p.raster_axes().0).unwrap_or(Axis::X);
        let (min, max) = self.extent(width_axis);
        (max - min) / self.resolution.width as f64
    }

    /// Raster for image encoding. Columns follow the width axis and rows the
    /// height axis; a 3D grid stacks its z slices vertically.
    pub fn raster_layout(&self) -> RasterLayout {
        let [nx, ny, nz] = self.shape;
        let (width, height) = self.raster_size();
        let mut index = Vec::with_capacity(self.n_points());
        match self.plane {
            Some(plane) => {
                let (col_axis, row_axis) = plane.raster_axes();
                for row in 0..height {
                    for col in 0..width {
                        let mut ijk = [0usize; 3];
                        ijk[col_axis.index()] = col;
                        ijk[row_axis.index()] = row;
                        index.push(self.point_index(ijk[0], ijk[1], ijk[2]));
                    }
                }
                RasterLayout {
                    width,
                    height,
                    index,
                }
            }
            None => {
                for iz in 0..nz {
                    for iy in 0..ny {
                        for ix in 0..nx {
                            index.push(self.point_index(ix, iy, iz));
                        }
                    }
                }
                RasterLayout {
                    width,
                    height,
                    index,
                }
            }
        }
    }

    /// (width, height) of the encoded image in pixels.
    pub fn raster_size(&self) -> (usize, usize) {
        let [nx, ny, nz] = self.shape;
        match self.plane {
            Some(plane) => {
                let (col_axis, row_axis) = plane.raster_axes();
                (self.shape[col_axis.index()], self.shape[row_axis.index()])
            }
            None => (nx, ny * nz),
        }
    }
}

#[cfg(test)]
impl FieldGrid {
    pub(crate) fn value(&self, point: usize, antenna: usize, axis: Axis) -> Complex<f64> {
        self.values[(point * self.antennas + antenna) * 3 + axis.index()]
    }

    /// `width` x `height` xy-plane grid on the unit square where every point
    /// carries the same per-antenna field vectors.
    pub(crate) fn uniform(antenna_vectors: &[[Complex<f64>; 3]], width: usize, height: usize) -> Self {
        let antennas = antenna_vectors.len();
        let n_points = width * height;
        let mut values = Vec::with_capacity(n_points * antennas * 3);
        for _ in 0..n_points {
            for vector in antenna_vectors {
                values.extend_from_slice(vector);
            }
        }
        Self {
            shape: [width, height, 1],
            coords: [linspace(0.0, 1.0, width), linspace(0.0, 1.0, height), vec![0.0]],
            plane: Some(Plane::Xy),
            resolution: Resolution {
                width,
                height,
                depth: None,
            },
            antennas,
            values,
        }
    }
}

/// Source sample rearranged onto its own regular grid.
struct SourceGrid {
    coords: [Vec<f64>; 3],
    antennas: usize,
    dense: Vec<Complex<f64>>,
}

fn nearest_index(coords: &[f64], value: f64) -> usize {
    let upper = coords.partition_point(|&c| c < value);
    if upper == 0 {
        0
    } else if upper >= coords.len() {
        coords.len() - 1
    } else if (value - coords[upper - 1]).abs() <= (coords[upper] - value).abs() {
        upper - 1
    } else {
        upper
    }
}

impl SourceGrid {
    fn from_sample(sample: &FieldSample) -> SynthResult<Self> {
        let coords = [
            sample.unique_coordinates(Axis::X),
            sample.unique_coordinates(Axis::Y),
            sample.unique_coordinates(Axis::Z),
        ];
        let (nx, ny, nz) = (coords[0].len(), coords[1].len(), coords[2].len());
        let n_points = sample.n_points();
        let irregular = || SynthError::IrregularGrid {
            points: n_points,
            nx,
            ny,
            nz,
        };
        if nx * ny * nz != n_points {
            return Err(irregular());
        }

        let antennas = sample.antennas();
        let block = antennas * 3;
        let mut dense = vec![Complex::new(0.0, 0.0); n_points * block];
        let mut filled = vec![false; n_points];
        for (src, point) in sample.points().iter().enumerate() {
            let ix = nearest_index(&coords[0], point[0]);
            let iy = nearest_index(&coords[1], point[1]);
            let iz = nearest_index(&coords[2], point[2]);
            let dst = (ix * ny + iy) * nz + iz;
            if filled[dst] {
                return Err(irregular());
            }
            filled[dst] = true;
            for antenna in 0..antennas {
                for axis in Axis::ALL {
                    dense[dst * block + antenna * 3 + axis.index()] =
                        sample.value(src, antenna, axis);
                }
            }
        }

        Ok(Self {
            coords,
            antennas,
            dense,
        })
    }

    fn degenerate_axes(&self) -> Vec<Axis> {
        Axis::ALL
            .into_iter()
            .filter(|axis| self.coords[axis.index()].len() == 1)
            .collect()
    }

    /// Lower cell index and fractional offset of `value` along `axis`.
    fn locate(&self, axis: Axis, value: f64) -> SynthResult<(usize, f64)> {
        let coords = &self.coords[axis.index()];
        let min = coords[0];
        let max = coords[coords.len() - 1];
        let eps = BOUNDS_EPS * (max - min).abs().max(1.0);
        if !(value >= min - eps && value <= max + eps) {
            return Err(SynthError::OutOfBounds {
                axis,
                value,
                min,
                max,
            });
        }
        if coords.len() == 1 {
            return Ok((0, 0.0));
        }
        let clamped = value.clamp(min, max);
        let upper = coords.partition_point(|&c| c <= clamped);
        let lower = upper.saturating_sub(1).min(coords.len() - 2);
        let t = (clamped - coords[lower]) / (coords[lower + 1] - coords[lower]);
        Ok((lower, t))
    }

    /// Multilinear interpolation of every antenna × axis value at `position`.
    fn interpolate_into(&self, position: [f64; 3], out: &mut [Complex<f64>]) -> SynthResult<()> {
        let block = self.antennas * 3;
        debug_assert_eq!(out.len(), block);
        let (ny, nz) = (self.coords[1].len(), self.coords[2].len());

        let mut stencil = [(0usize, 0.0f64); 3];
        for axis in Axis::ALL {
            stencil[axis.index()] = self.locate(axis, position[axis.index()])?;
        }

        out.fill(Complex::new(0.0, 0.0));
        for corner in 0..8usize {
            let mut weight = 1.0;
            let mut ijk = [0usize; 3];
            let mut skip = false;
            for axis in 0..3 {
                let upper = (corner >> axis) & 1 == 1;
                let (lower, t) = stencil[axis];
                if upper {
                    if self.coords[axis].len() == 1 || t == 0.0 {
                        skip = true;
                        break;
                    }
                    weight *= t;
                    ijk[axis] = lower + 1;
                } else {
                    weight *= 1.0 - t;
                    ijk[axis] = lower;
                }
            }
            if skip || weight == 0.0 {
                continue;
            }
            let src = ((ijk[0] * ny + ijk[1]) * nz + ijk[2]) * block;
            for (acc, &value) in out.iter_mut().zip(self.dense[src..src + block].iter()) {
                *acc += value * weight;
            }
        }
        Ok(())
    }
}

fn target_shape(
    projection: Projection,
    plane: Option<Plane>,
    resolution: Resolution,
) -> SynthResult<[usize; 3]> {
    let Resolution {
        width,
        height,
        depth,
    } = resolution;
    if width == 0 || height == 0 || depth == Some(0) {
        return Err(SynthError::InvalidResolution(format!(
            "width, height and depth must be at least 1 (got {width}x{height}x{})",
            depth.unwrap_or(1)
        )));
    }
    match (projection, plane) {
        (Projection::TwoD, Some(plane)) => {
            if depth.map_or(false, |d| d > 1) {
                return Err(SynthError::InvalidResolution(
                    "depth only applies to 3d projection".into(),
                ));
            }
            Ok(match plane {
                Plane::Yz => [1, height, width],
                Plane::Xz => [width, 1, height],
                Plane::Xy => [width, height, 1],
            })
        }
        (Projection::ThreeD, None) => {
            let depth = depth.ok_or_else(|| {
                SynthError::InvalidResolution("3d projection requires a depth".into())
            })?;
            Ok([width, height, depth])
        }
        (Projection::TwoD, None) => Err(SynthError::ProjectionMismatch {
            requested: Projection::TwoD,
            detected: Projection::ThreeD,
        }),
        (Projection::ThreeD, Some(_)) => Err(SynthError::ProjectionMismatch {
            requested: Projection::ThreeD,
            detected: Projection::TwoD,
        }),
    }
}

/// Resample `sample` onto a regular grid of the requested resolution,
/// keeping the physical extent of every axis.
pub fn resample(
    sample: &FieldSample,
    resolution: Resolution,
    projection: Projection,
) -> SynthResult<FieldGrid> {
    let source = SourceGrid::from_sample(sample)?;
    let plane = match source.degenerate_axes().as_slice() {
        [] => None,
        [normal] => Some(Plane::from_normal(*normal)),
        _ => return Err(SynthError::AmbiguousPlane),
    };
    let shape = target_shape(projection, plane, resolution)?;

    let coords: [Vec<f64>; 3] = std::array::from_fn(|axis| {
        let src = &source.coords[axis];
        linspace(src[0], src[src.len() - 1], shape[axis])
    });

    let antennas = source.antennas;
    let block = antennas * 3;
    let n_points: usize = shape.iter().product();
    let mut values = vec![Complex::new(0.0, 0.0); n_points * block];
    let (ny, nz) = (shape[1], shape[2]);
    values
        .par_chunks_mut(block)
        .enumerate()
        .try_for_each(|(point, out)| {
            let ix = point / (ny * nz);
            let iy = (point / nz) % ny;
            let iz = point % nz;
            let position = [coords[0][ix], coords[1][iy], coords[2][iz]];
            source.interpolate_into(position, out)
        })?;

    Ok(FieldGrid {
        shape,
        coords,
        plane,
        resolution,
        antennas,
        values,
    })
}
