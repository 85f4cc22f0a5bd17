use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use num_complex::Complex;

use crate::error::{SynthError, SynthResult};

/// Spatial axis of the field vector and of the sampling grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    #[inline(always)]
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        f.write_str(name)
    }
}

/// Complex E-field of one antenna: one coordinate triple and one complex
/// vector per grid point.
#[derive(Clone, Debug)]
pub struct AntennaField {
    pub points: Vec<[f64; 3]>,
    pub values: Vec<[Complex<f64>; 3]>,
}

/// Raw per-antenna field as exported by the simulator.
///
/// `values` is laid out point-major: `[point][antenna][axis]`.
#[derive(Clone, Debug)]
pub struct FieldSample {
    points: Vec<[f64; 3]>,
    antennas: usize,
    values: Vec<Complex<f64>>,
}

impl FieldSample {
    /// Merge per-antenna fields into one sample. Every antenna must share the
    /// point set and ordering of antenna 0.
    pub fn from_antennas(fields: Vec<AntennaField>) -> SynthResult<Self> {
        let antennas = fields.len();
        let Some(first) = fields.first() else {
            return Err(SynthError::TooFewAntennas(0));
        };
        let points = first.points.clone();
        let n_points = points.len();

        for (antenna, field) in fields.iter().enumerate() {
            if field.points.len() != n_points || field.values.len() != n_points {
                return Err(SynthError::GridPointMismatch {
                    antenna,
                    expected: n_points,
                    found: field.points.len().min(field.values.len()),
                });
            }
            if antenna == 0 {
                continue;
            }
            for (point, (a, b)) in points.iter().zip(field.points.iter()).enumerate() {
                if !same_coordinate(a, b) {
                    return Err(SynthError::CoordinateMismatch { antenna, point });
                }
            }
        }

        let mut values = vec![Complex::new(0.0, 0.0); n_points * antennas * 3];
        for (antenna, field) in fields.iter().enumerate() {
            for (point, vector) in field.values.iter().enumerate() {
                let base = (point * antennas + antenna) * 3;
                values[base..base + 3].copy_from_slice(vector);
            }
        }

        Ok(Self {
            points,
            antennas,
            values,
        })
    }

    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    pub fn n_points(&self) -> usize {
        self.points.len()
    }

    pub fn antennas(&self) -> usize {
        self.antennas
    }

    #[inline(always)]
    pub fn value(&self, point: usize, antenna: usize, axis: Axis) -> Complex<f64> {
        self.values[(point * self.antennas + antenna) * 3 + axis.index()]
    }

    /// Sorted distinct coordinates along one axis.
    pub fn unique_coordinates(&self, axis: Axis) -> Vec<f64> {
        let mut coords: Vec<f64> = self.points.iter().map(|p| p[axis.index()]).collect();
        coords.sort_by(|a, b| a.total_cmp(b));
        coords.dedup_by(|a, b| same_value(*a, *b));
        coords
    }
}

fn same_value(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= 1e-9 * scale
}

fn same_coordinate(a: &[f64; 3], b: &[f64; 3]) -> bool {
    a.iter().zip(b.iter()).all(|(&u, &v)| same_value(u, v))
}

// CST export column names; the first one carries the comment marker.
const COLUMN_NAMES: [&str; 9] = [
    "x[mm]", "y[mm]", "z[mm]", "xRe[V/m]", "yRe[V/m]", "zRe[V/m]", "xIm[V/m]", "yIm[V/m]",
    "zIm[V/m]",
];

fn column_positions(header: &str, path: &Path) -> SynthResult<[usize; 9]> {
    let names: Vec<String> = header
        .split(';')
        .map(|name| name.trim().trim_start_matches('#').trim().to_string())
        .collect();
    let mut positions = [0usize; 9];
    for (slot, wanted) in positions.iter_mut().zip(COLUMN_NAMES.iter()) {
        *slot = names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SynthError::Parse {
                path: path.to_path_buf(),
                line: 1,
                reason: format!("missing column {wanted}"),
            })?;
    }
    Ok(positions)
}

/// Read one `;`-delimited CST field export.
pub fn read_antenna_csv(path: &Path) -> SynthResult<AntennaField> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = match lines.next() {
        Some(line) => line?,
        None => {
            return Err(SynthError::Parse {
                path: path.to_path_buf(),
                line: 1,
                reason: "empty file".into(),
            })
        }
    };
    let columns = column_positions(&header, path)?;

    let mut points = Vec::new();
    let mut values = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        let line_no = idx + 2;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(';').map(str::trim).collect();
        let mut parsed = [0.0f64; 9];
        for (slot, &col) in parsed.iter_mut().zip(columns.iter()) {
            let text = fields.get(col).ok_or_else(|| SynthError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("expected at least {} columns, found {}", col + 1, fields.len()),
            })?;
            *slot = text.parse::<f64>().map_err(|e| SynthError::Parse {
                path: path.to_path_buf(),
                line: line_no,
                reason: format!("{text:?}: {e}"),
            })?;
        }
        points.push([parsed[0], parsed[1], parsed[2]]);
        values.push([
            Complex::new(parsed[3], parsed[6]),
            Complex::new(parsed[4], parsed[7]),
            Complex::new(parsed[5], parsed[8]),
        ]);
    }

    Ok(AntennaField { points, values })
}

/// Antenna exports of one simulation, sorted by file name so that antenna
/// numbering is stable between runs.
pub fn antenna_files(dir: &Path) -> SynthResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p
                    .extension()
                    .and_then(|s| s.to_str())
                    .map(|s| s.eq_ignore_ascii_case("csv"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(SynthError::NoAntennaFiles(dir.to_path_buf()));
    }
    Ok(files)
}

pub fn load_simulation(dir: &Path) -> SynthResult<FieldSample> {
    let fields = antenna_files(dir)?
        .iter()
        .map(|path| read_antenna_csv(path))
        .collect::<SynthResult<Vec<_>>>()?;
    FieldSample::from_antennas(fields)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Regular xy-plane sample with a field that is linear in x and y.
    pub(crate) fn planar_sample(antennas: usize, nx: usize, ny: usize) -> FieldSample {
        let fields = (0..antennas)
            .map(|a| {
                let mut points = Vec::new();
                let mut values = Vec::new();
                for iy in 0..ny {
                    for ix in 0..nx {
                        let x = ix as f64 * 2.0 - 3.0;
                        let y = iy as f64 * 0.5;
                        points.push([x, y, 7.0]);
                        let s = a as f64 + 1.0;
                        values.push([
                            Complex::new(s * x, y),
                            Complex::new(x + y, -s),
                            Complex::new(0.5 * s, x - y),
                        ]);
                    }
                }
                AntennaField { points, values }
            })
            .collect();
        FieldSample::from_antennas(fields).unwrap()
    }

    #[test]
    fn from_antennas_interleaves_point_major() {
        let sample = planar_sample(2, 3, 2);
        assert_eq!(sample.antennas(), 2);
        assert_eq!(sample.n_points(), 6);
        // point 1 is (x=-1, y=0)
        assert_eq!(sample.value(1, 0, Axis::X), Complex::new(-1.0, 0.0));
        assert_eq!(sample.value(1, 1, Axis::X), Complex::new(-2.0, 0.0));
        assert_eq!(sample.value(1, 1, Axis::Y), Complex::new(-1.0, -2.0));
    }

    #[test]
    fn rejects_antennas_with_different_point_counts() {
        let a = AntennaField {
            points: vec![[0.0, 0.0, 0.0]; 2],
            values: vec![[Complex::new(0.0, 0.0); 3]; 2],
        };
        let b = AntennaField {
            points: vec![[0.0, 0.0, 0.0]; 3],
            values: vec![[Complex::new(0.0, 0.0); 3]; 3],
        };
        let err = FieldSample::from_antennas(vec![a, b]).unwrap_err();
        assert!(matches!(
            err,
            SynthError::GridPointMismatch {
                antenna: 1,
                expected: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn rejects_antennas_with_shifted_coordinates() {
        let a = AntennaField {
            points: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            values: vec![[Complex::new(0.0, 0.0); 3]; 2],
        };
        let mut b = a.clone();
        b.points[1][0] = 1.5;
        let err = FieldSample::from_antennas(vec![a, b]).unwrap_err();
        assert!(matches!(
            err,
            SynthError::CoordinateMismatch {
                antenna: 1,
                point: 1
            }
        ));
    }

    #[test]
    fn unique_coordinates_are_sorted_and_deduplicated() {
        let sample = planar_sample(1, 3, 2);
        assert_eq!(sample.unique_coordinates(Axis::X), vec![-3.0, -1.0, 1.0]);
        assert_eq!(sample.unique_coordinates(Axis::Y), vec![0.0, 0.5]);
        assert_eq!(sample.unique_coordinates(Axis::Z), vec![7.0]);
    }

    #[test]
    fn reads_cst_export_by_header_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e-field 1.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            "#x[mm];y[mm];z[mm];xRe[V/m];yRe[V/m];zRe[V/m];xIm[V/m];yIm[V/m];zIm[V/m]"
        )
        .unwrap();
        writeln!(file, "-1.0;2.0;0.0;1.0;2.0;3.0;-1.0;-2.0;-3.0").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "1.0;2.0;0.0;4.0;5.0;6.0;0.5;0.25;0.125").unwrap();
        drop(file);

        let field = read_antenna_csv(&path).unwrap();
        assert_eq!(field.points, vec![[-1.0, 2.0, 0.0], [1.0, 2.0, 0.0]]);
        assert_eq!(field.values[0][2], Complex::new(3.0, -3.0));
        assert_eq!(field.values[1][1], Complex::new(5.0, 0.25));
    }

    #[test]
    fn reports_line_of_malformed_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        std::fs::write(
            &path,
            "#x[mm];y[mm];z[mm];xRe[V/m];yRe[V/m];zRe[V/m];xIm[V/m];yIm[V/m];zIm[V/m]\n\
             0;0;0;1;1;1;0;0;0\n\
             0;0;abc;1;1;1;0;0;0\n",
        )
        .unwrap();
        match read_antenna_csv(&path) {
            Err(SynthError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn load_simulation_orders_antennas_by_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let header =
            "#x[mm];y[mm];z[mm];xRe[V/m];yRe[V/m];zRe[V/m];xIm[V/m];yIm[V/m];zIm[V/m]\n";
        std::fs::write(
            dir.path().join("e-field 2.csv"),
            format!("{header}0;0;0;2;0;0;0;0;0\n"),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("e-field 1.csv"),
            format!("{header}0;0;0;1;0;0;0;0;0\n"),
        )
        .unwrap();
        std::fs::write(dir.path().join("model.dxf"), "ignored").unwrap();

        let sample = load_simulation(dir.path()).unwrap();
        assert_eq!(sample.antennas(), 2);
        assert_eq!(sample.value(0, 0, Axis::X).re, 1.0);
        assert_eq!(sample.value(0, 1, Axis::X).re, 2.0);
    }
}
