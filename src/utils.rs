use std::error::Error;
use std::f64::consts::PI;

pub type DynError = Box<dyn Error + Send + Sync>;

/// `n` evenly spaced values from `start` to `end` inclusive. The last value is
/// pinned to `end` so resampled grids keep their exact extent.
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            let mut values: Vec<f64> = (0..n).map(|i| start + step * i as f64).collect();
            values[n - 1] = end;
            values
        }
    }
}

/// Largest `r` with `r^k <= value`. Float root first, then corrected with
/// exact integer powers.
pub fn integer_root(value: usize, k: u32) -> usize {
    if k == 0 {
        return 0;
    }
    if k == 1 || value <= 1 {
        return value;
    }
    let fits = |r: usize| -> bool {
        match (r as u128).checked_pow(k) {
            Some(p) => p <= value as u128,
            None => false,
        }
    };
    let mut root = (value as f64).powf(1.0 / k as f64).floor() as usize;
    while root > 0 && !fits(root) {
        root -= 1;
    }
    while fits(root + 1) {
        root += 1;
    }
    root
}

/// Phase in radians expressed as a fraction of a full turn, wrapped to [0, 1).
pub fn normalized_phase(phase_rad: f64) -> f64 {
    let turns = (phase_rad / (2.0 * PI)).rem_euclid(1.0);
    // rem_euclid can round up to exactly 1.0 for tiny negative inputs
    if turns >= 1.0 {
        0.0
    } else {
        turns
    }
}

#[cfg(target_family = "unix")]
pub fn available_cores() -> usize {
    let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if online < 1 {
        1
    } else {
        online as usize
    }
}

#[cfg(not(target_family = "unix"))]
pub fn available_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
