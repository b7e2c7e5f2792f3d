//! Windowed-sinc FIR lowpass design.
//!
//! Coefficients are a pure function of [`FilterSpec`]. Every window is
//! symmetric, so only the first half is evaluated and mirrored onto the
//! second half; this keeps `coeffs[i] == coeffs[M - 1 - i]` exact in
//! floating point.

use std::f64::consts::PI;
use std::fmt;

/// Longest filter accepted by [`FilterSpec`].
pub const MAX_FILTER_LENGTH: usize = 100;

/// Window applied to the ideal lowpass impulse response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowKind {
    #[default]
    Blackman,
    Bartlett,
    Hanning,
    Hamming,
    Rectangular,
}

type WindowFn = fn(usize, usize) -> f64;

/// Indexed by `WindowKind::index`.
const WINDOWS: [WindowFn; 5] = [blackman, bartlett, hanning, hamming, rectangular];

impl WindowKind {
    pub const ALL: [WindowKind; 5] = [
        WindowKind::Blackman,
        WindowKind::Bartlett,
        WindowKind::Hanning,
        WindowKind::Hamming,
        WindowKind::Rectangular,
    ];

    /// Map the numeric selector used by flags and the `F` command.
    pub fn from_index(index: i64) -> Option<Self> {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
    }

    pub fn index(self) -> usize {
        self as usize
    }

    /// Window weight for tap `i` of an `m`-tap filter.
    pub fn weight(self, i: usize, m: usize) -> f64 {
        WINDOWS[self.index()](i, m)
    }
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WindowKind::Blackman => "Blackman",
            WindowKind::Bartlett => "Bartlett",
            WindowKind::Hanning => "Hanning",
            WindowKind::Hamming => "Hamming",
            WindowKind::Rectangular => "Rectangular",
        };
        f.write_str(name)
    }
}

// i / (M - 1), with the single-tap case pinned to 0.
fn position(i: usize, m: usize) -> f64 {
    if m < 2 {
        0.0
    } else {
        i as f64 / (m - 1) as f64
    }
}

fn blackman(i: usize, m: usize) -> f64 {
    let x = position(i, m);
    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
}

fn bartlett(i: usize, m: usize) -> f64 {
    let x = position(i, m);
    let center = (m as f64 - 1.0) / 2.0;
    if i as f64 <= center {
        2.0 * x
    } else {
        2.0 * (1.0 - x)
    }
}

fn hanning(i: usize, m: usize) -> f64 {
    0.5 - 0.5 * (2.0 * PI * position(i, m)).cos()
}

fn hamming(i: usize, m: usize) -> f64 {
    0.54 - 0.46 * (2.0 * PI * position(i, m)).cos()
}

fn rectangular(_i: usize, _m: usize) -> f64 {
    1.0
}

/// Inputs to [`design`]. Only validated values are ever stored here; see
/// `config` for the substitution rules.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSpec {
    pub window: WindowKind,
    pub length: usize,
    /// Normalized cutoff, fraction of Nyquist.
    pub cutoff: f64,
}

impl FilterSpec {
    pub fn design(&self) -> Vec<f64> {
        design(self.window, self.length, self.cutoff)
    }
}

impl fmt::Display for FilterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-windowed FIR lowpass, {} coefficients, cutoff {}*pi",
            self.window, self.length, self.cutoff
        )
    }
}

/// Compute `m` lowpass coefficients for the given window and cutoff.
///
/// Assumes `1 <= m <= MAX_FILTER_LENGTH` and `0 < cutoff < 1`.
pub fn design(window: WindowKind, m: usize, cutoff: f64) -> Vec<f64> {
    debug_assert!((1..=MAX_FILTER_LENGTH).contains(&m));
    debug_assert!(cutoff > 0.0 && cutoff < 1.0);

    let omega = cutoff * PI;
    let center = (m as f64 - 1.0) / 2.0;
    let mut coeffs = vec![0.0; m];

    for i in 0..m.div_ceil(2) {
        let d = i as f64 - center;
        let value = if d == 0.0 {
            cutoff
        } else {
            window.weight(i, m) * (omega * d).sin() / (PI * d)
        };
        coeffs[i] = value;
        coeffs[m - 1 - i] = value;
    }

    coeffs
}
