//! Frequency-response plots of the current filter.
//!
//! The response is the magnitude of a zero-padded FFT of the coefficients,
//! in decibels. Output goes to `~/.whitenoise/`: `plot-data` holds
//! `frequency_hz gain_db` rows and `filter.png` the rendered curve.

use anyhow::Context;
use image::{Rgb, RgbImage};
use rustfft::{num_complex::Complex, FftPlanner};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

pub const FFT_SIZE: usize = 2048;
pub const MIN_PLOT_WIDTH: u32 = 100;
pub const MAX_PLOT_WIDTH: u32 = 3000;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const GRID: Rgb<u8> = Rgb([220, 220, 220]);
const AXIS: Rgb<u8> = Rgb([0, 0, 0]);
const CURVE: Rgb<u8> = Rgb([200, 30, 30]);
const FLOOR_DB: f64 = -100.0;

/// Visualization capability used by the stream controller.
pub trait FrequencyPlotter {
    /// Render the response of `coeffs` and return the image path.
    fn render(&mut self, coeffs: &[f64], sample_rate: u32, width: u32)
        -> anyhow::Result<PathBuf>;
}

/// One point of the magnitude response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResponsePoint {
    pub frequency_hz: f64,
    pub gain_db: f64,
}

/// Magnitude response from DC to Nyquist, `FFT_SIZE / 2 + 1` points.
pub fn frequency_response(coeffs: &[f64], sample_rate: u32) -> Vec<ResponsePoint> {
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(FFT_SIZE);
    let mut buffer: Vec<Complex<f64>> = coeffs
        .iter()
        .take(FFT_SIZE)
        .map(|&c| Complex::new(c, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(FFT_SIZE)
        .collect();
    fft.process(&mut buffer);

    let bins = FFT_SIZE / 2 + 1;
    buffer[..bins]
        .iter()
        .enumerate()
        .map(|(i, z)| ResponsePoint {
            frequency_hz: f64::from(sample_rate) * i as f64 / bins as f64 / 2.0,
            gain_db: 10.0 * z.norm().log10(),
        })
        .collect()
}

/// Writes `plot-data` and `filter.png` under a base directory.
pub struct PngPlotter {
    dir: PathBuf,
}

impl PngPlotter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Plot into `~/.whitenoise`.
    pub fn in_home() -> anyhow::Result<Self> {
        let dirs = directories::BaseDirs::new().context("could not locate home directory")?;
        Ok(Self::new(dirs.home_dir().join(".whitenoise")))
    }

    fn write_data(&self, points: &[ResponsePoint]) -> anyhow::Result<()> {
        let path = self.dir.join("plot-data");
        let mut file = fs::File::create(&path)
            .with_context(|| format!("could not open {} for writing", path.display()))?;
        for p in points.iter().filter(|p| p.gain_db.is_finite()) {
            writeln!(file, "{}     {}", p.frequency_hz, p.gain_db)?;
        }
        Ok(())
    }
}

impl FrequencyPlotter for PngPlotter {
    fn render(
        &mut self,
        coeffs: &[f64],
        sample_rate: u32,
        width: u32,
    ) -> anyhow::Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("could not create {}", self.dir.display()))?;
        let points = frequency_response(coeffs, sample_rate);
        self.write_data(&points)?;

        let width = width.clamp(MIN_PLOT_WIDTH, MAX_PLOT_WIDTH);
        let image = draw_response(&points, width, width * 3 / 4);
        let path = self.dir.join("filter.png");
        image
            .save(&path)
            .with_context(|| format!("could not write {}", path.display()))?;
        log::info!("frequency response written to {}", path.display());
        Ok(path)
    }
}

fn draw_response(points: &[ResponsePoint], width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, BACKGROUND);
    let margin = (width / 20).max(4);
    let plot_w = width - 2 * margin;
    let plot_h = height - 2 * margin;

    let finite = || points.iter().map(|p| p.gain_db).filter(|g| g.is_finite());
    let top = finite().fold(FLOOR_DB, f64::max).ceil();
    let bottom = finite().fold(top, f64::min).max(FLOOR_DB).min(top - 1.0).floor();
    let max_freq = points.last().map_or(1.0, |p| p.frequency_hz).max(1.0);

    let to_x = |f: f64| margin + ((f / max_freq) * f64::from(plot_w - 1)).round() as u32;
    let to_y = |db: f64| {
        let t = ((top - db.max(bottom)) / (top - bottom)).clamp(0.0, 1.0);
        margin + (t * f64::from(plot_h - 1)).round() as u32
    };

    for step in 0..=10 {
        let y = margin + plot_h.saturating_sub(1) * step / 10;
        let x = margin + plot_w.saturating_sub(1) * step / 10;
        for i in 0..plot_w {
            img.put_pixel(margin + i, y, GRID);
        }
        for j in 0..plot_h {
            img.put_pixel(x, margin + j, GRID);
        }
    }
    for i in 0..plot_w {
        img.put_pixel(margin + i, margin + plot_h - 1, AXIS);
    }
    for j in 0..plot_h {
        img.put_pixel(margin, margin + j, AXIS);
    }

    let mut previous: Option<(u32, u32)> = None;
    for p in points {
        let db = if p.gain_db.is_finite() { p.gain_db } else { bottom };
        let current = (to_x(p.frequency_hz), to_y(db));
        if let Some(prev) = previous {
            draw_line(&mut img, prev, current, CURVE);
        }
        previous = Some(current);
    }
    img
}

fn draw_line(img: &mut RgbImage, from: (u32, u32), to: (u32, u32), color: Rgb<u8>) {
    let (x0, y0) = (i64::from(from.0), i64::from(from.1));
    let (x1, y1) = (i64::from(to.0), i64::from(to.1));
    let steps = (x1 - x0).abs().max((y1 - y0).abs()).max(1);
    for s in 0..=steps {
        let x = x0 + (x1 - x0) * s / steps;
        let y = y0 + (y1 - y0) * s / steps;
        img.put_pixel(x as u32, y as u32, color);
    }
}
