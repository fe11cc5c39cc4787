//! Grayscale frame checks: darkness and flatness.

/// Pixel values below this count as dark.
const DARK_LEVEL: u8 = 32;

/// Mean and standard deviation of a grayscale buffer, in 0.0–255.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LumaStats {
    pub mean: f32,
    pub stddev: f32,
}

impl LumaStats {
    pub fn of(gray: &[u8]) -> Self {
        if gray.is_empty() {
            return Self {
                mean: 0.0,
                stddev: 0.0,
            };
        }
        let n = gray.len() as f64;
        let mean = gray.iter().map(|&p| f64::from(p)).sum::<f64>() / n;
        let variance = gray
            .iter()
            .map(|&p| (f64::from(p) - mean).powi(2))
            .sum::<f64>()
            / n;
        Self {
            mean: mean as f32,
            stddev: variance.sqrt() as f32,
        }
    }
}

/// True if more than `threshold_pct` of pixels fall below the dark level.
///
/// An empty frame is dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < DARK_LEVEL).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

/// True if the frame has (almost) no contrast to describe a face with.
pub fn is_flat_frame(gray: &[u8], min_stddev: f32) -> bool {
    LumaStats::of(gray).stddev < min_stddev
}
