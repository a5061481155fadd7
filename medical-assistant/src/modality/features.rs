use image::{DynamicImage, GrayImage, imageops::FilterType};
use serde::Serialize;

/// Images are downscaled to fit this box before feature extraction.
pub const ANALYSIS_MAX_SIDE: u32 = 512;

/// Sobel magnitude above which a pixel counts as an edge.
pub const EDGE_MAGNITUDE_THRESHOLD: f64 = 100.0;

/// Half-width of the moving average applied to the histogram.
pub const HISTOGRAM_SMOOTHING_RADIUS: usize = 2;

/// A histogram peak must hold at least this share of all pixels.
pub const HISTOGRAM_PEAK_MIN_SHARE: f64 = 0.005;

/// Scalar statistics the modality heuristic works from.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct FeatureVector {
    /// Mean gray level, 0–255.
    pub mean_brightness: f64,
    /// Standard deviation of gray levels.
    pub brightness_std: f64,
    /// Share of pixels whose gradient magnitude exceeds the edge threshold.
    pub edge_density: f64,
    /// Mean Sobel gradient magnitude.
    pub texture_strength: f64,
    /// Local maxima of the smoothed gray-level histogram.
    pub histogram_peaks: usize,
    /// Variance of the three RGB channel means; 0 for a pure gray image.
    pub color_variance: f64,
}

impl FeatureVector {
    pub fn extract(image: &DynamicImage) -> Self {
        let image = if image.width() > ANALYSIS_MAX_SIDE || image.height() > ANALYSIS_MAX_SIDE {
            image.resize(ANALYSIS_MAX_SIDE, ANALYSIS_MAX_SIDE, FilterType::Triangle)
        } else {
            image.clone()
        };

        let gray = image.to_luma8();
        let (mean_brightness, brightness_std) = brightness_stats(&gray);
        let (edge_density, texture_strength) = gradient_stats(&gray);

        FeatureVector {
            mean_brightness,
            brightness_std,
            edge_density,
            texture_strength,
            histogram_peaks: histogram_peaks(&gray),
            color_variance: color_variance(&image),
        }
    }
}

fn brightness_stats(gray: &GrayImage) -> (f64, f64) {
    let count = gray.pixels().len();
    if count == 0 {
        return (0.0, 0.0);
    }
    let n = count as f64;
    let mean = gray.pixels().map(|p| p.0[0] as f64).sum::<f64>() / n;
    let variance = gray
        .pixels()
        .map(|p| {
            let d = p.0[0] as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean, variance.sqrt())
}

/// Sobel gradients over interior pixels: (edge density, mean magnitude).
fn gradient_stats(gray: &GrayImage) -> (f64, f64) {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return (0.0, 0.0);
    }

    let at = |x: u32, y: u32| gray.get_pixel(x, y).0[0] as f64;
    let mut edges = 0usize;
    let mut magnitude_sum = 0.0;
    let mut count = 0usize;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            let magnitude = (gx * gx + gy * gy).sqrt();

            magnitude_sum += magnitude;
            if magnitude > EDGE_MAGNITUDE_THRESHOLD {
                edges += 1;
            }
            count += 1;
        }
    }

    (edges as f64 / count as f64, magnitude_sum / count as f64)
}

fn histogram_peaks(gray: &GrayImage) -> usize {
    let total = gray.pixels().len();
    if total == 0 {
        return 0;
    }

    let mut histogram = [0f64; 256];
    for pixel in gray.pixels() {
        histogram[pixel.0[0] as usize] += 1.0;
    }

    let smoothed: Vec<f64> = (0..256usize)
        .map(|i| {
            let lo = i.saturating_sub(HISTOGRAM_SMOOTHING_RADIUS);
            let hi = (i + HISTOGRAM_SMOOTHING_RADIUS).min(255);
            histogram[lo..=hi].iter().sum::<f64>() / (hi - lo + 1) as f64
        })
        .collect();

    let floor = total as f64 * HISTOGRAM_PEAK_MIN_SHARE;
    (0..256usize)
        .filter(|&i| {
            let value = smoothed[i];
            // Strictly above the left neighbour and not below the right one,
            // so a plateau counts once.
            let left = if i == 0 { f64::MIN } else { smoothed[i - 1] };
            let right = if i == 255 { f64::MIN } else { smoothed[i + 1] };
            value > floor && value > left && value >= right
        })
        .count()
}

fn color_variance(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let count = rgb.pixels().len();
    if count == 0 {
        return 0.0;
    }

    let mut sums = [0f64; 3];
    for pixel in rgb.pixels() {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += channel as f64;
        }
    }
    let means = sums.map(|s| s / count as f64);
    let overall = means.iter().sum::<f64>() / 3.0;
    means.iter().map(|m| (m - overall).powi(2)).sum::<f64>() / 3.0
}
