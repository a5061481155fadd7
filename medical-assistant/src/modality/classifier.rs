use assist_flow::{AssistError, Result};
use tracing::debug;

use super::features::FeatureVector;
use crate::models::{Modality, ModalityLabel};

/// Decides the modality an image most likely came from.
pub trait ModalityClassifier: Send + Sync {
    fn classify(&self, image: &[u8]) -> Result<ModalityLabel>;
}

/// Thresholds for the two-stage heuristic.
///
/// The gate rejects anything that does not look like a grayscale medical
/// scan; the bands are then tried in declaration order and the first match
/// wins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierPolicy {
    pub max_color_variance: f64,
    pub min_edge_density: f64,
    pub min_texture_strength: f64,
    pub min_contrast: f64,

    pub xray_max_brightness: f64,
    pub xray_min_contrast: f64,

    pub ultrasound_min_brightness: f64,
    pub ultrasound_max_edge_density: f64,

    pub ct_min_contrast: f64,
    pub ct_min_texture: f64,

    pub mri_brightness: (f64, f64),
    pub mri_min_texture: f64,

    pub petct_brightness: (f64, f64),
    pub petct_min_peaks: usize,
}

impl ClassifierPolicy {
    pub const MAX_COLOR_VARIANCE: f64 = 25.0;
    pub const MIN_EDGE_DENSITY: f64 = 0.02;
    pub const MIN_TEXTURE_STRENGTH: f64 = 5.0;
    pub const MIN_CONTRAST: f64 = 20.0;

    /// Grayscale, structured and not flat.
    pub fn passes_gate(&self, f: &FeatureVector) -> bool {
        f.color_variance < self.max_color_variance
            && f.edge_density > self.min_edge_density
            && f.texture_strength > self.min_texture_strength
            && f.brightness_std > self.min_contrast
    }

    pub fn is_xray(&self, f: &FeatureVector) -> bool {
        f.mean_brightness < self.xray_max_brightness && f.brightness_std > self.xray_min_contrast
    }

    pub fn is_ultrasound(&self, f: &FeatureVector) -> bool {
        f.mean_brightness > self.ultrasound_min_brightness
            && f.edge_density < self.ultrasound_max_edge_density
    }

    pub fn is_ct(&self, f: &FeatureVector) -> bool {
        f.brightness_std > self.ct_min_contrast && f.texture_strength > self.ct_min_texture
    }

    pub fn is_mri(&self, f: &FeatureVector) -> bool {
        within(f.mean_brightness, self.mri_brightness) && f.texture_strength > self.mri_min_texture
    }

    pub fn is_petct(&self, f: &FeatureVector) -> bool {
        within(f.mean_brightness, self.petct_brightness) && f.histogram_peaks >= self.petct_min_peaks
    }

    pub fn label_for(&self, f: &FeatureVector) -> ModalityLabel {
        if !self.passes_gate(f) {
            return ModalityLabel::Unknown;
        }

        let bands: [(Modality, fn(&Self, &FeatureVector) -> bool); 5] = [
            (Modality::Xray, Self::is_xray),
            (Modality::Ultrasound, Self::is_ultrasound),
            (Modality::Ct, Self::is_ct),
            (Modality::Mri, Self::is_mri),
            (Modality::PetCt, Self::is_petct),
        ];

        bands
            .into_iter()
            .find(|(_, applies)| applies(self, f))
            .map(|(modality, _)| ModalityLabel::Detected(modality))
            .unwrap_or(ModalityLabel::Unknown)
    }
}

impl Default for ClassifierPolicy {
    fn default() -> Self {
        Self {
            max_color_variance: Self::MAX_COLOR_VARIANCE,
            min_edge_density: Self::MIN_EDGE_DENSITY,
            min_texture_strength: Self::MIN_TEXTURE_STRENGTH,
            min_contrast: Self::MIN_CONTRAST,
            xray_max_brightness: 100.0,
            xray_min_contrast: 50.0,
            ultrasound_min_brightness: 160.0,
            ultrasound_max_edge_density: 0.08,
            ct_min_contrast: 45.0,
            ct_min_texture: 25.0,
            mri_brightness: (80.0, 150.0),
            mri_min_texture: 20.0,
            petct_brightness: (100.0, 180.0),
            petct_min_peaks: 4,
        }
    }
}

fn within(value: f64, (low, high): (f64, f64)) -> bool {
    value >= low && value <= high
}

/// Pixel-statistics classifier; runs entirely offline.
#[derive(Debug, Clone, Default)]
pub struct HeuristicClassifier {
    policy: ClassifierPolicy,
}

impl HeuristicClassifier {
    pub fn new(policy: ClassifierPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ClassifierPolicy {
        &self.policy
    }

    /// Decode the image and compute its feature vector.
    pub fn features(&self, image: &[u8]) -> Result<FeatureVector> {
        let decoded = image::load_from_memory(image)
            .map_err(|e| AssistError::Classification(format!("Cannot decode image: {e}")))?;
        Ok(FeatureVector::extract(&decoded))
    }
}

impl ModalityClassifier for HeuristicClassifier {
    fn classify(&self, image: &[u8]) -> Result<ModalityLabel> {
        let features = self.features(image)?;
        let label = self.policy.label_for(&features);
        debug!(
            detected = %label,
            mean = features.mean_brightness,
            std = features.brightness_std,
            edges = features.edge_density,
            texture = features.texture_strength,
            peaks = features.histogram_peaks,
            color_variance = features.color_variance,
            "Classified image modality"
        );
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
    use std::io::Cursor;

    fn png(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn structured(mean: f64, std: f64, edges: f64, texture: f64, peaks: usize) -> FeatureVector {
        FeatureVector {
            mean_brightness: mean,
            brightness_std: std,
            edge_density: edges,
            texture_strength: texture,
            histogram_peaks: peaks,
            color_variance: 0.0,
        }
    }

    #[test]
    fn test_uniform_gray_is_unknown() {
        let bytes = png(DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128]))));
        let label = HeuristicClassifier::default().classify(&bytes).unwrap();
        assert_eq!(label, ModalityLabel::Unknown);
    }

    #[test]
    fn test_colour_photographs_fail_the_gate() {
        let image = RgbImage::from_fn(64, 64, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgb([220, 30, 30])
            } else {
                Rgb([20, 40, 200])
            }
        });
        let bytes = png(DynamicImage::ImageRgb8(image));
        let label = HeuristicClassifier::default().classify(&bytes).unwrap();
        assert_eq!(label, ModalityLabel::Unknown);
    }

    #[test]
    fn test_dark_high_contrast_scan_reads_as_xray() {
        // Bright 4px bands every 16px on a near-black background.
        let image = GrayImage::from_fn(64, 64, |x, _| {
            if x % 16 < 4 { Luma([230]) } else { Luma([10]) }
        });
        let bytes = png(DynamicImage::ImageLuma8(image));
        let classifier = HeuristicClassifier::default();

        let features = classifier.features(&bytes).unwrap();
        assert!(features.mean_brightness < 100.0);
        assert!(features.brightness_std > 50.0);

        assert_eq!(
            classifier.classify(&bytes).unwrap(),
            ModalityLabel::Detected(Modality::Xray)
        );
    }

    #[test]
    fn test_undecodable_bytes_are_a_classification_failure() {
        let err = HeuristicClassifier::default()
            .classify(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, AssistError::Classification(_)));
    }

    #[test]
    fn test_each_band_is_reachable() {
        let policy = ClassifierPolicy::default();
        let cases = [
            (structured(60.0, 70.0, 0.2, 40.0, 2), ModalityLabel::Detected(Modality::Xray)),
            (structured(190.0, 30.0, 0.05, 10.0, 2), ModalityLabel::Detected(Modality::Ultrasound)),
            (structured(120.0, 60.0, 0.2, 40.0, 2), ModalityLabel::Detected(Modality::Ct)),
            (structured(120.0, 30.0, 0.2, 30.0, 2), ModalityLabel::Detected(Modality::Mri)),
            (structured(170.0, 30.0, 0.2, 10.0, 5), ModalityLabel::Detected(Modality::PetCt)),
            (structured(170.0, 30.0, 0.2, 10.0, 2), ModalityLabel::Unknown),
        ];

        for (features, expected) in cases {
            assert_eq!(policy.label_for(&features), expected, "{features:?}");
        }
    }

    #[test]
    fn test_bands_are_checked_in_order() {
        let policy = ClassifierPolicy::default();
        // Dark and high-contrast, but also textured enough for ct.
        let features = structured(90.0, 60.0, 0.2, 40.0, 6);
        assert!(policy.is_xray(&features));
        assert!(policy.is_ct(&features));
        assert_eq!(policy.label_for(&features), ModalityLabel::Detected(Modality::Xray));
    }

    #[test]
    fn test_gate_rejects_flat_or_coloured_features() {
        let policy = ClassifierPolicy::default();
        let good = structured(60.0, 70.0, 0.2, 40.0, 2);
        assert!(policy.passes_gate(&good));

        let coloured = FeatureVector {
            color_variance: 400.0,
            ..good
        };
        let smooth = FeatureVector {
            edge_density: 0.0,
            ..good
        };
        let flat = FeatureVector {
            brightness_std: 5.0,
            ..good
        };
        for features in [coloured, smooth, flat] {
            assert_eq!(policy.label_for(&features), ModalityLabel::Unknown);
        }
    }

    #[test]
    fn test_custom_policy_changes_the_outcome() {
        let strict = ClassifierPolicy {
            xray_max_brightness: 10.0,
            ..Default::default()
        };
        let features = structured(60.0, 70.0, 0.2, 20.0, 2);
        assert_eq!(
            ClassifierPolicy::default().label_for(&features),
            ModalityLabel::Detected(Modality::Xray)
        );
        assert_eq!(strict.label_for(&features), ModalityLabel::Unknown);
        assert_eq!(HeuristicClassifier::new(strict).policy(), &strict);
    }
}
