use crate::config::DistanceConfig;

/// Pinhole approximation: `known_width * focal_length / pixel_width`,
/// multiplied by `scale` to land in centimeters.
#[derive(Debug, Clone, Copy)]
pub struct DistanceEstimator {
    known_width: f64,
    focal_length: f64,
    scale: f64,
}

impl DistanceEstimator {
    pub fn new(config: &DistanceConfig) -> Self {
        Self {
            known_width: config.known_width,
            focal_length: config.focal_length,
            scale: config.scale,
        }
    }

    pub fn estimate_cm(&self, pixel_width: i32) -> f64 {
        // Degenerate boxes count as one pixel wide.
        let width = f64::from(pixel_width.max(1));
        (self.known_width * self.focal_length) / width * self.scale
    }
}

impl Default for DistanceEstimator {
    fn default() -> Self {
        Self::new(&DistanceConfig::default())
    }
}
