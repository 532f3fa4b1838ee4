//! Training-time image augmentation
//!
//! Random rotation, zoom and horizontal flip, applied to training images only.
//! Rotation and zoom are one affine resampling pass with nearest-neighbour
//! lookup; samples falling outside the source repeat the nearest edge pixel.

use image::{imageops, RgbImage};
use rand::Rng;

/// Augmentation ranges
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentationConfig {
    /// Rotation is drawn from `±rotation_degrees`
    pub rotation_degrees: f32,
    /// Zoom factor is drawn from `1 ± zoom_range`
    pub zoom_range: f32,
    /// Flip left-right with probability 0.5
    pub horizontal_flip: bool,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            rotation_degrees: 30.0,
            zoom_range: 0.3,
            horizontal_flip: true,
        }
    }
}

impl AugmentationConfig {
    /// Identity transform
    pub fn none() -> Self {
        Self {
            rotation_degrees: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }
}

/// Applies random transformations drawn from an [`AugmentationConfig`]
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    pub fn augment<R: Rng>(&self, img: &RgbImage, rng: &mut R) -> RgbImage {
        let angle = if self.config.rotation_degrees > 0.0 {
            rng.gen_range(-self.config.rotation_degrees..=self.config.rotation_degrees)
        } else {
            0.0
        };
        let zoom = if self.config.zoom_range > 0.0 {
            rng.gen_range(1.0 - self.config.zoom_range..=1.0 + self.config.zoom_range)
        } else {
            1.0
        };

        let mut out = if angle.abs() < 0.1 && (zoom - 1.0).abs() < 1e-3 {
            img.clone()
        } else {
            rotate_and_zoom(img, angle, zoom)
        };

        if self.config.horizontal_flip && rng.gen_bool(0.5) {
            imageops::flip_horizontal_in_place(&mut out);
        }
        out
    }
}

/// Rotate by `angle_degrees` around the centre and scale by `zoom`.
///
/// `zoom < 1` magnifies (samples a smaller source region).
fn rotate_and_zoom(img: &RgbImage, angle_degrees: f32, zoom: f32) -> RgbImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return img.clone();
    }

    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;
    let max_x = (width - 1) as f32;
    let max_y = (height - 1) as f32;

    RgbImage::from_fn(width, height, |x, y| {
        let dx = (x as f32 - cx) * zoom;
        let dy = (y as f32 - cy) * zoom;

        let src_x = (cx + dx * cos_a + dy * sin_a).round().clamp(0.0, max_x);
        let src_y = (cy - dx * sin_a + dy * cos_a).round().clamp(0.0, max_y);

        *img.get_pixel(src_x as u32, src_y as u32)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn gradient(size: u32) -> RgbImage {
        RgbImage::from_fn(size, size, |x, y| Rgb([(x * 10) as u8, (y * 10) as u8, 0]))
    }

    #[test]
    fn test_none_is_identity() {
        let img = gradient(8);
        let augmenter = Augmenter::new(AugmentationConfig::none());
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert_eq!(augmenter.augment(&img, &mut rng), img);
    }

    #[test]
    fn test_augment_preserves_dimensions() {
        let img = gradient(12);
        let augmenter = Augmenter::new(AugmentationConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..10 {
            assert_eq!(augmenter.augment(&img, &mut rng).dimensions(), (12, 12));
        }
    }

    #[test]
    fn test_same_seed_same_result() {
        let img = gradient(10);
        let augmenter = Augmenter::new(AugmentationConfig::default());

        let a = augmenter.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        let b = augmenter.augment(&img, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a, b);
    }

    #[test]
    fn test_solid_image_stays_solid() {
        let img = RgbImage::from_pixel(9, 9, Rgb([10, 200, 30]));
        let out = rotate_and_zoom(&img, 25.0, 1.3);
        assert!(out.pixels().all(|p| *p == Rgb([10, 200, 30])));
    }

    #[test]
    fn test_half_turn_rotation() {
        let img = gradient(5);
        let out = rotate_and_zoom(&img, 180.0, 1.0);
        assert_eq!(out.get_pixel(0, 0), img.get_pixel(4, 4));
        assert_eq!(out.get_pixel(4, 0), img.get_pixel(0, 4));
    }
}
