//! Image directory loader
//!
//! Walks `root/<class>/*` directories into labelled samples, splits them into
//! training and validation subsets, and turns image files into the CHW float
//! layout the network consumes.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::dataset::labels::LabelRegistry;
use crate::utils::error::{Error, Result};

/// File extensions treated as images
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

/// A single labelled image on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
    pub class_name: String,
}

pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by file name
pub fn images_in(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image_file(p))
        .collect();
    files.sort();
    files
}

/// Image files anywhere under `dir`, sorted by path
pub fn images_recursive(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(Error::PathNotFound(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image_file(p))
        .collect();
    files.sort();
    Ok(files)
}

/// Collect `root/<class>/*` images for every class known to `registry`.
///
/// Samples come out grouped by class index, files sorted within a class.
/// Sub-directories the registry does not know are skipped with a warning.
pub fn scan_labelled(root: &Path, registry: &LabelRegistry) -> Result<Vec<ImageSample>> {
    if !root.is_dir() {
        return Err(Error::PathNotFound(root.to_path_buf()));
    }

    let mut class_dirs: Vec<(usize, String)> = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        match registry.index_of(&name) {
            Some(label) => class_dirs.push((label, name)),
            None => warn!("Skipping directory '{}': not in the label registry", name),
        }
    }
    class_dirs.sort();

    let mut samples = Vec::new();
    for (label, class_name) in class_dirs {
        let files = images_in(&root.join(&class_name));
        debug!("Class '{}' (label {}): {} images", class_name, label, files.len());
        samples.extend(files.into_iter().map(|path| ImageSample {
            path,
            label,
            class_name: class_name.clone(),
        }));
    }

    info!("Found {} images in {:?}", samples.len(), root);
    Ok(samples)
}

/// Split samples into `(train, validation)`.
///
/// Within each class the first `floor(fraction * n)` files (in sorted order)
/// are held out for validation.
pub fn split_per_class(
    samples: Vec<ImageSample>,
    validation_fraction: f64,
) -> (Vec<ImageSample>, Vec<ImageSample>) {
    let mut by_class: Vec<Vec<ImageSample>> = Vec::new();
    for sample in samples {
        if by_class.len() <= sample.label {
            by_class.resize_with(sample.label + 1, Vec::new);
        }
        by_class[sample.label].push(sample);
    }

    let mut train = Vec::new();
    let mut validation = Vec::new();
    for mut class_samples in by_class {
        class_samples.sort_by(|a, b| a.path.cmp(&b.path));
        let held_out = (validation_fraction * class_samples.len() as f64) as usize;
        let rest = class_samples.split_off(held_out);
        validation.extend(class_samples);
        train.extend(rest);
    }
    (train, validation)
}

/// Decode an image file
pub fn open_image(path: &Path) -> Result<DynamicImage> {
    let reader = ImageReader::open(path)
        .map_err(|e| Error::ImageLoad(path.to_path_buf(), e.to_string()))?;
    let reader = reader
        .with_guessed_format()
        .map_err(|e| Error::ImageLoad(path.to_path_buf(), e.to_string()))?;
    reader
        .decode()
        .map_err(|e| Error::ImageLoad(path.to_path_buf(), e.to_string()))
}

/// Resize to `size x size` and flatten to CHW floats scaled to `[0, 1]`
pub fn image_to_chw(img: &DynamicImage, size: usize) -> Vec<f32> {
    let rgb = img
        .resize_exact(size as u32, size as u32, FilterType::Triangle)
        .to_rgb8();

    let plane = size * size;
    let mut data = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * size + x as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }
    data
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use image::{Rgb, RgbImage};

    /// Write a solid-colour PNG
    pub fn write_png(path: &Path, size: u32, color: [u8; 3]) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        RgbImage::from_pixel(size, size, Rgb(color)).save(path).unwrap();
    }

    /// `root/<class>/img{i}.png` for each class, `per_class` images each
    pub fn write_class_tree(root: &Path, classes: &[(&str, [u8; 3])], per_class: usize, size: u32) {
        for (class, color) in classes {
            for i in 0..per_class {
                write_png(&root.join(class).join(format!("img{}.png", i)), size, *color);
            }
        }
    }
}
