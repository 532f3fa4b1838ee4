//! Dataset Organizer
//!
//! Filesystem reshaping ahead of training:
//! - `flatten_dataset`: `split/<plant>/<disease>/*` -> `split/<plant>_<disease>/*`
//! - `sample_subset`: move a seeded random subset of a class tree elsewhere
//! - `sort_by_prefix`: file loose images into class folders by filename prefix

use std::fs;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::utils::error::{Error, Result};

/// Split folders looked at by [`flatten_dataset`]
pub const SPLITS: [&str; 3] = ["train", "valid", "test"];

/// Outcome of flattening one split folder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenSummary {
    pub split: String,
    pub files_moved: usize,
    pub classes_created: usize,
    pub plant_dirs_removed: usize,
}

/// Lower-case and replace spaces with underscores
pub fn clean_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

/// Class folder name for a plant/disease pair
pub fn flat_class_name(plant: &str, disease: &str) -> String {
    format!("{}_{}", clean_name(plant), clean_name(disease))
}

/// Rename, falling back to copy + delete across filesystems
fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if fs::rename(src, dst).is_err() {
        fs::copy(src, dst)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir)?
        .map(|e| e.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Flatten `root/{train,valid,test}/<plant>/<disease>/` into `<plant>_<disease>/`.
///
/// A plant folder is removed only once it is empty. Folders with no
/// sub-directories are already flat and are left untouched, so running this
/// twice is a no-op the second time. Missing split folders are skipped.
pub fn flatten_dataset(root: &Path) -> Result<Vec<FlattenSummary>> {
    if !root.is_dir() {
        return Err(Error::PathNotFound(root.to_path_buf()));
    }

    let mut summaries = Vec::new();
    for split in SPLITS {
        let split_path = root.join(split);
        if !split_path.is_dir() {
            continue;
        }

        let mut summary = FlattenSummary {
            split: split.to_string(),
            ..Default::default()
        };

        for plant_path in sorted_entries(&split_path)? {
            if !plant_path.is_dir() {
                continue;
            }
            let disease_dirs: Vec<PathBuf> = sorted_entries(&plant_path)?
                .into_iter()
                .filter(|p| p.is_dir())
                .collect();
            if disease_dirs.is_empty() {
                continue;
            }

            let plant = file_name(&plant_path);
            for disease_path in disease_dirs {
                let class_dir = split_path.join(flat_class_name(&plant, &file_name(&disease_path)));
                if !class_dir.exists() {
                    fs::create_dir_all(&class_dir)?;
                    summary.classes_created += 1;
                }

                for file in sorted_entries(&disease_path)? {
                    move_file(&file, &class_dir.join(file_name(&file)))?;
                    summary.files_moved += 1;
                }

                if fs::read_dir(&disease_path)?.next().is_none() {
                    fs::remove_dir(&disease_path)?;
                }
            }

            if fs::read_dir(&plant_path)?.next().is_none() {
                fs::remove_dir(&plant_path)?;
                summary.plant_dirs_removed += 1;
            } else {
                warn!("Keeping non-empty folder {:?}", plant_path);
            }
        }

        info!(
            "Flattened '{}': {} files into {} new classes",
            split, summary.files_moved, summary.classes_created
        );
        summaries.push(summary);
    }

    Ok(summaries)
}

/// Move a seeded random sample of `sample_size` files from `src/<class>/` to `dest/<class>/`.
///
/// Every class folder is created in `dest`, even if no file of that class is
/// drawn. When fewer files exist than requested, all of them are moved.
/// Returns the number of files moved.
pub fn sample_subset(src: &Path, dest: &Path, sample_size: usize, seed: u64) -> Result<usize> {
    if !src.is_dir() {
        return Err(Error::PathNotFound(src.to_path_buf()));
    }

    let classes: Vec<PathBuf> = sorted_entries(src)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect();

    let mut all_files: Vec<(PathBuf, String)> = Vec::new();
    for class_path in &classes {
        let class = file_name(class_path);
        fs::create_dir_all(dest.join(&class))?;
        for file in sorted_entries(class_path)? {
            if file.is_file() {
                all_files.push((file, class.clone()));
            }
        }
    }

    let total = all_files.len();
    if sample_size >= total {
        info!("Sample size {} >= {} available files; moving all", sample_size, total);
    } else {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        all_files.shuffle(&mut rng);
        all_files.truncate(sample_size);
    }

    for (file, class) in &all_files {
        let target = dest.join(class).join(file_name(file));
        move_file(file, &target)?;
        debug!("Moved {:?} -> {:?}", file, target);
    }

    info!("Moved {} of {} files into {:?}", all_files.len(), total, dest);
    Ok(all_files.len())
}

/// Filename prefix -> class folder rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixRule {
    pub prefix: String,
    pub label: String,
}

impl PrefixRule {
    pub fn new(prefix: &str, label: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            label: label.to_string(),
        }
    }
}

/// Prefix rules for the common PlantVillage-style test image names
pub fn default_prefix_rules() -> Vec<PrefixRule> {
    [
        ("AppleCedarRust", "apple_cedar_apple_rust"),
        ("AppleScab", "apple_apple_scab"),
        ("CherryHealthy", "cherry_healthy"),
        ("CherryPowderyMildew", "cherry_powdery_mildew"),
        ("CornCommonRust", "corn_common_rust"),
        ("CornHealthy", "corn_healthy"),
        ("GrapeBlackRot", "grape_black_rot"),
        ("GrapeEsca", "grape_esca"),
        ("GrapeHealthy", "grape_healthy"),
        ("PeachHealthy", "peach_healthy"),
        ("PeachBacterialSpot", "peach_bacterial_spot"),
        ("PepperBacterialSpot", "pepper_bacterial_spot"),
        ("PepperHealthy", "pepper_healthy"),
        ("PotatoEarlyBlight", "potato_early_blight"),
        ("PotatoHealthy", "potato_healthy"),
        ("RiceBlight", "rice_leaf_bacterial_blight"),
        ("RiceBrownSpot", "rice_leaf_brown_spot"),
        ("RiceSmut", "rice_leaf_smut"),
        ("StrawberryHealthy", "strawberry_healthy"),
        ("StrawberryLeafScorch", "strawberry_leaf_scorch"),
        ("TomatoEarlyBlight", "tomato_early_blight"),
        ("TomatoHealthy", "tomato_healthy"),
    ]
    .into_iter()
    .map(|(prefix, label)| PrefixRule::new(prefix, label))
    .collect()
}

/// Move each loose file in `source` into `target/<label>/` for the first matching rule.
///
/// Files no rule matches stay where they are. Returns the number moved.
pub fn sort_by_prefix(source: &Path, target: &Path, rules: &[PrefixRule]) -> Result<usize> {
    if !source.is_dir() {
        return Err(Error::PathNotFound(source.to_path_buf()));
    }
    fs::create_dir_all(target)?;

    let mut moved = 0;
    for file in sorted_entries(source)? {
        if !file.is_file() {
            continue;
        }
        let name = file_name(&file);
        let Some(rule) = rules.iter().find(|r| name.starts_with(&r.prefix)) else {
            debug!("No rule matches {}", name);
            continue;
        };

        let label_dir = target.join(&rule.label);
        fs::create_dir_all(&label_dir)?;
        move_file(&file, &label_dir.join(&name))?;
        debug!("Moved {} -> {}/", name, rule.label);
        moved += 1;
    }

    info!("Sorted {} files from {:?} into {:?}", moved, source, target);
    Ok(moved)
}
