//! Plant disease classification CLI
//!
//! Dataset organisation, training, resumption, evaluation, prediction and
//! export for the leaf-image classifier.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use plant_disease::backend::{backend_name, default_device, DefaultBackend};
use plant_disease::dataset::organize::{
    default_prefix_rules, flatten_dataset, sample_subset, sort_by_prefix,
};
use plant_disease::dataset::LabelRegistry;
use plant_disease::inference::{evaluate, predict_directory, Predictor};
use plant_disease::model::{export_backbone, export_checkpoint, ExportFormat, PipelineConfig};
use plant_disease::training::{ModelLifecycle, TrainingReport};
use plant_disease::utils::format_duration;
use plant_disease::utils::logging::{init_logging, LogConfig};

/// Plant disease leaf-image classifier
#[derive(Parser, Debug)]
#[command(name = "plant-disease")]
#[command(version)]
#[command(about = "Train, evaluate and run a plant disease leaf classifier with Burn", long_about = None)]
struct Cli {
    /// JSON configuration file; flags given on the command line override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Artifact locations shared by most subcommands
#[derive(Args, Debug, Default)]
struct ArtifactArgs {
    /// Checkpoint stem (weights at <stem>.mpk, manifest at <stem>.json)
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Label registry JSON
    #[arg(short, long)]
    labels: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train (or adapt and continue training) the classifier
    Train {
        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Directory with one sub-directory per class
        #[arg(short, long)]
        train_dir: Option<PathBuf>,

        /// Training history JSON
        #[arg(long)]
        history: Option<PathBuf>,

        /// Total epochs across warm-up and fine-tuning
        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Warm-up learning rate
        #[arg(long)]
        learning_rate: Option<f64>,

        /// First backbone layer unfrozen for fine-tuning
        #[arg(long)]
        fine_tune_at: Option<usize>,

        #[arg(long)]
        image_size: Option<usize>,

        /// Backbone weights exported with `export --backbone`
        #[arg(long)]
        pretrained_backbone: Option<PathBuf>,

        /// Disable training-time augmentation
        #[arg(long, default_value = "false")]
        no_augment: bool,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Continue fine-tuning an existing checkpoint
    Resume {
        #[command(flatten)]
        artifacts: ArtifactArgs,

        #[arg(short, long)]
        train_dir: Option<PathBuf>,

        #[arg(long)]
        history: Option<PathBuf>,

        #[arg(short, long)]
        epochs: Option<usize>,

        #[arg(long)]
        learning_rate: Option<f64>,

        /// First backbone layer unfrozen (0 = whole backbone)
        #[arg(long)]
        unfreeze_from: Option<usize>,
    },

    /// Evaluate a checkpoint on a labelled test directory
    Evaluate {
        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Directory with one sub-directory per class
        #[arg(short, long, default_value = "data/test")]
        test_dir: PathBuf,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Also write the confusion matrix as CSV
        #[arg(long)]
        confusion_csv: Option<PathBuf>,
    },

    /// Predict a single image or every image under a directory
    Predict {
        /// Image file or directory
        input: PathBuf,

        #[command(flatten)]
        artifacts: ArtifactArgs,

        /// Show the k most likely classes for a single image
        #[arg(long, default_value = "3")]
        top_k: usize,
    },

    /// Export a checkpoint for deployment
    Export {
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Output directory
        #[arg(short, long, default_value = "models/export")]
        output_dir: PathBuf,

        /// full (MessagePack), json or bin
        #[arg(short, long, default_value = "full")]
        format: ExportFormat,

        /// Export only the feature extractor, for use as `pretrained_backbone`
        #[arg(long, default_value = "false")]
        backbone: bool,
    },

    /// Reorganise dataset folders on disk
    Organize {
        #[command(subcommand)]
        action: OrganizeAction,
    },

    /// Show the label registry
    Labels {
        /// Discover classes from this directory instead of reading the registry file
        #[arg(short, long)]
        train_dir: Option<PathBuf>,

        #[arg(short, long)]
        labels: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum OrganizeAction {
    /// Turn <split>/<plant>/<disease>/ into <split>/<plant>_<disease>/
    Flatten {
        /// Dataset root holding train/, valid/ and test/
        #[arg(default_value = "data")]
        root: PathBuf,
    },

    /// Move a random sample of each class into another tree
    Sample {
        src: PathBuf,
        dest: PathBuf,

        /// Files per class
        #[arg(short = 'n', long, default_value = "50")]
        size: usize,

        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Move loose files into class folders by filename prefix
    Sort { source: PathBuf, target: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };
    let _ = init_logging(&log_config);

    print_banner();

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Train {
            artifacts,
            train_dir,
            history,
            epochs,
            batch_size,
            learning_rate,
            fine_tune_at,
            image_size,
            pretrained_backbone,
            no_augment,
            seed,
        } => {
            apply_artifacts(&mut config, artifacts);
            override_opt(&mut config.train_dir, train_dir);
            override_opt(&mut config.history_path, history);
            override_opt(&mut config.epochs, epochs);
            override_opt(&mut config.batch_size, batch_size);
            override_opt(&mut config.learning_rate, learning_rate);
            override_opt(&mut config.fine_tune_at, fine_tune_at);
            override_opt(&mut config.image_size, image_size);
            override_opt(&mut config.seed, seed);
            if pretrained_backbone.is_some() {
                config.pretrained_backbone = pretrained_backbone;
            }
            if no_augment {
                config.augment = false;
            }
            cmd_train(&config)?;
        }

        Commands::Resume {
            artifacts,
            train_dir,
            history,
            epochs,
            learning_rate,
            unfreeze_from,
        } => {
            apply_artifacts(&mut config, artifacts);
            override_opt(&mut config.train_dir, train_dir);
            override_opt(&mut config.history_path, history);
            override_opt(&mut config.fine_tune_epochs, epochs);
            override_opt(&mut config.fine_tune_lr, learning_rate);
            override_opt(&mut config.resume_unfreeze_from, unfreeze_from);
            cmd_resume(&config)?;
        }

        Commands::Evaluate {
            artifacts,
            test_dir,
            batch_size,
            confusion_csv,
        } => {
            apply_artifacts(&mut config, artifacts);
            override_opt(&mut config.batch_size, batch_size);
            cmd_evaluate(&config, &test_dir, confusion_csv.as_deref())?;
        }

        Commands::Predict {
            input,
            artifacts,
            top_k,
        } => {
            apply_artifacts(&mut config, artifacts);
            cmd_predict(&config, &input, top_k)?;
        }

        Commands::Export {
            model,
            output_dir,
            format,
            backbone,
        } => {
            override_opt(&mut config.model_path, model);
            cmd_export(&config, &output_dir, format, backbone)?;
        }

        Commands::Organize { action } => cmd_organize(action)?,

        Commands::Labels { train_dir, labels } => {
            override_opt(&mut config.label_path, labels);
            cmd_labels(&config, train_dir.as_deref())?;
        }
    }

    Ok(())
}

fn override_opt<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

fn apply_artifacts(config: &mut PipelineConfig, artifacts: ArtifactArgs) {
    override_opt(&mut config.model_path, artifacts.model);
    override_opt(&mut config.label_path, artifacts.labels);
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════╗
 ║   🌿 Plant Disease Classifier                         ║
 ║   Leaf-image diagnosis with Burn + Rust              ║
 ╚══════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn print_training_summary(report: &TrainingReport, elapsed: f64) {
    println!();
    println!("{}", "Training complete".green().bold());
    println!("  🧠 Model:       {} ({})", report.model_path.display(), report.origin);
    println!("  🏷️  Classes:     {}", report.class_names.len());
    println!(
        "  📊 Images:      {} train / {} validation",
        report.train_samples, report.validation_samples
    );
    for (phase, epochs) in &report.phase_epochs {
        println!("  ⏱️  {:<12} {} epochs", format!("{}:", phase), epochs);
    }
    if report.stopped_early {
        println!("  {}", "Stopped early (no val_loss improvement)".yellow());
    }
    if let Some(loss) = report.best_val_loss {
        println!("  📉 Best val_loss: {:.4}", loss);
    }
    if let Some(acc) = report.final_val_accuracy {
        println!("  🎯 Final val_accuracy: {:.2}%", acc * 100.0);
    }
    println!("  📜 History:     {} epochs total", report.history_epochs);
    println!("  ⌛ Time:        {}", format_duration(elapsed));
}

fn cmd_train(config: &PipelineConfig) -> Result<()> {
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  📁 Data:     {}", config.train_dir.display());
    println!("  🧠 Model:    {}", config.model_path.display());
    println!("  🔁 Epochs:   {} (batch {})", config.epochs, config.batch_size);
    println!("  📈 LR:       {:.0e}", config.learning_rate);
    println!("  🖥️  Backend:  {}", backend_name());
    println!();

    let start = Instant::now();
    let report = ModelLifecycle::new(config)
        .train()
        .context("Training failed")?;
    print_training_summary(&report, start.elapsed().as_secs_f64());
    Ok(())
}

fn cmd_resume(config: &PipelineConfig) -> Result<()> {
    println!("{}", "Resume Configuration:".cyan().bold());
    println!("  🧠 Model:    {}", config.model_path.display());
    println!("  🔁 Epochs:   {}", config.fine_tune_epochs);
    println!("  📈 LR:       {:.0e}", config.fine_tune_lr);
    println!("  🖥️  Backend:  {}", backend_name());
    println!();

    let start = Instant::now();
    let report = ModelLifecycle::new(config)
        .resume()
        .context("Resume failed")?;
    print_training_summary(&report, start.elapsed().as_secs_f64());
    Ok(())
}

fn cmd_evaluate(
    config: &PipelineConfig,
    test_dir: &Path,
    confusion_csv: Option<&Path>,
) -> Result<()> {
    info!("Evaluating {:?} on {:?}", config.model_path, test_dir);

    let report = evaluate(&config.model_path, &config.label_path, test_dir, config.batch_size)
        .context("Evaluation failed")?;

    println!("{}", "Classification Report:".cyan().bold());
    println!("{}", report.metrics.classification_report());
    println!("{}", "Confusion Matrix:".cyan().bold());
    println!("{}", report.confusion_matrix_text());

    if !report.skipped.is_empty() {
        println!(
            "{} {} unreadable images skipped",
            "Warning:".yellow(),
            report.skipped.len()
        );
    }

    if let Some(path) = confusion_csv {
        report
            .metrics
            .confusion_matrix
            .save_csv(path, &report.class_names)
            .with_context(|| format!("Failed to write {:?}", path))?;
        println!("Confusion matrix written to {}", path.display());
    }
    Ok(())
}

fn cmd_predict(config: &PipelineConfig, input: &Path, top_k: usize) -> Result<()> {
    if !input.exists() {
        bail!("Input path not found: {}", input.display());
    }

    if input.is_dir() {
        let predictions =
            predict_directory(&config.model_path, &config.label_path, input, config.batch_size)?;
        println!(
            "{}",
            format!("Predictions for {} images:", predictions.len()).cyan().bold()
        );
        for prediction in &predictions {
            let path = prediction
                .image_path
                .as_deref()
                .and_then(|p| p.strip_prefix(input).ok())
                .unwrap_or(Path::new("?"));
            println!(
                "{} => {} ({:.2}%)",
                path.display(),
                prediction.class.green(),
                prediction.confidence * 100.0
            );
        }
        return Ok(());
    }

    let predictor =
        Predictor::<DefaultBackend>::load(&config.model_path, &config.label_path, &default_device())?;
    let prediction = predictor.predict_image(input)?;

    println!("{}", "Prediction:".cyan().bold());
    println!(
        "  {} ({:.2}%)",
        prediction.class.green().bold(),
        prediction.confidence * 100.0
    );
    println!("  💡 {}", prediction.advice());
    println!();
    println!("Top-{}:", top_k);
    for (rank, (index, probability)) in prediction.top_k(top_k).into_iter().enumerate() {
        let name = predictor.registry().name_at(index).unwrap_or("unknown");
        println!("  {}. {:<32} {:.2}%", rank + 1, name, probability * 100.0);
    }
    Ok(())
}

fn cmd_export(
    config: &PipelineConfig,
    output_dir: &Path,
    format: ExportFormat,
    backbone: bool,
) -> Result<()> {
    let device = default_device();
    let written = if backbone {
        export_backbone::<DefaultBackend>(&config.model_path, output_dir, &device)?
    } else {
        export_checkpoint::<DefaultBackend>(&config.model_path, output_dir, format, &device)?
    };
    println!("{} {}", "Exported:".green().bold(), written.display());
    Ok(())
}

fn cmd_organize(action: OrganizeAction) -> Result<()> {
    match action {
        OrganizeAction::Flatten { root } => {
            let summaries = flatten_dataset(&root)?;
            if summaries.is_empty() {
                println!("{} no train/valid/test folders under {}", "Note:".yellow(), root.display());
            }
            for s in summaries {
                println!(
                    "  {:<6} {} files moved, {} classes created, {} plant folders removed",
                    s.split, s.files_moved, s.classes_created, s.plant_dirs_removed
                );
            }
        }
        OrganizeAction::Sample {
            src,
            dest,
            size,
            seed,
        } => {
            let moved = sample_subset(&src, &dest, size, seed)?;
            println!("Moved {} files into {}", moved, dest.display());
        }
        OrganizeAction::Sort { source, target } => {
            let moved = sort_by_prefix(&source, &target, &default_prefix_rules())?;
            println!("Sorted {} files into {}", moved, target.display());
        }
    }
    Ok(())
}

fn cmd_labels(config: &PipelineConfig, train_dir: Option<&Path>) -> Result<()> {
    let registry = match train_dir {
        Some(dir) => LabelRegistry::discover(dir)?,
        None => LabelRegistry::load(&config.label_path)
            .with_context(|| format!("Failed to read {:?}", config.label_path))?,
    };

    println!("{}", format!("{} classes:", registry.len()).cyan().bold());
    for (index, name) in registry.names().iter().enumerate() {
        println!("  {:>3}  {}", index, name);
    }
    Ok(())
}
