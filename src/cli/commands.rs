//! CLI command implementations

use anyhow::{Context, Result};
use denoise_gan::checkpoints::{CheckpointError, CheckpointManager};
use denoise_gan::config::{Config, Variant};
use denoise_gan::data::PatchDataset;
use denoise_gan::model::Generator;
use denoise_gan::monitor::JsonlMonitor;
use denoise_gan::training::{
    AdversarialObjective, AdversarialTrainer, GanObjective, MmdObjective, StartMode, StopSignal,
    TrainingSummary,
};
use std::path::{Path, PathBuf};

/// Options of the `train` command
pub struct TrainArgs {
    pub variant: Variant,
    pub initialize: bool,
    pub config: Option<PathBuf>,
    pub patches: Option<PathBuf>,
    pub max_steps: Option<usize>,
    pub checkpoint_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub max_duration_secs: Option<u64>,
}

fn load_config(args: &TrainArgs) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::for_variant(args.variant),
    };
    if config.variant != args.variant {
        anyhow::bail!(
            "config file is for the {} run, --variant selects {}",
            config.variant,
            args.variant
        );
    }

    // Command-line overrides take precedence over the file
    if let Some(steps) = args.max_steps {
        config.training.max_steps = steps;
    }
    if let Some(path) = &args.patches {
        config.paths.patches_file = path.display().to_string();
    }
    if let Some(dir) = &args.checkpoint_dir {
        config.paths.checkpoint_dir = dir.display().to_string();
    }
    if let Some(dir) = &args.log_dir {
        config.paths.log_dir = dir.display().to_string();
    }
    if args.max_duration_secs.is_some() {
        config.training.max_duration_secs = args.max_duration_secs;
    }

    config.validate()?;
    Ok(config)
}

pub fn train(args: TrainArgs) -> Result<()> {
    let config = load_config(&args)?;
    let mode = if args.initialize {
        StartMode::Cold
    } else {
        StartMode::Warm
    };

    // Ctrl-C only flips the flag; the step loop stays on this thread
    let stop = StopSignal::new();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
        .context("Failed to start signal runtime")?;
    let handler = stop.clone();
    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current step");
            handler.request_stop();
        }
    });

    let summary = match config.variant {
        Variant::Gan => {
            let objective = GanObjective::from_config(&config)?;
            run_training(config, objective, mode, stop)?
        }
        Variant::MmdGan => {
            let objective = MmdObjective::from_config(&config)?;
            run_training(config, objective, mode, stop)?
        }
    };

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    if summary.stopped_early {
        println!("Training Stopped Early");
    } else {
        println!("Training Complete");
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("  Steps:          {} -> {}", summary.start_step, summary.final_step);
    println!("  Checkpoints:    {}", summary.checkpoints_written);
    if let Some(losses) = summary.last_losses {
        println!("  Generator loss: {:.4}", losses.generator_loss);
        println!("  Critic loss:    {:.4}", losses.critic_loss);
    }
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    runtime.shutdown_background();
    Ok(())
}

fn run_training<O: AdversarialObjective>(
    config: Config,
    objective: O,
    mode: StartMode,
    stop: StopSignal,
) -> Result<TrainingSummary> {
    let training = &config.training;
    let mut dataset = PatchDataset::from_file(
        &config.paths.patches_file(),
        training.batch_size,
        true,
        config.seed,
    )?;
    let expected = [training.patch_size, training.patch_size, training.channels];
    if dataset.patch_shape() != expected {
        anyhow::bail!(
            "patches are {:?} but the configuration expects {:?}",
            dataset.patch_shape(),
            expected
        );
    }

    let generator = Generator::new(&config.model, training.channels as i32)?;
    let manager = CheckpointManager::new(&config.paths.checkpoint_dir())?;
    let log_dir = config.paths.run_log_dir(config.variant.run_name());
    let mut monitor = JsonlMonitor::new(&log_dir, &config.monitor)?;
    tracing::info!("Writing metrics to {}", monitor.metrics_path().display());

    let mut trainer =
        AdversarialTrainer::new(config, generator, objective, manager)?.with_stop_signal(stop);
    trainer.start(mode)?;
    trainer.run(&mut dataset, &mut monitor)
}

pub fn inspect(variant: Variant, checkpoint_dir: Option<PathBuf>) -> Result<()> {
    let dir = checkpoint_dir.unwrap_or_else(|| Config::for_variant(variant).paths.checkpoint_dir());
    let manager = CheckpointManager::new(&dir)?;

    let summary = match manager.describe(variant.run_name()) {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(CheckpointError::NotFound { path, .. }) = e.downcast_ref::<CheckpointError>() {
                println!("No {} checkpoint at {}", variant, path.display());
                return Ok(());
            }
            return Err(e);
        }
    };

    let metadata = &summary.metadata;
    println!("Checkpoint:       {}", summary.path.display());
    println!("  Variant:        {}", metadata.variant);
    println!("  Step:           {}", metadata.step);
    println!("  Weight tensors: {}", summary.weight_tensors);
    println!("  Optimizer:      {} tensors", summary.optimizer_tensors);
    for (role, steps) in &metadata.optimizer_steps {
        println!("    {:<10} {} updates", role.as_str(), steps);
    }
    Ok(())
}

pub fn init_config(variant: Variant, output: &Path) -> Result<()> {
    let config = Config::for_variant(variant);
    config.to_file(output)?;
    println!("Wrote {} configuration to {}", variant, output.display());
    Ok(())
}
