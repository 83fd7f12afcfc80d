pub mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use denoise_gan::config::Variant;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "denoise_gan")]
#[command(about = "Adversarial training of image denoisers (GAN and MMD-GAN)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Loss formulation selected on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VariantArg {
    Gan,
    Mmd,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Gan => Variant::Gan,
            VariantArg::Mmd => Variant::MmdGan,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Train a denoiser; resumes from the run's checkpoint unless --initialize is given
    Train {
        /// Loss formulation
        #[arg(long, value_enum)]
        variant: VariantArg,
        /// Start from freshly initialized parameters instead of the checkpoint
        #[arg(long)]
        initialize: bool,
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Safetensors file with a `patches` tensor [N, H, W, C]
        #[arg(long)]
        patches: Option<PathBuf>,
        /// Number of training steps to run
        #[arg(long)]
        max_steps: Option<usize>,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
        /// Parent directory of the monitoring logs
        #[arg(long)]
        log_dir: Option<PathBuf>,
        /// Stop at the next step boundary after this many seconds
        #[arg(long)]
        max_duration_secs: Option<u64>,
    },
    /// Show what a run's checkpoint contains
    Inspect {
        #[arg(long, value_enum)]
        variant: VariantArg,
        #[arg(long)]
        checkpoint_dir: Option<PathBuf>,
    },
    /// Write the default configuration of a variant
    InitConfig {
        #[arg(long, value_enum)]
        variant: VariantArg,
        #[arg(long)]
        output: PathBuf,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            variant,
            initialize,
            config,
            patches,
            max_steps,
            checkpoint_dir,
            log_dir,
            max_duration_secs,
        } => commands::train(commands::TrainArgs {
            variant: variant.into(),
            initialize,
            config,
            patches,
            max_steps,
            checkpoint_dir,
            log_dir,
            max_duration_secs,
        }),
        Commands::Inspect {
            variant,
            checkpoint_dir,
        } => commands::inspect(variant.into(), checkpoint_dir),
        Commands::InitConfig { variant, output } => commands::init_config(variant.into(), &output),
    }
}
