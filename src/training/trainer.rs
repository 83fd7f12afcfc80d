use crate::checkpoints::{Checkpoint, CheckpointManager};
use crate::config::{Config, Variant};
use crate::data::BatchSource;
use crate::losses::LossRecord;
use crate::model::params::{check_parameters, export_parameters, import_parameters};
use crate::model::{Generator, ParamRegistry, Role};
use crate::monitor::{MonitorRecord, MonitorSink};
use crate::noise::{psnr, NoiseInjector, PIXEL_RANGE};
use crate::training::objective::AdversarialObjective;
use crate::training::optimizer::{Adam, AdamConfig};
use crate::training::stop::{StopCheck, StopReason, StopSignal};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use mlx_rs::Array;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Scope the generator's parameters are registered and stored under
pub const GENERATOR_SCOPE: &str = "generator";

/// How a run obtains its initial parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Keep the freshly initialized networks and start counting at 0
    Cold,
    /// Restore parameters, optimizer moments and the step counter from the
    /// run's checkpoint; a missing checkpoint is fatal
    Warm,
}

/// Result of one training step
#[derive(Debug, Clone, Copy)]
pub struct StepOutput {
    /// Counter value after the step, the index its monitoring record carries
    pub step: usize,
    pub losses: LossRecord,
    pub psnr: f32,
    pub checkpointed: bool,
}

/// What a call to [`AdversarialTrainer::run`] did
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    pub start_step: usize,
    pub final_step: usize,
    pub steps_run: usize,
    pub checkpoints_written: usize,
    pub stopped_early: bool,
    pub last_losses: Option<LossRecord>,
}

/// Alternating generator/critic optimization for one run variant.
///
/// Iteration `n` runs with the counter at `n`: both partitions are updated from
/// gradients taken at the same parameter values, the counter becomes `n + 1`,
/// a record for `n + 1` is emitted, and when `n` is a multiple of the
/// checkpoint interval the state (counter `n + 1`) is persisted.
pub struct AdversarialTrainer<O: AdversarialObjective> {
    config: Config,
    generator: Generator,
    objective: O,
    registry: ParamRegistry,
    generator_optimizer: Adam,
    critic_optimizer: Adam,
    noise: NoiseInjector,
    checkpoint_manager: CheckpointManager,
    global_step: usize,
    last_saved_step: Option<usize>,
    checkpoints_written: usize,
    stop_signal: StopSignal,
    show_progress: bool,
}

/// Format duration in seconds to human-readable string
fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;
    if hours > 0 {
        format!("{}h{}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

impl<O: AdversarialObjective> AdversarialTrainer<O> {
    /// Wires the networks, registers parameter ownership and builds one
    /// optimizer per partition.
    ///
    /// Fails if the configuration is invalid, if the objective belongs to a
    /// different variant than the configuration, or if the parameter partition
    /// is not a clean split.
    pub fn new(
        config: Config,
        generator: Generator,
        objective: O,
        checkpoint_manager: CheckpointManager,
    ) -> Result<Self> {
        config.validate()?;
        if objective.variant() != config.variant {
            anyhow::bail!(
                "configuration is for the {} run but the objective is {}",
                config.variant,
                objective.variant()
            );
        }

        let mut registry = ParamRegistry::new();
        registry.register(Role::Generator, GENERATOR_SCOPE, &generator)?;
        registry.register(Role::Critic, objective.critic_scope(), objective.critic())?;
        registry.ensure_complete()?;

        let training = &config.training;
        let generator_optimizer = Adam::new(
            AdamConfig::from_training(training, training.generator_lr),
            GENERATOR_SCOPE,
        );
        let critic_optimizer = Adam::new(
            AdamConfig::from_training(training, training.critic_lr),
            objective.critic_scope(),
        );
        let noise = NoiseInjector::new(training.noise_stddev, config.seed);

        tracing::debug!(
            "Registered {} generator and {} critic parameters",
            registry.names(Role::Generator).len(),
            registry.names(Role::Critic).len()
        );

        Ok(Self {
            config,
            generator,
            objective,
            registry,
            generator_optimizer,
            critic_optimizer,
            noise,
            checkpoint_manager,
            global_step: 0,
            last_saved_step: None,
            checkpoints_written: 0,
            stop_signal: StopSignal::new(),
            show_progress: true,
        })
    }

    pub fn with_stop_signal(mut self, signal: StopSignal) -> Self {
        self.stop_signal = signal;
        self
    }

    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.show_progress = enabled;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn variant(&self) -> Variant {
        self.objective.variant()
    }

    /// Checkpoint identity of this run
    pub fn checkpoint_name(&self) -> &'static str {
        self.variant().run_name()
    }

    pub fn step_counter(&self) -> usize {
        self.global_step
    }

    pub fn checkpoints_written(&self) -> usize {
        self.checkpoints_written
    }

    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn objective(&self) -> &O {
        &self.objective
    }

    /// Moves the trainer from freshly built to ready
    pub fn start(&mut self, mode: StartMode) -> Result<()> {
        match mode {
            StartMode::Cold => {
                self.global_step = 0;
                self.last_saved_step = None;
                tracing::info!(
                    "Cold start of the {} run with freshly initialized parameters",
                    self.variant()
                );
            }
            StartMode::Warm => {
                let checkpoint = self
                    .checkpoint_manager
                    .restore(self.checkpoint_name(), self.variant())?;
                self.apply_checkpoint(&checkpoint)?;
                tracing::info!(
                    "Warm start of the {} run from step {}",
                    self.variant(),
                    self.global_step
                );
            }
        }
        Ok(())
    }

    /// Snapshot of both partitions, both optimizers and the counter
    pub fn snapshot(&self) -> Result<Checkpoint> {
        let mut weights = BTreeMap::new();
        weights.extend(export_parameters(GENERATOR_SCOPE, &self.generator)?);
        weights.extend(export_parameters(
            self.objective.critic_scope(),
            self.objective.critic(),
        )?);

        let mut optimizers = BTreeMap::new();
        optimizers.insert(Role::Generator, self.generator_optimizer.export_state()?);
        optimizers.insert(Role::Critic, self.critic_optimizer.export_state()?);

        Ok(Checkpoint::new(
            self.checkpoint_name(),
            self.variant(),
            self.global_step,
            weights,
            optimizers,
            self.config.clone(),
        ))
    }

    /// Persists the current state under the run's checkpoint name
    pub fn save_checkpoint(&mut self) -> Result<PathBuf> {
        let checkpoint = self.snapshot()?;
        let path = self.checkpoint_manager.save(&checkpoint).with_context(|| {
            format!("Checkpoint write failed at step {}", self.global_step)
        })?;
        self.last_saved_step = Some(self.global_step);
        self.checkpoints_written += 1;
        tracing::info!("Saved checkpoint at step {} to {}", self.global_step, path.display());
        Ok(path)
    }

    fn apply_checkpoint(&mut self, checkpoint: &Checkpoint) -> Result<()> {
        // every stored tensor must belong to one of the two partitions
        self.registry
            .partition(checkpoint.weights.keys().map(|name| name.as_str()))?;

        let weights: HashMap<String, (Vec<f32>, Vec<i32>)> = checkpoint
            .weights
            .iter()
            .map(|(name, tensor)| (name.clone(), tensor.clone()))
            .collect();
        let critic_scope = self.objective.critic_scope();

        // nothing is replaced until both partitions and both optimizers check out
        check_parameters(GENERATOR_SCOPE, &self.generator, &weights)?;
        check_parameters(critic_scope, self.objective.critic(), &weights)?;
        let generator_optimizer = match checkpoint.optimizers.get(&Role::Generator) {
            Some(state) => Some(self.generator_optimizer.with_state(state)?),
            None => None,
        };
        let critic_optimizer = match checkpoint.optimizers.get(&Role::Critic) {
            Some(state) => Some(self.critic_optimizer.with_state(state)?),
            None => None,
        };

        import_parameters(GENERATOR_SCOPE, &mut self.generator, &weights)?;
        import_parameters(critic_scope, self.objective.critic_mut(), &weights)?;
        if let Some(optimizer) = generator_optimizer {
            self.generator_optimizer = optimizer;
        }
        if let Some(optimizer) = critic_optimizer {
            self.critic_optimizer = optimizer;
        }

        self.global_step = checkpoint.step;
        self.last_saved_step = Some(checkpoint.step);
        Ok(())
    }

    /// Runs one alternating update on a clean batch and emits its record
    pub fn train_step(&mut self, clean: &Array, sink: &mut dyn MonitorSink) -> Result<StepOutput> {
        let step = self.global_step;

        let noisy = self.noise.apply(clean, step)?;
        let denoised = self.generator.forward(&noisy)?;
        denoised.eval()?;

        // Both gradients are taken before either partition moves
        let (critic_loss, critic_grads) = self
            .objective
            .critic_value_and_grad(clean, &denoised)
            .map_err(|e| anyhow::anyhow!("Critic gradient computation failed: {}", e))?;
        let (generator_loss, generator_grads) = self
            .objective
            .generator_value_and_grad(&mut self.generator, clean, &noisy)
            .map_err(|e| anyhow::anyhow!("Generator gradient computation failed: {}", e))?;

        let losses = LossRecord {
            generator_loss: generator_loss.item(),
            critic_loss: critic_loss.item(),
        };
        if !losses.is_finite() {
            anyhow::bail!(
                "Training diverged at step {}: generator_loss={}, critic_loss={}",
                step,
                losses.generator_loss,
                losses.critic_loss
            );
        }

        self.critic_optimizer
            .update(self.objective.critic_mut(), &critic_grads)?;
        self.generator_optimizer
            .update(&mut self.generator, &generator_grads)?;
        self.global_step = step + 1;

        let generated_noise = noisy.subtract(&denoised)?;
        let noise_scaled = generated_noise.multiply(Array::from_f32(PIXEL_RANGE))?;
        let noise_max: f32 = noise_scaled.max(None)?.item();
        let noise_min: f32 = noise_scaled.min(None)?.item();
        let quality = psnr(clean, &denoised)?;

        let record = MonitorRecord::new(self.global_step)
            .scalar("psnr", quality)
            .scalar("generator_loss", losses.generator_loss)
            .scalar("critic_loss", losses.critic_loss)
            .scalar("noise_max", noise_max)
            .scalar("noise_min", noise_min)
            .image("original", clean.clone())
            .image("noisy", noisy)
            .image("generated_noise", generated_noise)
            .image("denoised", denoised);
        sink.emit(record)?;

        tracing::debug!(
            "step {}: generator_loss={:.5} critic_loss={:.5} psnr={:.2}",
            self.global_step,
            losses.generator_loss,
            losses.critic_loss,
            quality
        );

        let checkpointed = step % self.config.training.checkpoint_interval == 0;
        if checkpointed {
            self.save_checkpoint()?;
        }

        Ok(StepOutput {
            step: self.global_step,
            losses,
            psnr: quality,
            checkpointed,
        })
    }

    /// Trains for up to `max_steps` iterations.
    ///
    /// The sink is closed on every exit path. A stop request or an expired
    /// deadline ends the run at the next step boundary and persists the last
    /// completed step if the regular cadence has not already done so.
    pub fn run(
        &mut self,
        data: &mut dyn BatchSource,
        sink: &mut dyn MonitorSink,
    ) -> Result<TrainingSummary> {
        let result = self.run_steps(data, sink);
        let closed = sink.close().context("Failed to close monitoring sink");
        let summary = result?;
        closed?;
        Ok(summary)
    }

    fn run_steps(
        &mut self,
        data: &mut dyn BatchSource,
        sink: &mut dyn MonitorSink,
    ) -> Result<TrainingSummary> {
        let max_steps = self.config.training.max_steps;
        let start_step = self.global_step;
        let written_before = self.checkpoints_written;
        data.resume_at(start_step)
            .context("Failed to position the batch source")?;
        let stop = StopCheck::new(
            self.stop_signal.clone(),
            self.config
                .training
                .max_duration_secs
                .map(Duration::from_secs),
        );

        tracing::info!(
            "Starting {} training for {} steps from step {}",
            self.variant(),
            max_steps,
            start_step
        );

        let pb = if self.show_progress {
            let pb = ProgressBar::new(max_steps as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ETA:{eta} {msg}")?
                    .progress_chars("=>-"),
            );
            pb
        } else {
            ProgressBar::hidden()
        };

        let start_time = Instant::now();
        let mut steps_run = 0;
        let mut last_losses = None;
        let mut stop_reason = None;

        while steps_run < max_steps {
            if let Some(reason) = stop.poll() {
                stop_reason = Some(reason);
                break;
            }

            let batch = data.next_batch().context("Failed to draw training batch")?;
            let output = self.train_step(&batch, sink)?;
            steps_run += 1;
            last_losses = Some(output.losses);

            pb.inc(1);
            pb.set_message(format!(
                "G: {:.4} | D: {:.4} | PSNR: {:.2}",
                output.losses.generator_loss, output.losses.critic_loss, output.psnr
            ));
        }

        if let Some(reason) = stop_reason {
            match reason {
                StopReason::Requested => tracing::warn!("Stop requested at step {}", self.global_step),
                StopReason::Deadline => {
                    tracing::warn!("Time budget exhausted at step {}", self.global_step)
                }
            }
            if steps_run > 0 && self.last_saved_step != Some(self.global_step) {
                self.save_checkpoint()?;
            }
        }

        pb.finish_with_message(format!(
            "{} steps in {}",
            steps_run,
            format_duration(start_time.elapsed().as_secs())
        ));

        Ok(TrainingSummary {
            start_step,
            final_step: self.global_step,
            steps_run,
            checkpoints_written: self.checkpoints_written - written_before,
            stopped_early: stop_reason.is_some(),
            last_losses,
        })
    }
}
