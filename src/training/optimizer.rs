//! Adam over one parameter partition.
//!
//! Each partition owns an [`Adam`] instance with its own learning rate and
//! moment estimates, and only ever touches the module it was handed.

use crate::checkpoints::mlx_utils::{from_flat, to_flat};
use crate::checkpoints::{CheckpointError, OptimizerState};
use crate::config::TrainingConfig;
use mlx_rs::error::Exception;
use mlx_rs::module::{FlattenedModuleParam, ModuleParameters};
use mlx_rs::Array;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdamConfig {
    pub lr: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
}

impl AdamConfig {
    pub fn from_training(training: &TrainingConfig, lr: f32) -> Self {
        Self {
            lr,
            beta1: training.adam_beta1,
            beta2: training.adam_beta2,
            epsilon: training.adam_epsilon,
        }
    }
}

pub struct Adam {
    config: AdamConfig,
    /// Prefix that turns module-local names into qualified ones
    scope: String,
    step: usize,
    exp_avg: HashMap<String, Array>,
    exp_avg_sq: HashMap<String, Array>,
}

impl Adam {
    pub fn new(config: AdamConfig, scope: impl Into<String>) -> Self {
        Self {
            config,
            scope: scope.into(),
            step: 0,
            exp_avg: HashMap::new(),
            exp_avg_sq: HashMap::new(),
        }
    }

    /// Number of updates applied so far
    pub fn step_count(&self) -> usize {
        self.step
    }

    /// Applies one Adam step to every parameter of `module` that has a gradient
    pub fn update<M: ModuleParameters>(
        &mut self,
        module: &mut M,
        grads: &FlattenedModuleParam,
    ) -> Result<(), Exception> {
        self.step += 1;
        let t = self.step as f32;
        let AdamConfig {
            lr,
            beta1,
            beta2,
            epsilon,
        } = self.config;
        let bias_correction1 = 1.0 - beta1.powf(t);
        let bias_correction2 = 1.0 - beta2.powf(t);

        let mut params = module.parameters_mut().flatten();
        for (name, grad) in grads.iter() {
            let key = name.to_string();
            let param = params.get_mut(name).ok_or_else(|| {
                Exception::custom(format!("gradient for unknown parameter '{}.{}'", self.scope, key))
            })?;

            // m = beta1 * m + (1 - beta1) * g
            let m_new = match self.exp_avg.get(&key) {
                Some(m) => m
                    .multiply(Array::from_f32(beta1))?
                    .add(&grad.multiply(Array::from_f32(1.0 - beta1))?)?,
                None => grad.multiply(Array::from_f32(1.0 - beta1))?,
            };

            // v = beta2 * v + (1 - beta2) * g^2
            let g_sq = grad.square()?;
            let v_new = match self.exp_avg_sq.get(&key) {
                Some(v) => v
                    .multiply(Array::from_f32(beta2))?
                    .add(&g_sq.multiply(Array::from_f32(1.0 - beta2))?)?,
                None => g_sq.multiply(Array::from_f32(1.0 - beta2))?,
            };

            let m_hat = m_new.multiply(Array::from_f32(1.0 / bias_correction1))?;
            let v_hat_sqrt = v_new
                .multiply(Array::from_f32(1.0 / bias_correction2))?
                .sqrt()?;
            let update = m_hat
                .multiply(Array::from_f32(lr))?
                .divide(&v_hat_sqrt.add(Array::from_f32(epsilon))?)?;

            let new_param = (**param).subtract(&update)?;
            new_param.eval()?;
            m_new.eval()?;
            v_new.eval()?;

            **param = new_param;
            self.exp_avg.insert(key.clone(), m_new);
            self.exp_avg_sq.insert(key, v_new);
        }

        Ok(())
    }

    /// Copies the moments out for checkpointing, keyed by qualified name
    pub fn export_state(&self) -> Result<OptimizerState, Exception> {
        let mut state = OptimizerState {
            step: self.step,
            ..Default::default()
        };
        for (name, m) in &self.exp_avg {
            state
                .exp_avg
                .insert(format!("{}.{}", self.scope, name), to_flat(m)?);
        }
        for (name, v) in &self.exp_avg_sq {
            state
                .exp_avg_sq
                .insert(format!("{}.{}", self.scope, name), to_flat(v)?);
        }
        Ok(state)
    }

    /// An optimizer with this one's settings and the stored moments.
    ///
    /// Moments for parameters outside this optimizer's scope are rejected.
    pub fn with_state(&self, state: &OptimizerState) -> Result<Self, CheckpointError> {
        let prefix = format!("{}.", self.scope);
        let strip = |name: &str| -> Result<String, CheckpointError> {
            name.strip_prefix(&prefix)
                .map(str::to_string)
                .ok_or_else(|| CheckpointError::ForeignMoment {
                    scope: self.scope.clone(),
                    name: name.to_string(),
                })
        };

        let mut exp_avg = HashMap::new();
        for (name, (data, shape)) in &state.exp_avg {
            exp_avg.insert(strip(name)?, from_flat(data, shape));
        }
        let mut exp_avg_sq = HashMap::new();
        for (name, (data, shape)) in &state.exp_avg_sq {
            exp_avg_sq.insert(strip(name)?, from_flat(data, shape));
        }

        Ok(Self {
            config: self.config,
            scope: self.scope.clone(),
            step: state.step,
            exp_avg,
            exp_avg_sq,
        })
    }

    /// Replaces the moments with a stored state; unchanged on error
    pub fn load_state(&mut self, state: &OptimizerState) -> Result<(), CheckpointError> {
        *self = self.with_state(state)?;
        Ok(())
    }
}
