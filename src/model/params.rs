//! Ownership of trainable parameters.
//!
//! Every parameter belongs to exactly one [`Role`]. Names are qualified by the
//! scope the owning module is registered under, e.g. `generator.layers.0.weight`
//! or `critic.d_encoder.proj.bias`, and the same qualified names key checkpoint
//! tensors.

use crate::checkpoints::mlx_utils::{from_flat, to_flat};
use crate::checkpoints::CheckpointError;
use mlx_rs::error::Exception;
use mlx_rs::module::ModuleParameters;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Generator,
    Critic,
}

impl Role {
    pub const ALL: [Role; 2] = [Role::Generator, Role::Critic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Generator => "generator",
            Role::Critic => "critic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PartitionError {
    #[error("parameter '{name}' is already owned by the {owner}, cannot register it for the {requested}")]
    Overlap {
        name: String,
        owner: Role,
        requested: Role,
    },
    #[error("parameter '{0}' is not owned by the generator or the critic")]
    Unclassified(String),
    #[error("the {0} has no trainable parameters")]
    Empty(Role),
}

/// Parameter names split by owner
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Partition {
    pub generator: BTreeSet<String>,
    pub critic: BTreeSet<String>,
}

/// Registry of which role owns each qualified parameter name
#[derive(Debug, Clone, Default)]
pub struct ParamRegistry {
    owners: BTreeMap<String, Role>,
}

impl ParamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims every trainable parameter of `module`, qualified by `scope`
    pub fn register<M: ModuleParameters>(
        &mut self,
        role: Role,
        scope: &str,
        module: &M,
    ) -> Result<(), PartitionError> {
        self.register_names(role, scoped_parameter_names(scope, module))
    }

    pub fn register_names<I>(&mut self, role: Role, names: I) -> Result<(), PartitionError>
    where
        I: IntoIterator<Item = String>,
    {
        for name in names {
            if let Some(owner) = self.owners.get(&name) {
                return Err(PartitionError::Overlap {
                    name,
                    owner: *owner,
                    requested: role,
                });
            }
            self.owners.insert(name, role);
        }
        Ok(())
    }

    pub fn owner(&self, name: &str) -> Option<Role> {
        self.owners.get(name).copied()
    }

    pub fn names(&self, role: Role) -> BTreeSet<String> {
        self.owners
            .iter()
            .filter(|(_, owner)| **owner == role)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Fails unless both roles own at least one parameter
    pub fn ensure_complete(&self) -> Result<(), PartitionError> {
        for role in Role::ALL {
            if !self.owners.values().any(|owner| *owner == role) {
                return Err(PartitionError::Empty(role));
            }
        }
        Ok(())
    }

    /// Splits `names` by owner; any name nobody registered is an error
    pub fn partition<'a, I>(&self, names: I) -> Result<Partition, PartitionError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut partition = Partition::default();
        for name in names {
            match self.owner(name) {
                Some(Role::Generator) => partition.generator.insert(name.to_string()),
                Some(Role::Critic) => partition.critic.insert(name.to_string()),
                None => return Err(PartitionError::Unclassified(name.to_string())),
            };
        }
        Ok(partition)
    }
}

/// `scope.name` for every trainable parameter of `module`, sorted
pub fn scoped_parameter_names<M: ModuleParameters>(scope: &str, module: &M) -> Vec<String> {
    let mut names: Vec<String> = module
        .trainable_parameters()
        .flatten()
        .keys()
        .map(|name| format!("{}.{}", scope, name))
        .collect();
    names.sort();
    names
}

/// Flat copies of every parameter of `module`, keyed by qualified name
pub fn export_parameters<M: ModuleParameters>(
    scope: &str,
    module: &M,
) -> Result<Vec<(String, (Vec<f32>, Vec<i32>))>, Exception> {
    let mut weights = Vec::new();
    for (name, param) in module.parameters().flatten() {
        weights.push((format!("{}.{}", scope, name), to_flat(param)?));
    }
    weights.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(weights)
}

/// Checks that `weights` holds every parameter of `module` with its shape
pub fn check_parameters<M: ModuleParameters>(
    scope: &str,
    module: &M,
    weights: &HashMap<String, (Vec<f32>, Vec<i32>)>,
) -> Result<(), CheckpointError> {
    for (name, param) in module.parameters().flatten() {
        let qualified = format!("{}.{}", scope, name);
        let (_, shape) = weights
            .get(&qualified)
            .ok_or_else(|| CheckpointError::MissingTensor(qualified.clone()))?;
        if shape.as_slice() != param.shape() {
            return Err(CheckpointError::ShapeMismatch {
                name: qualified,
                expected: param.shape().to_vec(),
                found: shape.clone(),
            });
        }
    }
    Ok(())
}

/// Replaces every parameter of `module` with its stored value.
///
/// Every parameter must be present with a matching shape; nothing is replaced
/// unless all of them are.
pub fn import_parameters<M: ModuleParameters>(
    scope: &str,
    module: &mut M,
    weights: &HashMap<String, (Vec<f32>, Vec<i32>)>,
) -> Result<(), CheckpointError> {
    check_parameters(scope, module, weights)?;

    let mut params = module.parameters_mut().flatten();
    for (name, param) in params.iter_mut() {
        let qualified = format!("{}.{}", scope, name);
        if let Some((data, shape)) = weights.get(&qualified) {
            **param = from_flat(data, shape);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::model::{Discriminator, Generator};

    #[test]
    fn test_partition_covers_all_names_once() {
        let model = ModelConfig::tiny();
        let generator = Generator::new(&model, 1).unwrap();
        let critic = Discriminator::new(&model, 16, 1).unwrap();

        let mut registry = ParamRegistry::new();
        registry.register(Role::Generator, "generator", &generator).unwrap();
        registry.register(Role::Critic, "discriminator", &critic).unwrap();
        registry.ensure_complete().unwrap();

        let mut all = scoped_parameter_names("generator", &generator);
        all.extend(scoped_parameter_names("discriminator", &critic));

        let partition = registry
            .partition(all.iter().map(|s| s.as_str()))
            .unwrap();
        assert!(partition.generator.is_disjoint(&partition.critic));
        assert_eq!(
            partition.generator.len() + partition.critic.len(),
            all.len()
        );
        assert!(partition.generator.contains("generator.layers.0.weight"));
        assert!(partition.critic.contains("discriminator.head.weight"));
    }

    #[test]
    fn test_double_registration_is_an_overlap() {
        let mut registry = ParamRegistry::new();
        registry
            .register_names(Role::Generator, vec!["shared.weight".to_string()])
            .unwrap();
        let err = registry
            .register_names(Role::Critic, vec!["shared.weight".to_string()])
            .unwrap_err();
        assert_eq!(
            err,
            PartitionError::Overlap {
                name: "shared.weight".to_string(),
                owner: Role::Generator,
                requested: Role::Critic,
            }
        );
    }

    #[test]
    fn test_unknown_name_is_unclassified() {
        let mut registry = ParamRegistry::new();
        registry
            .register_names(Role::Critic, vec!["critic.w".to_string()])
            .unwrap();
        assert_eq!(
            registry.partition(["stray.w"]),
            Err(PartitionError::Unclassified("stray.w".to_string()))
        );
        assert_eq!(
            registry.ensure_complete(),
            Err(PartitionError::Empty(Role::Generator))
        );
    }

    #[test]
    fn test_import_restores_exported_values() {
        let model = ModelConfig::tiny();
        let source = Generator::new(&model, 1).unwrap();
        let mut target = Generator::new(&model, 1).unwrap();

        let weights: HashMap<_, _> = export_parameters("generator", &source)
            .unwrap()
            .into_iter()
            .collect();
        import_parameters("generator", &mut target, &weights).unwrap();

        let restored = export_parameters("generator", &target).unwrap();
        for (name, (data, _)) in restored {
            assert_eq!(data, weights[&name].0, "{} differs", name);
        }
    }

    #[test]
    fn test_import_rejects_missing_tensor() {
        let mut target = Generator::new(&ModelConfig::tiny(), 1).unwrap();
        let err = import_parameters("generator", &mut target, &HashMap::new()).unwrap_err();
        assert!(matches!(err, CheckpointError::MissingTensor(_)));
    }
}
