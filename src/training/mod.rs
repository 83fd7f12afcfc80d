pub mod objective;
pub mod optimizer;
pub mod stop;
pub mod trainer;

pub use objective::{AdversarialObjective, GanObjective, MmdObjective};
pub use optimizer::{Adam, AdamConfig};
pub use stop::{StopReason, StopSignal};
pub use trainer::{AdversarialTrainer, StartMode, StepOutput, TrainingSummary, GENERATOR_SCOPE};
