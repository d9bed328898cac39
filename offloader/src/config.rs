use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{OffloadErr, Result},
    features::FeatureLayout,
    variant::ModelVariant,
};

/// Where tasks are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Pick the cheaper side according to the predictors.
    #[default]
    Predict,
    /// Always run locally, without predicting.
    ForceLocal,
    /// Always run remotely, without predicting.
    ForceCloud,
    /// Predict, so that prediction errors are tracked, but always run locally.
    PredictAndForceLocal,
    /// Predict, so that prediction errors are tracked, but always run remotely.
    PredictAndForceCloud,
}

/// What happens when a variant that already has a trainer keeps growing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejoinPolicy {
    /// Only log the growth, the trainer keeps its original snapshot.
    #[default]
    TrackOnly,
    /// Rebuild the trainer from the grown population once its current session ends.
    Refresh,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionConfig {
    pub placement: Placement,
    pub exploration_chance: f64,
    pub energy_weight: f32,
    pub per_node_cost: f32,
    pub min_nodes_before_penalty: u32,
    pub seed: Option<u64>,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            placement: Placement::Predict,
            exploration_chance: 0.1,
            energy_weight: 0.4,
            per_node_cost: 200.,
            min_nodes_before_penalty: 3,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub record_samples: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            record_samples: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub repeats: u32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { repeats: 3 }
    }
}

/// Coordinator endpoints, one per variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ports {
    pub local_time: u16,
    pub cloud_computation_time: u16,
    pub cloud_transmission_time: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            local_time: 8885,
            cloud_computation_time: 8886,
            cloud_transmission_time: 8887,
        }
    }
}

impl Ports {
    pub fn of(&self, variant: ModelVariant) -> u16 {
        match variant {
            ModelVariant::LocalTime => self.local_time,
            ModelVariant::CloudComputationTime => self.cloud_computation_time,
            ModelVariant::CloudTransmissionTime => self.cloud_transmission_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub coordinator_host: String,
    pub ports: Ports,
    pub min_samples_to_start: usize,
    pub min_new_samples_to_rejoin: usize,
    pub rejoin_policy: RejoinPolicy,
    pub restore_models: bool,
    pub models_dir: Option<PathBuf>,
    pub eval_fraction: f32,
    pub eval_batch_size: usize,
    /// Caps the epochs a coordinator can ask for in one fit round.
    pub max_epochs: u32,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            coordinator_host: "127.0.0.1".into(),
            ports: Ports::default(),
            min_samples_to_start: 10,
            min_new_samples_to_rejoin: 10,
            rejoin_policy: RejoinPolicy::TrackOnly,
            restore_models: true,
            models_dir: None,
            eval_fraction: 0.2,
            eval_batch_size: 4,
            max_epochs: 100,
            seed: 0,
        }
    }
}

impl TrainingConfig {
    /// The file a variant's trained parameters are persisted to, if persistence is enabled.
    pub fn model_path(&self, variant: ModelVariant) -> Option<PathBuf> {
        self.models_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.safetensors", variant.name())))
    }
}

/// The optimizer every variant's regressor is trained with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    GradientDescent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub local_time_hidden: Vec<usize>,
    pub cloud_computation_time_hidden: Vec<usize>,
    pub cloud_transmission_time_hidden: Vec<usize>,
    pub optimizer: OptimizerKind,
    pub learning_rate: f32,
    pub seed: u64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            local_time_hidden: vec![32, 16, 8, 4],
            cloud_computation_time_hidden: vec![32, 16, 8, 4],
            cloud_transmission_time_hidden: vec![16, 8],
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.001,
            seed: 0,
        }
    }
}

impl ModelsConfig {
    pub fn hidden(&self, variant: ModelVariant) -> &[usize] {
        match variant {
            ModelVariant::LocalTime => &self.local_time_hidden,
            ModelVariant::CloudComputationTime => &self.cloud_computation_time_hidden,
            ModelVariant::CloudTransmissionTime => &self.cloud_transmission_time_hidden,
        }
    }
}

/// The whole offloader configuration. Every field has a default, so an empty JSON object is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffloadConfig {
    pub decision: DecisionConfig,
    pub dispatch: DispatchConfig,
    pub calibration: CalibrationConfig,
    pub features: FeatureLayout,
    pub training: TrainingConfig,
    pub models: ModelsConfig,
}

impl Default for OffloadConfig {
    fn default() -> Self {
        Self {
            decision: DecisionConfig::default(),
            dispatch: DispatchConfig::default(),
            calibration: CalibrationConfig::default(),
            features: FeatureLayout::default(),
            training: TrainingConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

impl OffloadConfig {
    /// Reads and validates a JSON configuration file.
    ///
    /// # Arguments
    /// * `path` - The file to read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parses and validates a JSON configuration.
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| OffloadErr::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants serde can't express.
    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: &str| Err(OffloadErr::InvalidConfig(detail.into()));

        if !(0.0..=1.0).contains(&self.decision.exploration_chance) {
            return invalid("exploration_chance must be within [0, 1]");
        }
        if self.decision.energy_weight < 0. || self.decision.per_node_cost < 0. {
            return invalid("cost weights must be non-negative");
        }
        if self.calibration.repeats == 0 {
            return invalid("calibration needs at least one repeat");
        }
        if !(0.0..1.0).contains(&self.training.eval_fraction) {
            return invalid("eval_fraction must be within [0, 1)");
        }
        if self.training.eval_batch_size == 0 {
            return invalid("eval_batch_size must be positive");
        }
        if self.training.max_epochs == 0 {
            return invalid("max_epochs must be positive");
        }
        if self.training.min_new_samples_to_rejoin == 0 {
            return invalid("min_new_samples_to_rejoin must be positive");
        }
        if self.models.learning_rate <= 0. {
            return invalid("learning_rate must be positive");
        }

        self.features.validate()
    }
}
