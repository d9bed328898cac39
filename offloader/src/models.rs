use std::sync::Arc;

use log::{info, warn};
use machine_learning::{Predictor, Regressor, RegressorSpec, optimization::OptimizerSpec};

use crate::{
    config::{OffloadConfig, OptimizerKind},
    error::Result,
    variant::ModelVariant,
};

/// Builds a fresh, untrained predictor for a variant.
pub type PredictorFactory = Arc<dyn Fn(ModelVariant) -> Result<Box<dyn Predictor>> + Send + Sync>;

/// Builds the dense regressor of a variant as configured.
///
/// # Arguments
/// * `variant` - The variant to build the model for.
/// * `config` - The offloader configuration, for the feature layout and the model shapes.
pub fn build_regressor(
    variant: ModelVariant,
    config: &OffloadConfig,
) -> Result<Box<dyn Predictor>> {
    let learning_rate = config.models.learning_rate;
    let optimizer = match config.models.optimizer {
        OptimizerKind::Adam => OptimizerSpec::Adam { learning_rate },
        OptimizerKind::GradientDescent => OptimizerSpec::GradientDescent { learning_rate },
    };

    let spec = RegressorSpec::new(
        variant.input_dim(&config.features),
        config.models.hidden(variant).to_vec(),
        learning_rate,
    )
    .with_optimizer(optimizer)
    .with_seed(config.models.seed.wrapping_add(variant.index() as u64));

    Ok(Box::new(Regressor::new(&spec)?))
}

/// A factory building the configured regressors.
pub fn regressor_factory(config: &OffloadConfig) -> PredictorFactory {
    let config = config.clone();
    Arc::new(move |variant| build_regressor(variant, &config))
}

/// Builds one predictor per variant, in `ModelVariant::ALL` order.
pub fn build_all(factory: &PredictorFactory) -> Result<[Box<dyn Predictor>; 3]> {
    Ok([
        factory(ModelVariant::LocalTime)?,
        factory(ModelVariant::CloudComputationTime)?,
        factory(ModelVariant::CloudTransmissionTime)?,
    ])
}

/// Builds the inference predictors of every variant, restoring the persisted parameters of
/// those that have any when `restore_models` is set.
///
/// A variant whose file can't be loaded keeps its untrained parameters.
///
/// # Returns
/// One predictor per variant, in `ModelVariant::ALL` order.
pub fn inference_predictors(config: &OffloadConfig) -> Result<[Box<dyn Predictor>; 3]> {
    let mut predictors = build_all(&regressor_factory(config))?;
    if !config.training.restore_models {
        return Ok(predictors);
    }

    for (variant, predictor) in ModelVariant::ALL.into_iter().zip(&mut predictors) {
        let Some(path) = config.training.model_path(variant) else {
            continue;
        };
        if !path.exists() {
            continue;
        }

        match predictor.restore(&path) {
            Ok(()) => info!(variant = variant.name(); "restored persisted parameters"),
            Err(e) => warn!(
                variant = variant.name();
                "ignoring persisted parameters at {}: {e}",
                path.display()
            ),
        }
    }

    Ok(predictors)
}
