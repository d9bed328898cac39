use std::{path::Path, sync::Arc, time::SystemTime};

use log::debug;
use machine_learning::Predictor;
use parking_lot::{Mutex, RwLock};
use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::{
    config::{DecisionConfig, OffloadConfig, Placement},
    error::Result,
    executor::NetworkConditions,
    features::{self, Context, TaskFeatures},
    models,
    store::{BenchmarkInfo, SampleStore},
    variant::ModelVariant,
};

/// The outcome of a placement decision, with the predictions that led to it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Decision {
    pub run_locally: bool,
    pub local_cost: f32,
    pub cloud_cost: f32,
    pub local_time_ms: f32,
    pub cloud_compute_ms: f32,
    pub cloud_transmit_ms: f32,
    /// Whether the times above are predictions rather than placeholders.
    pub predicted: bool,
    /// Whether the side was picked at random.
    pub explored: bool,
}

impl Decision {
    fn placeholder(run_locally: bool) -> Self {
        Self {
            run_locally,
            ..Default::default()
        }
    }
}

/// Predicts local and remote costs and picks the execution site.
pub struct CostModel<R = StdRng> {
    store: Arc<SampleStore>,
    config: DecisionConfig,
    predictors: [RwLock<Box<dyn Predictor>>; 3],
    rng: Mutex<R>,
}

impl CostModel<StdRng> {
    /// Creates a new `CostModel`, seeding the exploration draws from the configuration or, if
    /// unset, from the OS.
    ///
    /// # Arguments
    /// * `store` - The sample store the stats and the baseline come from.
    /// * `config` - The decision parameters.
    /// * `predictors` - One inference predictor per variant, in `ModelVariant::ALL` order.
    pub fn new(
        store: Arc<SampleStore>,
        config: DecisionConfig,
        predictors: [Box<dyn Predictor>; 3],
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Self::with_rng(store, config, predictors, rng)
    }

    /// Creates a new `CostModel` as configured, restoring any persisted inference parameters.
    pub fn from_config(store: Arc<SampleStore>, config: &OffloadConfig) -> Result<Self> {
        let predictors = models::inference_predictors(config)?;
        Ok(Self::new(store, config.decision.clone(), predictors))
    }
}

impl<R: Rng + Send> CostModel<R> {
    /// Creates a new `CostModel` with an explicit source of randomness for exploration.
    pub fn with_rng(
        store: Arc<SampleStore>,
        config: DecisionConfig,
        predictors: [Box<dyn Predictor>; 3],
        rng: R,
    ) -> Self {
        Self {
            store,
            config,
            predictors: predictors.map(RwLock::new),
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &DecisionConfig {
        &self.config
    }

    /// Decides where a task should run.
    ///
    /// # Arguments
    /// * `features` - The task's features.
    /// * `network` - The current network conditions.
    ///
    /// # Returns
    /// The decision, or an error if the store or a predictor fails.
    pub fn decide(&self, features: &TaskFeatures, network: NetworkConditions) -> Result<Decision> {
        match self.config.placement {
            Placement::ForceLocal => return Ok(Decision::placeholder(true)),
            Placement::ForceCloud => return Ok(Decision::placeholder(false)),
            _ => {}
        }

        let Some(benchmark) = self.store.benchmark_info()? else {
            debug!("no calibration yet, defaulting to cloud");
            return Ok(Decision::placeholder(false));
        };

        self.store.layout().check(features)?;
        let mut decision = self.predict_costs(features, network, &benchmark)?;

        decision.run_locally = match self.config.placement {
            Placement::PredictAndForceLocal => true,
            Placement::PredictAndForceCloud => false,
            _ => self.pick_side(&mut decision),
        };

        debug!(
            local_cost = decision.local_cost,
            cloud_cost = decision.cloud_cost,
            run_locally = decision.run_locally,
            explored = decision.explored;
            "placement decided"
        );

        Ok(decision)
    }

    fn predict_costs(
        &self,
        features: &TaskFeatures,
        network: NetworkConditions,
        benchmark: &BenchmarkInfo,
    ) -> Result<Decision> {
        let ctx = Context {
            baseline_ms: benchmark.mean_local_time_ms,
            num_nodes: network.num_nodes,
            rtt_ms: network.rtt_ms,
            time_of_day: features::time_of_day(SystemTime::now()),
        };

        let local_time_ms = self.predict(ModelVariant::LocalTime, features, &ctx)?;
        let cloud_compute_ms = self.predict(ModelVariant::CloudComputationTime, features, &ctx)?;
        let cloud_transmit_ms = self.predict(ModelVariant::CloudTransmissionTime, features, &ctx)?;

        let local_cost = local_time_ms + self.config.energy_weight * local_time_ms;
        let cloud_cost =
            cloud_compute_ms + cloud_transmit_ms + self.node_penalty(network.num_nodes);

        Ok(Decision {
            run_locally: false,
            local_cost,
            cloud_cost,
            local_time_ms,
            cloud_compute_ms,
            cloud_transmit_ms,
            predicted: true,
            explored: false,
        })
    }

    /// Predicts a variant's target, in milliseconds, for a task in a given context.
    pub fn predict(
        &self,
        variant: ModelVariant,
        features: &TaskFeatures,
        ctx: &Context,
    ) -> Result<f32> {
        let stats = self.store.get_stats(variant)?;
        let x = stats.normalize(&features::build_input(variant, features.as_slice(), ctx));
        let y = self.predictors[variant.index()].read().predict(&x)?;
        Ok(stats.denormalize_target(y))
    }

    /// The extra cost of a remote with too many nodes.
    pub fn node_penalty(&self, num_nodes: u32) -> f32 {
        let over = num_nodes
            .saturating_add(1)
            .saturating_sub(self.config.min_nodes_before_penalty);
        self.config.per_node_cost * over as f32
    }

    fn pick_side(&self, decision: &mut Decision) -> bool {
        let mut rng = self.rng.lock();
        if rng.random_bool(self.config.exploration_chance) {
            decision.explored = true;
            return rng.random_bool(0.5);
        }

        decision.local_cost <= decision.cloud_cost
    }

    /// Replaces a variant's inference parameters.
    pub fn set_parameters(&self, variant: ModelVariant, params: &[f32]) -> Result<()> {
        self.predictors[variant.index()].write().set_parameters(params)?;
        Ok(())
    }

    /// Loads a variant's inference parameters from a persisted file.
    pub fn restore(&self, variant: ModelVariant, path: &Path) -> Result<()> {
        self.predictors[variant.index()].write().restore(path)?;
        Ok(())
    }
}
