pub mod calibration;
pub mod config;
pub mod cost_model;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod features;
pub mod metrics;
pub mod models;
pub mod stats;
pub mod store;
pub mod training;
pub mod variant;

pub use calibration::Calibrator;
pub use config::OffloadConfig;
pub use cost_model::{CostModel, Decision};
pub use dispatcher::{Dispatcher, ExecutionResult, ExecutionSite};
pub use error::{ExecutionErr, OffloadErr, Result};
pub use store::SampleStore;
pub use training::TrainingCoordinator;
pub use variant::ModelVariant;
