pub mod arch;
pub mod error;
pub mod initialization;
pub mod optimization;
mod persistence;
mod predictor;
mod regressor;

pub use error::{MlErr, Result};
pub use predictor::Predictor;
pub use regressor::{Regressor, RegressorSpec};
