mod connector;
mod coordinator;
mod session;
mod trainer;

pub use connector::{BoxedReader, BoxedWriter, SessionConnector, TcpConnector};
pub use coordinator::{Phase, TrainingCoordinator};
pub use session::{FederatedSession, SessionEnd};
pub use trainer::{Trainer, TrainerOptions};
