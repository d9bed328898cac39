mod client;
mod fedavg;

pub use client::Client;
pub use fedavg::{FedAvg, FedAvgConfig, RoundReport};
