use std::{
    env,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use log::info;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use offloader::{
    OffloadConfig, SampleStore, TrainingCoordinator, models, store::JsonlBackend,
    training::TcpConnector,
};

const DEFAULT_DATA_DIR: &str = "offloader-data";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let mut config = match env::var("OFFLOADER_CONFIG") {
        Ok(path) => OffloadConfig::from_file(Path::new(&path))
            .with_context(|| format!("loading configuration from {path}"))?,
        Err(_) => OffloadConfig::default(),
    };

    if let Ok(host) = env::var("HOST") {
        config.training.coordinator_host = host;
    }

    let data_dir = env::var("OFFLOADER_DATA")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));
    if config.training.models_dir.is_none() {
        config.training.models_dir = Some(data_dir.join("models"));
    }

    let backend = JsonlBackend::open(&data_dir)
        .with_context(|| format!("opening the sample store at {}", data_dir.display()))?;
    let store = Arc::new(SampleStore::new(backend, config.features.clone()));

    let connector = Arc::new(TcpConnector::new(
        config.training.coordinator_host.clone(),
        config.training.ports.clone(),
    ));
    let coordinator = TrainingCoordinator::new(
        store,
        config.training.clone(),
        models::regressor_factory(&config),
        connector,
    )?;

    info!(
        "joining federated training at {}",
        config.training.coordinator_host
    );

    let cancel = CancellationToken::new();
    let training = {
        let coordinator = coordinator.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { coordinator.join_federated_training(cancel).await })
    };

    signal::ctrl_c().await?;
    info!("received SIGINT, leaving");
    cancel.cancel();
    training.await??;

    Ok(())
}
