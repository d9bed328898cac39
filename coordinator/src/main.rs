use std::{env, io};

use log::{error, info};
use tokio::{net::TcpListener, signal, task::JoinSet};

use coordinator::{FedAvg, FedAvgConfig};

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_BASE_PORT: u16 = 8885;
const ENDPOINTS: [&str; 3] = [
    "local_time",
    "cloud_computation_time",
    "cloud_transmission_time",
];

#[tokio::main]
async fn main() -> io::Result<()> {
    env_logger::init();

    let host = env::var("HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
    let base_port = match env::var("PORT") {
        Ok(port) => port
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        Err(_) => DEFAULT_BASE_PORT,
    };

    let server = FedAvg::new(FedAvgConfig::default());
    let mut endpoints = JoinSet::new();

    for (offset, name) in (0u16..).zip(ENDPOINTS) {
        let addr = format!("{host}:{}", base_port + offset);
        let listener = TcpListener::bind(&addr).await?;
        info!("{name} coordinator listening at {addr}");

        let server = server.clone();
        endpoints.spawn(async move {
            loop {
                match server.serve(&listener).await {
                    Ok(reports) => {
                        if let Some(last) = reports.last() {
                            info!(
                                endpoint = name,
                                eval_loss = last.eval_loss;
                                "training finished"
                            );
                        }
                    }
                    Err(e) => error!(endpoint = name; "training aborted: {e}"),
                }
            }
        });
    }

    signal::ctrl_c().await?;
    info!("received SIGINT, shutting down");
    endpoints.shutdown().await;

    Ok(())
}
