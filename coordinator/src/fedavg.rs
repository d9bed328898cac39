use std::io;

use comms::msg::FitConfig;
use futures::future;
use log::{debug, info};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{
        TcpListener,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

use crate::Client;

/// The federated averaging hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FedAvgConfig {
    pub num_rounds: usize,
    pub local_epochs: u32,
    pub batch_size: u32,
    /// How many clients must be connected before the first round.
    pub min_clients: usize,
}

impl Default for FedAvgConfig {
    fn default() -> Self {
        Self {
            num_rounds: 10,
            local_epochs: 3,
            batch_size: 2,
            min_clients: 1,
        }
    }
}

/// The aggregated outcome of one round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundReport {
    pub round: usize,
    pub fit_loss: f32,
    pub fit_examples: u64,
    pub eval_loss: f32,
    pub eval_examples: u64,
}

/// A federated averaging coordinator: every round each client fits the global parameters
/// locally, and the results are averaged weighted by each client's sample count.
#[derive(Debug, Clone, Default)]
pub struct FedAvg {
    config: FedAvgConfig,
}

impl FedAvg {
    pub fn new(config: FedAvgConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FedAvgConfig {
        &self.config
    }

    /// Waits for `min_clients` clients on `listener` and trains with them.
    ///
    /// # Returns
    /// The report of every round.
    pub async fn serve(&self, listener: &TcpListener) -> io::Result<Vec<RoundReport>> {
        let mut clients: Vec<Client<OwnedReadHalf, OwnedWriteHalf>> = Vec::new();

        while clients.len() < self.config.min_clients.max(1) {
            let (stream, addr) = listener.accept().await?;
            stream.set_nodelay(true)?;
            info!("client {} connected from {addr}", clients.len());

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);
            clients.push(Client::new(clients.len(), rx, tx));
        }

        self.run(&mut clients).await
    }

    /// Runs every round with a fixed set of clients, then asks them to disconnect.
    ///
    /// # Arguments
    /// * `clients` - The participating clients, at least one.
    ///
    /// # Returns
    /// The report of every round, or the first client error.
    pub async fn run<R, W>(&self, clients: &mut [Client<R, W>]) -> io::Result<Vec<RoundReport>>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let Some(first) = clients.first_mut() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "federated averaging needs at least one client",
            ));
        };

        let mut params = first.get_parameters().await?;
        info!(params = params.len(); "initial parameters received");

        let fit_config = FitConfig {
            epochs: self.config.local_epochs,
            batch_size: self.config.batch_size,
        };

        let mut reports = Vec::with_capacity(self.config.num_rounds);
        for round in 1..=self.config.num_rounds {
            let fitted = future::try_join_all(
                clients.iter_mut().map(|c| c.fit(&params, fit_config)),
            )
            .await?;

            let weights: Vec<u64> = fitted.iter().map(|(_, r)| u64::from(r.num_examples)).collect();
            let results: Vec<&[f32]> = fitted.iter().map(|(p, _)| p.as_slice()).collect();
            params = weighted_average(&results, &weights)?;

            let fit_losses: Vec<f32> = fitted.iter().map(|(_, r)| r.loss).collect();
            let fit_loss = weighted_mean(&fit_losses, &weights);

            let evaluated =
                future::try_join_all(clients.iter_mut().map(|c| c.evaluate(&params))).await?;
            let eval_weights: Vec<u64> = evaluated.iter().map(|&(_, n)| n as u64).collect();
            let eval_losses: Vec<f32> = evaluated.iter().map(|&(l, _)| l).collect();

            let report = RoundReport {
                round,
                fit_loss,
                fit_examples: weights.iter().sum(),
                eval_loss: weighted_mean(&eval_losses, &eval_weights),
                eval_examples: eval_weights.iter().sum(),
            };
            info!(
                round = report.round,
                fit_loss = report.fit_loss,
                eval_loss = report.eval_loss;
                "round done"
            );
            reports.push(report);
        }

        for client in clients.iter_mut() {
            debug!(client = client.id(); "sending reconnect");
            client.reconnect().await?;
        }

        Ok(reports)
    }
}

/// Averages parameter vectors weighted by sample count, or uniformly if every weight is zero.
pub(crate) fn weighted_average(results: &[&[f32]], weights: &[u64]) -> io::Result<Vec<f32>> {
    let Some(len) = results.first().map(|r| r.len()) else {
        return Ok(Vec::new());
    };

    if let Some(bad) = results.iter().find(|r| r.len() != len) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("clients disagree on the model size: {} vs {len}", bad.len()),
        ));
    }

    let total: u64 = weights.iter().sum();
    let uniform = total == 0;
    let norm = if uniform { results.len() as f64 } else { total as f64 };

    let mut avg = vec![0f64; len];
    for (params, &w) in results.iter().zip(weights) {
        let w = if uniform { 1. } else { w as f64 };
        for (a, &p) in avg.iter_mut().zip(params.iter()) {
            *a += w * f64::from(p);
        }
    }

    Ok(avg.into_iter().map(|a| (a / norm) as f32).collect())
}

fn weighted_mean(values: &[f32], weights: &[u64]) -> f32 {
    let total: u64 = weights.iter().sum();
    if total == 0 {
        if values.is_empty() {
            return 0.;
        }
        return values.iter().sum::<f32>() / values.len() as f32;
    }

    let sum: f64 = values
        .iter()
        .zip(weights)
        .map(|(&v, &w)| f64::from(v) * w as f64)
        .sum();
    (sum / total as f64) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_by_sample_count() {
        let a = [1., 10.];
        let b = [4., 40.];
        let avg = weighted_average(&[&a, &b], &[2, 1]).unwrap();
        assert_eq!(avg, vec![2., 20.]);
    }

    #[test]
    fn zero_weights_average_uniformly() {
        let avg = weighted_average(&[&[1., 3.], &[3., 5.]], &[0, 0]).unwrap();
        assert_eq!(avg, vec![2., 4.]);
    }

    #[test]
    fn mismatched_models_are_rejected() {
        assert!(weighted_average(&[&[1.], &[1., 2.]], &[1, 1]).is_err());
    }
}
