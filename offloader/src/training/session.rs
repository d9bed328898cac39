use std::{io, sync::Arc};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
};
use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use super::Trainer;
use crate::error::{OffloadErr, Result};

/// How a session that didn't fail ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The coordinator asked the client to disconnect.
    Reconnect,
    /// The coordinator closed the stream.
    Disconnected,
    /// The session was cancelled locally.
    Cancelled,
}

/// Answers a remote coordinator's rounds with a trainer.
pub struct FederatedSession {
    trainer: Arc<Trainer>,
}

impl FederatedSession {
    pub fn new(trainer: Arc<Trainer>) -> Self {
        Self { trainer }
    }

    /// Serves the coordinator until it disconnects, the session is cancelled or a protocol
    /// violation happens.
    ///
    /// # Arguments
    /// * `rx` - The receiving end of the coordinator channel.
    /// * `tx` - The sending end of the coordinator channel.
    /// * `cancel` - Ends the session between messages, shutting the channel down.
    ///
    /// # Returns
    /// How the session ended.
    ///
    /// # Errors
    /// Returns `OffloadErr` on I/O failures, training failures or unexpected messages.
    pub async fn run<R, W>(
        &self,
        mut rx: OnoReceiver<R>,
        mut tx: OnoSender<W>,
        cancel: CancellationToken,
    ) -> Result<SessionEnd>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let variant = self.trainer.variant();
        let mut rx_buf: Vec<f32> = Vec::new();

        info!(variant = variant.name(); "joined federated training");

        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(variant = variant.name(); "session cancelled");
                    tx.shutdown().await?;
                    return Ok(SessionEnd::Cancelled);
                }
                msg = rx.recv_into(&mut rx_buf) => msg,
            };

            let msg: Msg = match msg {
                Ok(msg) => msg,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!(variant = variant.name(); "coordinator closed the session");
                    return Ok(SessionEnd::Disconnected);
                }
                Err(e) => return Err(e.into()),
            };

            debug!(variant = variant.name(), kind = msg.kind(); "received message");

            match msg {
                Msg::Control(Command::GetParameters) => {
                    let mut params = self.trainer.parameters();
                    tx.send(&Msg::Data(Payload::Params(&mut params))).await?;
                }
                Msg::Data(Payload::Fit { params, config }) => {
                    let params = params.to_vec();
                    let trainer = self.trainer.clone();
                    let (mut params, report) =
                        tokio::task::spawn_blocking(move || trainer.fit(&params, config))
                            .await??;

                    debug!(
                        variant = variant.name(),
                        loss = report.loss;
                        "sending fitted parameters"
                    );
                    let msg = Msg::Data(Payload::Fitted {
                        params: &mut params,
                        report,
                    });
                    tx.send(&msg).await?;
                }
                Msg::Data(Payload::Evaluate(params)) => {
                    let params = params.to_vec();
                    let trainer = self.trainer.clone();
                    let (loss, num_examples) =
                        tokio::task::spawn_blocking(move || trainer.evaluate(&params)).await??;

                    let msg = Msg::Control(Command::Evaluated { loss, num_examples });
                    tx.send(&msg).await?;
                }
                Msg::Control(Command::Reconnect) => {
                    info!(variant = variant.name(); "coordinator asked to reconnect, leaving");
                    tx.shutdown().await?;
                    return Ok(SessionEnd::Reconnect);
                }
                Msg::Err(detail) => {
                    warn!(variant = variant.name(); "coordinator reported an error: {detail}");
                    return Err(OffloadErr::UnexpectedMessage {
                        variant,
                        got: "err",
                    });
                }
                other => {
                    warn!(variant = variant.name(); "unexpected message: {}", other.kind());
                    return Err(OffloadErr::UnexpectedMessage {
                        variant,
                        got: other.kind(),
                    });
                }
            }
        }
    }
}
