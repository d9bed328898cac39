use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, FitConfig, FitReport, Msg, Payload},
};
use tokio::io::{AsyncRead, AsyncWrite};

/// The coordinator's end of one client connection.
pub struct Client<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    id: usize,
    rx: OnoReceiver<R>,
    tx: OnoSender<W>,
    rx_buf: Vec<f32>,
}

impl<R, W> Client<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// Creates a new `Client`.
    ///
    /// # Arguments
    /// * `id` - Identifier used for observability.
    /// * `rx` - The receiving end of the connection.
    /// * `tx` - The sending end of the connection.
    pub fn new(id: usize, rx: OnoReceiver<R>, tx: OnoSender<W>) -> Self {
        Self {
            id,
            rx,
            tx,
            rx_buf: Vec::new(),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Asks the client for its current parameters.
    pub async fn get_parameters(&mut self) -> io::Result<Vec<f32>> {
        self.tx.send(&Msg::Control(Command::GetParameters)).await?;

        let msg: Msg = self.rx.recv_into(&mut self.rx_buf).await?;
        match msg {
            Msg::Data(Payload::Params(params)) => Ok(params.to_vec()),
            other => Err(unexpected(self.id, "data/params", &other)),
        }
    }

    /// Sends the global parameters for a local fit round.
    ///
    /// # Returns
    /// The client's parameters after fitting and its report.
    pub async fn fit(
        &mut self,
        params: &[f32],
        config: FitConfig,
    ) -> io::Result<(Vec<f32>, FitReport)> {
        let mut params = params.to_vec();
        let msg = Msg::Data(Payload::Fit {
            params: &mut params,
            config,
        });
        self.tx.send(&msg).await?;

        let msg: Msg = self.rx.recv_into(&mut self.rx_buf).await?;
        match msg {
            Msg::Data(Payload::Fitted { params, report }) => Ok((params.to_vec(), report)),
            other => Err(unexpected(self.id, "data/fitted", &other)),
        }
    }

    /// Sends the global parameters for evaluation.
    ///
    /// # Returns
    /// The client's loss and the amount of samples it was computed on.
    pub async fn evaluate(&mut self, params: &[f32]) -> io::Result<(f32, usize)> {
        let mut params = params.to_vec();
        self.tx
            .send(&Msg::Data(Payload::Evaluate(&mut params)))
            .await?;

        let msg: Msg = self.rx.recv_into(&mut self.rx_buf).await?;
        match msg {
            Msg::Control(Command::Evaluated { loss, num_examples }) => Ok((loss, num_examples)),
            other => Err(unexpected(self.id, "control/evaluated", &other)),
        }
    }

    /// Tells the client training is over.
    pub async fn reconnect(&mut self) -> io::Result<()> {
        self.tx.send(&Msg::Control(Command::Reconnect)).await
    }
}

fn unexpected(id: usize, expected: &str, got: &Msg) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("client {id} answered {} instead of {expected}", got.kind()),
    )
}
