use std::io;

use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
};

use crate::{config::Ports, variant::ModelVariant};

pub type BoxedReader = Box<dyn AsyncRead + Unpin + Send>;
pub type BoxedWriter = Box<dyn AsyncWrite + Unpin + Send>;

/// Opens the stream to a variant's remote coordinator.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    async fn connect(&self, variant: ModelVariant) -> io::Result<(BoxedReader, BoxedWriter)>;
}

/// Connects over TCP, one port per variant.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    ports: Ports,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, ports: Ports) -> Self {
        Self {
            host: host.into(),
            ports,
        }
    }
}

#[async_trait]
impl SessionConnector for TcpConnector {
    async fn connect(&self, variant: ModelVariant) -> io::Result<(BoxedReader, BoxedWriter)> {
        let addr = format!("{}:{}", self.host, self.ports.of(variant));
        let stream = TcpStream::connect(&addr).await?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        Ok((Box::new(rx), Box::new(tx)))
    }
}
