pub mod rtu;
pub mod service;
pub mod tcp;

pub use service::Service;

use crate::config::TransportConfig;
use crate::error::Error;

use tokio::net::TcpListener;
use tokio_serial::SerialStream;

/// Bound listener or opened serial line, ready to serve
pub enum Transport {
    Tcp(TcpListener),
    Rtu(SerialStream),
}

impl Transport {
    /// Bind the listener or open the serial port described by the configuration
    ///
    /// Must be called from within a tokio runtime.
    pub async fn bind(config: &TransportConfig) -> Result<Self, Error> {
        match config {
            TransportConfig::Tcp(c) => Ok(Transport::Tcp(tcp::bind(c).await?)),
            TransportConfig::Rtu(c) => Ok(Transport::Rtu(rtu::open(c)?)),
        }
    }

    pub async fn serve(self, service: Service) -> Result<(), Error> {
        match self {
            Transport::Tcp(listener) => tcp::serve(listener, service).await,
            Transport::Rtu(stream) => rtu::serve(stream, service).await,
        }
    }
}
