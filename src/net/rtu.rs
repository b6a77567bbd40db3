use crate::config::{Parity, RtuConfig};
use crate::error::Error;
use crate::net::service::Service;

use tokio_modbus::server::rtu::Server as RtuServer;
use tokio_serial::{DataBits, SerialPortBuilder, SerialStream, StopBits};

/// Serial line settings of the configuration as a port builder
pub fn builder(config: &RtuConfig) -> Result<SerialPortBuilder, Error> {
    let data_bits = match config.data_bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        8 => DataBits::Eight,
        v => return Err(Error::Config(format!("Invalid data bits {}", v))),
    };
    let stop_bits = match config.stop_bits {
        1 => StopBits::One,
        2 => StopBits::Two,
        v => return Err(Error::Config(format!("Invalid stop bits {}", v))),
    };
    let parity = match config.parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    };
    Ok(tokio_serial::new(&config.path, config.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity))
}

pub fn open(config: &RtuConfig) -> Result<SerialStream, Error> {
    SerialStream::open(&builder(config)?)
        .map_err(|e| Error::Transport(format!("Failed to open {} ({})", config.path, e)))
}

pub async fn serve(stream: SerialStream, service: Service) -> Result<(), Error> {
    RtuServer::new(stream)
        .serve_forever(service)
        .await
        .map(|_| ())
        .map_err(|e| Error::Transport(e.to_string()))
}
