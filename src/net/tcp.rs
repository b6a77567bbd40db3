use crate::config::TcpConfig;
use crate::error::Error;
use crate::net::service::Service;

use tokio::net::TcpListener;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server as TcpServer};

pub async fn bind(config: &TcpConfig) -> Result<TcpListener, Error> {
    let addr = config.socket_addr()?;
    TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Transport(format!("Failed to bind {} ({})", addr, e)))
}

/// Accept connections until the listener fails, each connection served by a clone of `service`
pub async fn serve(listener: TcpListener, service: Service) -> Result<(), Error> {
    let server = TcpServer::new(listener);
    let log = service.logger().clone();
    let new_request_handler = |_socket_addr| Ok(Some(service.clone()));
    let on_connected = |stream, socket_addr| async move {
        accept_tcp_connection(stream, socket_addr, new_request_handler)
    };
    let on_process_error = move |err: std::io::Error| {
        log.warn(&format!("Server processing failed. [{}]", err));
    };
    server
        .serve(&on_connected, on_process_error)
        .await
        .map(|_| ())
        .map_err(|e| Error::Transport(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::bind;
    use crate::config::TcpConfig;
    use crate::error::Error;

    #[tokio::test]
    async fn ut_bind_port_in_use() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = TcpConfig {
            host: Some(str!("127.0.0.1")),
            port: Some(taken.local_addr().unwrap().port()),
        };
        assert!(matches!(bind(&config).await, Err(Error::Transport(_))));

        let config = TcpConfig {
            host: Some(str!("127.0.0.1")),
            port: Some(0),
        };
        assert!(bind(&config).await.is_ok());
    }
}
