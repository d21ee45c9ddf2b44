//! Server module
//!
//! Accepts TCP connections and hands each one to its own task. The acceptor
//! stops taking connections once its shutdown token is cancelled, which the
//! service does as part of its own shutdown.

mod connection;

use crate::service::Service;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use connection::Connection;

/// Listening socket plus the token that stops it
pub struct Acceptor {
    listener: TcpListener,
    shutdown: CancellationToken,
}

impl Acceptor {
    /// Bind the listening socket
    pub async fn bind(addr: &str) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", listener.local_addr()?);
        Ok(Acceptor {
            listener,
            shutdown: CancellationToken::new(),
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops `run` when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until the shutdown token fires
    pub async fn run(self, service: Arc<Service>) -> anyhow::Result<()> {
        loop {
            let (socket, peer) = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Acceptor stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => accepted?,
            };
            info!("New connection from {}", peer);

            let service = service.clone();
            tokio::spawn(async move {
                if let Err(e) = Connection::new(socket, peer).handle(service).await {
                    error!("Connection error from {}: {}", peer, e);
                }
                info!("Connection closed: {}", peer);
            });
        }
    }
}
