use crate::{connection::Connection, Config};
use anyhow::Result;
use fanout_cache::CacheReader;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::Semaphore};
use tracing::{info, info_span, warn, Instrument};

/// The sync server's bound listening socket.
pub struct Server {
    listener: TcpListener,
}

// === impl Server ===

impl Server {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts peers until shutdown, running each session concurrently.
    ///
    /// Sessions beyond the peer limit are closed immediately rather than
    /// queued; the peer reconnects against another hub or after others
    /// disconnect.
    pub async fn serve(self, config: Config, cache: CacheReader, drain: drain::Watch) -> Result<()> {
        let peers = Arc::new(Semaphore::new(config.max_peers));
        let shutdown = drain.clone().signaled();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                res = self.listener.accept() => {
                    let (socket, client_addr) = res?;
                    let permit = match peers.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            warn!(client.addr = %client_addr, "Peer limit reached; refusing connection");
                            continue;
                        }
                    };

                    let connection = Connection::new(&config, cache.clone());
                    let drain = drain.clone();
                    tokio::spawn(
                        async move {
                            let _permit = permit;
                            connection.serve(socket, drain).await;
                        }
                        .instrument(info_span!("peer", client.addr = %client_addr)),
                    );
                }

                _ = &mut shutdown => {
                    info!("Shutting down; no longer accepting connections");
                    return Ok(());
                }
            }
        }
    }
}
