use anyhow::{bail, Result};
use clap::Parser;
use fanout_cache::Cache;
use fanout_core::SyncStatus;
use fanout_hub::{admin, server::Server, upstream, Args};
use std::{sync::Arc, time::Duration};
use tokio::{
    signal::unix::{signal, SignalKind},
    sync::watch,
};
use tracing::{info, info_span, warn, Instrument};

#[cfg(all(target_os = "linux", target_arch = "x86_64", target_env = "gnu"))]
#[global_allocator]
static GLOBAL: jemallocator::Jemalloc = jemallocator::Jemalloc;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    args.init_tracing();
    let config = args.config()?;

    info!(version = %fanout_hub::VERSION, "Starting fan-out hub");

    let (cache, reader) = Cache::new();
    let (status_tx, status_rx) = watch::channel(SyncStatus::WaitForDatastore);
    let (close, drain) = drain::channel();

    let client = Arc::new(upstream::JsonLineClient::new(config.upstream_addr.clone()));
    let driver = upstream::Driver::new(cache, client, status_tx);
    tokio::spawn(driver.run(drain.clone()).instrument(info_span!("upstream")));

    tokio::spawn(admin::serve(config.admin_addr, status_rx).instrument(info_span!("admin")));

    let server = Server::bind(config.listen_addr).await?;
    info!(addr = %server.local_addr()?, "Sync server listening");
    let serve = tokio::spawn(
        server
            .serve(config, reader, drain.clone())
            .instrument(info_span!("server")),
    );
    drop(drain);

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        res = serve => {
            res??;
            bail!("sync server terminated unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => info!("Interrupted; shutting down"),
        _ = sigterm.recv() => info!("Terminated; shutting down"),
    }

    if tokio::time::timeout(SHUTDOWN_GRACE, close.drain())
        .await
        .is_err()
    {
        warn!("Graceful shutdown timed out; exiting");
    }
    Ok(())
}
