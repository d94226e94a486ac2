use std::time::Duration;

use anyhow::Context;
use nio_http::handler::HandlerRegistry;
use nio_server::{HttpFileHandler, Server, ServerConfig};
use tokio::runtime::Builder;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(doc_root) = args.next() else {
        eprintln!("Please specify document root directory");
        eprintln!("Usage: nio-server <document-root> [config.toml]");
        std::process::exit(1);
    };
    let config = match args.next() {
        Some(path) => ServerConfig::from_file(&path).with_context(|| format!("loading {path}"))?,
        None => ServerConfig::default(),
    };

    let workers = Builder::new_multi_thread()
        .worker_threads(config.worker_threads)
        .thread_name("nio-worker")
        .enable_all()
        .build()
        .context("building worker runtime")?;
    let reactor = Builder::new_multi_thread()
        .worker_threads(config.reactor_threads)
        .thread_name("nio-reactor")
        .enable_all()
        .build()
        .context("building reactor runtime")?;

    let registry = HandlerRegistry::builder().register("*", HttpFileHandler::new(&doc_root)).build()?;
    let worker_handle = workers.handle().clone();

    reactor.block_on(async move {
        let server = Server::bind(&config, registry, worker_handle).await?;
        info!(doc_root = %doc_root, addr = %server.local_addr(), "serving files");

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupted");
                    signal.cancel();
                }
                Err(e) => error!(cause = %e, "can't listen for ctrl-c"),
            }
        });

        server.run(shutdown).await;
        anyhow::Ok(())
    })?;

    workers.shutdown_timeout(Duration::from_secs(1));
    info!("Shutdown");
    Ok(())
}
