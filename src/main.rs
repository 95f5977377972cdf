use anyhow::Context;
use tracing_subscriber::EnvFilter;

use webserv::config::Config;
use webserv::handler::DefaultHandler;
use webserv::server::EventLoop;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let cfg = Config::load()?;
    let mut event_loop = EventLoop::bind(cfg, DefaultHandler)?;
    let shutdown = event_loop.shutdown_handle();

    // The loop blocks in poll(); it gets its own thread and the runtime
    // only waits for it and for Ctrl-C.
    let mut server = tokio::task::spawn_blocking(move || event_loop.run());

    tokio::select! {
        res = &mut server => {
            res.context("Event loop panicked")??;
        }

        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
            shutdown.shutdown();
            server.await.context("Event loop panicked")??;
        }
    }

    Ok(())
}
