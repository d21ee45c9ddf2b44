use shardkv::{Acceptor, Config, Service};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let config_path = std::env::args().nth(1);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("shardkv {} starting", env!("CARGO_PKG_VERSION"));
    if let Err(e) = run(config).await {
        error!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(
        "Detected {} CPU cores, using {} shards",
        num_cpus::get(),
        config.num_shards
    );

    let mut service = Service::new(&config)?;
    let acceptor = Acceptor::bind(&config.bind_addr).await?;
    service.init(Some(&acceptor), config.init_opts())?;
    let service = Arc::new(service);

    let mut server = tokio::spawn(acceptor.run(service.clone()));

    tokio::select! {
        result = &mut server => {
            error!("Acceptor exited unexpectedly");
            service.shutdown().await;
            return result?;
        }
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Interrupt received");
        }
    }

    service.shutdown().await;
    server.await??;
    info!("Bye");
    Ok(())
}
