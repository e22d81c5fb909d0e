use clap::Parser;
use godis_rs::{Config, Server, ServerLoop};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 6379)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file path
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(config_path) = &args.config {
        Config::from_file(config_path)?
    } else {
        Config {
            bind_addr: args.bind.clone(),
            port: args.port,
            log_level: args.log_level.clone(),
            ..Default::default()
        }
    };

    let log_level = if args.verbose {
        "debug"
    } else {
        &config.log_level
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("godis_rs={}", log_level))
        .init();

    info!(
        "Starting godis v{} on {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.bind_addr,
        config.port
    );

    let mut el = ServerLoop::new()?;
    let mut server = Server::new(config)?;

    let stop = el.stop_handle();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal, shutting down gracefully...");
        stop.stop();
    })?;

    if let Err(e) = server.run(&mut el) {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    Ok(())
}
