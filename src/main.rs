//! rendezvous-server - Main entry point
//!
//! Pairs downloaders and uploaders behind NAT through a short identifier.

use anyhow::{Context, Result};
use rendezvous_server::{
    CliArgs, Config, PairingRegistry, RendezvousServer,
    build_server_config, load_or_generate,
};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Set up panic handler for unexpected errors
fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        match panic_info.location() {
            Some(location) => error!(
                "PANIC occurred at {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            ),
            None => error!("PANIC occurred at an unknown location"),
        }
        let payload = panic_info.payload();
        if let Some(s) = payload.downcast_ref::<&str>() {
            error!("Panic message: {}", s);
        } else if let Some(s) = payload.downcast_ref::<String>() {
            error!("Panic message: {}", s);
        } else {
            error!("Panic message: unknown");
        }
        error!("Backtrace:\n{:?}", backtrace);
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_handler();

    let args = CliArgs::parse_args();
    init_logging(&args);
    info!("rendezvous-server starting");
    debug!("CLI arguments: {:?}", args);

    let config = Config::from_args(&args);
    config.validate()
        .context("Invalid configuration")?;

    let certificate = load_or_generate(&config.app_dir)
        .context("Failed to provision TLS certificate")?;
    let tls = build_server_config(&certificate)
        .context("Failed to build TLS configuration")?;

    let registry = Arc::new(PairingRegistry::new());
    let server = RendezvousServer::bind(&config, tls, registry)
        .await
        .context("Failed to start listener")?;

    info!(
        "Serving on {} (uid length {}, ceiling {:?}, liveness deadline {:?})",
        server.local_addr()?,
        config.uid_length,
        config.ceiling_timeout,
        config.liveness_deadline
    );

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Interrupt received, shutting down"),
    }

    info!("rendezvous-server finished");
    Ok(())
}

/// Initialize logging based on verbosity settings
fn init_logging(args: &CliArgs) {
    let level = args.log_level();

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if args.is_verbose() {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }

    debug!("Logging initialized with level: {:?}", level);
}
