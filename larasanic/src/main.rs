use clap::Parser;
use larasanic::{
    Application, Config,
    config::Args,
    console::{self, Command as _},
    providers::default_providers,
    telemetry,
};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    if rustls::crypto::aws_lc_rs::default_provider().install_default().is_err() {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    let args = Args::parse();
    let command = console::from_cli(args.command.clone(), shutdown_signal());

    // Commands that only touch files (key:generate, setup, ...) must work before a secret exists
    let config = if command.boots_application() || args.validate {
        Config::load(&args)?
    } else {
        Config::figment(&args).extract::<Config>()?
    };

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(&config.log_level)?;
    tracing::debug!("{:?}", args);

    let mut app = Application::new(config);
    if command.boots_application() {
        for provider in default_providers() {
            app.register_boxed(provider).await?;
        }
    }

    let mut stdout = std::io::stdout();
    let result = command.run(&mut app, &mut stdout).await;
    app.shutdown().await;
    result
}
