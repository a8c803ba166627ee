use clap::Parser;
use log::{error, info};
use server::config::{Args, ServerConfig};
use server::network::Server;

/// Main-method of the application.
/// Parses command-line arguments, then runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = ServerConfig::from(Args::parse());
    config.validate()?;

    let server = Server::bind(&config).await?;
    let shutdown = server.shutdown_handle();
    info!(
        "Tank arena server on {} ({} players max, {} Hz)",
        server.local_addr()?,
        config.max_players,
        config.tick_rate
    );

    let mut server_handle = tokio::spawn(server.run());

    tokio::select! {
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => error!("Server stopped with an error: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    shutdown.trigger();
    if let Err(e) = server_handle.await {
        error!("Server task panicked: {}", e);
    }

    Ok(())
}
