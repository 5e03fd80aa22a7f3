use anyhow::*;
use tracing::*;

use fuel_consumption_server::{cli, logger, server::TelemetryServer};

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    // CLI should be started before logger to allow control over verbosity
    cli::init();
    // Logger should start before everything else to register any log information
    logger::init(cli::log_path(), cli::is_verbose(), cli::is_tracing())?;

    info!(
        "{} {} ({}), built {}",
        env!("CARGO_PKG_NAME"),
        env!("VERGEN_GIT_DESCRIBE"),
        env!("VERGEN_GIT_SHA"),
        env!("VERGEN_BUILD_TIMESTAMP"),
    );
    debug!("Command line call: {}", cli::command_line_string());
    debug!("Command line input struct call: {}", cli::command_line());

    let server = TelemetryServer::from_config(&cli::server_config());

    tokio::select! {
        result = server.run() => result?,
        result = tokio::signal::ctrl_c() => {
            result?;
            info!(
                "Shutting down, {} session(s) still open",
                server.active_sessions()
            );
        }
    }

    Ok(())
}
