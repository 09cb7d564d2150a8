//! # An In-Memory RESP Key-Value Server

use log::{error, info};
use respdb::cli::Args;
use respdb::constants::{ExitCode, LISTEN_ADDR_STR};
use respdb::errors::ApplicationError;
use respdb::server::Server;
use std::process::exit;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), ApplicationError> {
    env_logger::init();
    info!("starting the server...");

    let args = Args::parse_ignoring_unknown()?;

    let listener = match TcpListener::bind(LISTEN_ADDR_STR).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {LISTEN_ADDR_STR}: {err}");
            exit(ExitCode::BindError as i32);
        }
    };

    let server = match Server::new(listener, args).await {
        Ok(server) => server,
        Err(err) => {
            error!("failed to load snapshot: {err}");
            exit(ExitCode::SnapshotError as i32);
        }
    };

    server.start().await?;

    Ok(())
}
