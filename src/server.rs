//! The Server
//!
//! Grounded on the teacher's `Server` (binds a listener, then loops
//! accepting connections and spawning one task per socket), replacing its
//! generic `Storage<KV, KE>` parameterization and connection-permit
//! semaphore with the concrete [`crate::cmd::Context`] and an unbounded
//! accept loop (the spec's concurrency model caps nothing but the
//! snapshot-loader channel), and adding the snapshot-bootstrap phase the
//! teacher never had.

use crate::adapt;
use crate::blocking::Coordinator;
use crate::cli::Args;
use crate::cmd::{Config, Context};
use crate::conn::handle_connection;
use crate::constants::{RDB_CHANNEL_CAPACITY, RDB_LOAD_TIMEOUT_MS};
use crate::errors::ServerError;
use crate::log_and_stderr;
use crate::rdb;
use crate::store::{self, new_store};
use crate::types::SharedStore;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

/// The bound listener plus the shared state every connection task dispatches
/// against.
pub struct Server {
    listener: TcpListener,
    ctx: Context,
}

impl Server {
    /// Loads the snapshot before returning - the server does not accept
    /// connections on `listener` until bootstrap completes. Binding the
    /// listener is the caller's responsibility, so a bind failure and a
    /// snapshot failure can be told apart and mapped to distinct exit codes.
    pub async fn new(listener: TcpListener, args: Args) -> Result<Self, ServerError> {
        let addr = listener.local_addr()?;
        log_and_stderr!(info, "Listening on", addr);

        let store = new_store();
        let config = Arc::new(Config {
            dir: args.dir.clone(),
            dbfilename: args.dbfilename.clone(),
        });

        let snapshot_path = PathBuf::from(&args.dir).join(&args.dbfilename);
        bootstrap_snapshot(&store, &snapshot_path).await?;

        let ctx = Context {
            store,
            coordinator: Coordinator::new(),
            config,
        };

        Ok(Self { listener, ctx })
    }

    /// Runs the accept loop. Never returns under normal operation.
    pub async fn start(&self) -> Result<(), ServerError> {
        self.core_loop().await
    }

    async fn core_loop(&self) -> Result<(), ServerError> {
        info!("waiting for connections...");
        loop {
            let (socket, _) = self.listener.accept().await?;
            let ctx = self.ctx.clone();

            tokio::spawn(async move {
                if let Err(err) = handle_connection(socket, ctx).await {
                    log_and_stderr!(warn, "connection error:", err);
                }
            });
        }
    }
}

/// Loads the snapshot at `path` into `store` before the server starts
/// accepting connections. The loader task streams entries over a bounded
/// channel; this function drains it and aborts if bootstrap doesn't finish
/// within [`RDB_LOAD_TIMEOUT_MS`].
async fn bootstrap_snapshot(store: &SharedStore, path: &Path) -> Result<(), ServerError> {
    let (tx, mut rx) = mpsc::channel(RDB_CHANNEL_CAPACITY);

    let load_path = path.to_path_buf();
    let loader = tokio::spawn(async move { rdb::load(&load_path, tx).await });

    let drain = async {
        while let Some(item) = rx.recv().await {
            let entry = item?;
            let key = entry.key.clone();
            let record = adapt::rdb_entry_to_record(entry)
                .map_err(|err| ServerError::Other(anyhow::anyhow!(err)))?;
            store::set(store, key, record).await;
        }
        Ok::<(), ServerError>(())
    };

    match timeout(Duration::from_millis(RDB_LOAD_TIMEOUT_MS), drain).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(err),
        Err(_) => return Err(ServerError::BootstrapTimedOut(RDB_LOAD_TIMEOUT_MS)),
    }

    match loader.await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.into()),
        Err(join_err) => Err(ServerError::Other(anyhow::anyhow!(join_err))),
    }
}
