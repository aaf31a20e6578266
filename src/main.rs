//! Process entry point: parses `Config`, initialises `tracing`, loads the
//! crypto provider and the two JSON stores, then hands control to the
//! interactive shell.
//!
//! Grounded on the `clap::Parser` + `tracing_subscriber::fmt()` startup
//! shape used throughout `examples/FrancisVarga-stupid-db`'s `*-worker`
//! binaries (e.g. `crates/athena/src/bin/athena-worker.rs`); the
//! fatal-on-bad-startup exit code follows spec §6 ("non-zero only on fatal
//! initialisation failure: missing key, unparseable stores").

mod shell;

use clap::Parser;
use sfs::{Config, Coordinator, CryptoProvider, EncryptedFs, Graph, Users};
use tracing::{error, info};

use crate::shell::Shell;

fn main() {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone())),
        )
        .init();

    match run(config) {
        Ok(()) => std::process::exit(0),
        Err(message) => {
            error!(%message, "fatal startup failure");
            eprintln!("fatal: {message}");
            std::process::exit(1);
        }
    }
}

fn run(config: Config) -> Result<(), String> {
    let crypto = CryptoProvider::load(&config.fernet_key)
        .map_err(|e| format!("failed to load {}: {e}", config.fernet_key.display()))?;
    info!(path = %config.fernet_key.display(), "loaded crypto key");

    let fs = EncryptedFs::new(&config.storage_root)
        .map_err(|e| format!("failed to open storage root {}: {e}", config.storage_root.display()))?;

    let graph = Graph::load(&config.permissions_store, &crypto)
        .map_err(|e| format!("failed to load {}: {e}", config.permissions_store.display()))?;
    let users = Users::load(&config.users_store, &crypto)
        .map_err(|e| format!("failed to load {}: {e}", config.users_store.display()))?;

    info!("stores loaded, starting shell");
    let coordinator = Coordinator::new(crypto, fs, graph, users);
    Shell::new(coordinator).run().map_err(|e| e.to_string())
}
