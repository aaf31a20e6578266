//! Process-startup configuration, parsed once in `main` and threaded by
//! reference into the crypto provider and stores instead of living behind
//! a process-wide singleton.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "sfs", about = "Secure File System shell")]
pub struct Config {
    /// Root directory of the encrypted file tree.
    #[arg(long, default_value = "files")]
    pub storage_root: PathBuf,

    /// Path to the base64-urlsafe 32-byte symmetric key.
    #[arg(long, default_value = "fernet.key")]
    pub fernet_key: PathBuf,

    /// Path to the permissions graph store. Prefix the filename with
    /// `encrypted_` to persist it as ciphertext.
    #[arg(long, default_value = "json/permissions.json")]
    pub permissions_store: PathBuf,

    /// Path to the user/group store. Same `encrypted_` prefix rule.
    #[arg(long, default_value = "json/users.json")]
    pub users_store: PathBuf,

    /// Log verbosity, e.g. `info`, `debug`. Overridden by `RUST_LOG` if set.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}
