//! Core storage and access-control engine for the Secure File System.
//!
//! The bijection between logical paths and encrypted on-disk paths, the
//! permissions graph, the user/group store, and the coordinator that
//! composes them into the shell's verb table all live here. The shell
//! binary (`src/main.rs`, `src/shell.rs`) is a thin driver kept out of
//! this library on purpose (see the module docs on `coordinator` for the
//! contract it depends on).

pub mod config;
pub mod coordinator;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod graph;
pub mod users;

pub use config::Config;
pub use coordinator::{Coordinator, Session};
pub use crypto::CryptoProvider;
pub use error::{SfsError, SfsResult};
pub use fs::EncryptedFs;
pub use graph::{Graph, Node, Permission, ShareMode};
pub use users::{User, Users, ADMIN};
