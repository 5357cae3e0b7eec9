//! Process plumbing of vaultscope: shutdown signals and the health server.

pub mod health;
pub mod shutdown;

pub use health::{HealthResponse, ProgressSource};
pub use shutdown::{ShutdownSignal, forward_shutdown};

#[cfg(test)]
mod shutdown_test;
