//! The minion daemon: command line, logging, metrics endpoint and the
//! start/stop sequence tying the broker to the RPC and sink modules.

pub mod cli;
pub mod daemon;
pub mod logging;
pub mod metrics_server;

pub use cli::Args;
pub use daemon::Minion;
