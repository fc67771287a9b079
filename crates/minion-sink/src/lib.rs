//! Sink listeners of the minion.
//!
//! Each listener is a [`SinkModule`]: started with the minion configuration
//! and a [`minion_api::Sink`], it receives data from the network and
//! publishes it under its own module id until stopped.
//!
//! | Module | Transport | Module id |
//! |---|---|---|
//! | [`HeartbeatModule`] | none | `Heartbeat` |
//! | [`SyslogModule`] | UDP + TCP | `Syslog` |
//! | [`TrapModule`] | UDP | `Trap` |
//! | [`UdpTelemetryModule`] | UDP | `Telemetry-<name>` |
//! | [`NxosGrpcModule`] | gRPC | `Telemetry-<name>` |

pub mod error;
pub mod flow;
pub mod heartbeat;
pub mod listener;
pub mod nxos;
pub mod syslog;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod trap;

use std::sync::Arc;

use minion_api::{MinionConfig, ParserKind, SinkModule, SINK_MODULES};
use tracing::info;

pub use error::{Result, SinkError};
pub use heartbeat::{HeartbeatModule, HEARTBEAT_MODULE_ID};
pub use nxos::NxosGrpcModule;
pub use syslog::{SyslogModule, SYSLOG_MODULE_ID};
pub use telemetry::UdpTelemetryModule;
pub use trap::{TrapModule, TRAP_MODULE_ID};

/// The listeners `config` enables.
pub fn sink_modules(config: &MinionConfig) -> Vec<Arc<dyn SinkModule>> {
    let mut modules: Vec<Arc<dyn SinkModule>> = vec![Arc::new(HeartbeatModule::new())];
    if config.syslog_port > 0 {
        modules.push(Arc::new(SyslogModule::new()));
    }
    if config.trap_port > 0 {
        modules.push(Arc::new(TrapModule::new()));
    }
    for listener in config.enabled_listeners() {
        let module: Arc<dyn SinkModule> = match listener.parser {
            ParserKind::NxosGrpc => Arc::new(NxosGrpcModule::new(listener.clone())),
            _ => Arc::new(UdpTelemetryModule::new(listener.clone())),
        };
        modules.push(module);
    }
    modules
}

/// Registers the enabled listeners in the process-wide sink registry.
pub fn register_all(config: &MinionConfig) {
    for module in sink_modules(config) {
        SINK_MODULES.register(module);
    }
    info!(sink = ?SINK_MODULES.ids(), "Registered sink modules");
}

#[cfg(test)]
mod tests {
    use super::*;
    use minion_api::{Identified, Listener};
    use pretty_assertions::assert_eq;

    fn ids(modules: &[Arc<dyn SinkModule>]) -> Vec<String> {
        let mut ids: Vec<String> = modules.iter().map(|m| m.id().to_string()).collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_enabled_modules() {
        let config = MinionConfig {
            trap_port: 0,
            syslog_port: 1514,
            listeners: vec![
                "flows,4729,Netflow9UDP".parse::<Listener>().unwrap(),
                "nxos,50001,NxosGRPC".parse::<Listener>().unwrap(),
                "off,0,ForwardUDP".parse::<Listener>().unwrap(),
            ],
            ..Default::default()
        };
        assert_eq!(
            ids(&sink_modules(&config)),
            vec!["Heartbeat", "Syslog", "Telemetry-flows", "Telemetry-nxos"]
        );
    }
}
