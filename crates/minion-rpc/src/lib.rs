//! RPC modules and the probes they delegate to.
//!
//! Every module decodes its XML request, does the work and encodes the
//! outcome, failures included, into its XML response. [`register_all`] puts
//! the modules and probes into the process-wide registries.

pub mod collect;
pub mod detect;
pub mod dns;
pub mod echo;
pub mod error;
pub mod ping;
pub mod poller;
pub mod probes;
pub mod snmp;

use std::sync::Arc;

use minion_api::{
    RpcRequest, RpcResponse, ToXml, COLLECTORS, DETECTORS, MONITORS, RPC_MODULES,
};
use tracing::info;

pub use collect::{CollectRpcModule, COLLECT_MODULE_ID};
pub use detect::{DetectRpcModule, DETECT_MODULE_ID};
pub use dns::{DnsRpcModule, DNS_MODULE_ID};
pub use echo::{EchoRpcModule, ECHO_MODULE_ID};
pub use error::{Result, RpcError};
pub use ping::{PingRpcModule, PING_MODULE_ID};
pub use poller::{PollerRpcModule, POLLER_MODULE_ID};
pub use snmp::{SnmpRpcModule, SNMP_MODULE_ID};

/// Wraps an encoded body into a response routed back to `request`.
pub(crate) fn reply(request: &RpcRequest, body: &impl ToXml) -> Option<RpcResponse> {
    Some(RpcResponse::for_request(request, body.to_xml_bytes()))
}

/// Registers the built-in RPC modules, detectors, monitors and collectors.
pub fn register_all() {
    RPC_MODULES.register(Arc::new(EchoRpcModule));
    RPC_MODULES.register(Arc::new(DnsRpcModule::new()));
    RPC_MODULES.register(Arc::new(PingRpcModule));
    RPC_MODULES.register(Arc::new(SnmpRpcModule));
    RPC_MODULES.register(Arc::new(DetectRpcModule::default()));
    RPC_MODULES.register(Arc::new(PollerRpcModule::default()));
    RPC_MODULES.register(Arc::new(CollectRpcModule::default()));

    probes::register_probes(&DETECTORS, &MONITORS, &COLLECTORS);

    info!(
        rpc = ?RPC_MODULES.ids(),
        detectors = DETECTORS.len(),
        monitors = MONITORS.len(),
        collectors = COLLECTORS.len(),
        "Registered RPC modules"
    );
}
