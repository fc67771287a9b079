//! Process-wide module registries.
//!
//! Registries are filled during startup, before the broker starts, and only
//! read afterwards. Registering an id twice replaces the earlier module.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use crate::module::{
    Identified, RpcModule, ServiceCollector, ServiceDetector, ServiceMonitor, SinkModule,
};

/// A concurrent id to module map.
pub struct Registry<T: ?Sized> {
    kind: &'static str,
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T: ?Sized + Identified> Registry<T> {
    /// An empty registry. `kind` only labels log lines.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers `module` under its own id.
    pub fn register(&self, module: Arc<T>) {
        let id = module.id().to_string();
        debug!(kind = self.kind, id = %id, "Registering module");
        self.entries.write().insert(id, module);
    }

    /// The module registered under `id`, if any.
    pub fn lookup(&self, id: &str) -> Option<Arc<T>> {
        self.entries.read().get(id).cloned()
    }

    /// Snapshot of all registered modules.
    pub fn list(&self) -> Vec<Arc<T>> {
        self.entries.read().values().cloned().collect()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Label given at construction, e.g. `"rpc"`.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

pub static RPC_MODULES: Lazy<Registry<dyn RpcModule>> = Lazy::new(|| Registry::new("rpc"));

pub static SINK_MODULES: Lazy<Registry<dyn SinkModule>> = Lazy::new(|| Registry::new("sink"));

pub static DETECTORS: Lazy<Registry<dyn ServiceDetector>> =
    Lazy::new(|| Registry::new("detector"));

pub static MONITORS: Lazy<Registry<dyn ServiceMonitor>> = Lazy::new(|| Registry::new("monitor"));

pub static COLLECTORS: Lazy<Registry<dyn ServiceCollector>> =
    Lazy::new(|| Registry::new("collector"));

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{RpcRequest, RpcResponse};
    use async_trait::async_trait;

    struct Fixed {
        id: &'static str,
        body: &'static str,
    }

    impl Identified for Fixed {
        fn id(&self) -> &str {
            self.id
        }
    }

    #[async_trait]
    impl RpcModule for Fixed {
        async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
            Some(RpcResponse::for_request(&request, self.body.as_bytes().to_vec()))
        }
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry: Registry<dyn RpcModule> = Registry::new("rpc");
        assert!(registry.is_empty());
        registry.register(Arc::new(Fixed { id: "A", body: "a" }));
        registry.register(Arc::new(Fixed { id: "B", body: "b" }));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.ids(), vec!["A".to_string(), "B".to_string()]);
        assert!(registry.lookup("C").is_none());

        let module = registry.lookup("B").unwrap();
        let resp = module.execute(RpcRequest::default()).await.unwrap();
        assert_eq!(resp.content, b"b");
    }

    #[tokio::test]
    async fn test_duplicate_id_replaces() {
        let registry: Registry<dyn RpcModule> = Registry::new("rpc");
        registry.register(Arc::new(Fixed { id: "A", body: "old" }));
        registry.register(Arc::new(Fixed { id: "A", body: "new" }));
        assert_eq!(registry.len(), 1);

        let resp = registry
            .lookup("A")
            .unwrap()
            .execute(RpcRequest::default())
            .await
            .unwrap();
        assert_eq!(resp.content, b"new");
    }

    #[test]
    fn test_list_is_snapshot() {
        let registry: Registry<dyn RpcModule> = Registry::new("rpc");
        registry.register(Arc::new(Fixed { id: "A", body: "a" }));
        let snapshot = registry.list();
        registry.register(Arc::new(Fixed { id: "B", body: "b" }));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_ids_are_sorted() {
        let registry: Registry<dyn RpcModule> = Registry::new("rpc");
        registry.register(Arc::new(Fixed { id: "SNMP", body: "s" }));
        registry.register(Arc::new(Fixed { id: "Echo", body: "e" }));
        registry.register(Arc::new(Fixed { id: "DNS", body: "d" }));
        assert_eq!(registry.ids(), vec!["DNS", "Echo", "SNMP"]);
    }

    #[test]
    fn test_global_registry_kinds() {
        assert_eq!(RPC_MODULES.kind(), "rpc");
        assert_eq!(SINK_MODULES.kind(), "sink");
        assert_eq!(DETECTORS.kind(), "detector");
        assert_eq!(MONITORS.kind(), "monitor");
        assert_eq!(COLLECTORS.kind(), "collector");
    }
}
