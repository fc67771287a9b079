use async_trait::async_trait;
use minion_api::dto::{CollectorRequest, CollectorResponse};
use minion_api::{
    FromXml, Identified, Registry, RpcModule, RpcRequest, RpcResponse, ServiceCollector,
    COLLECTORS,
};

use crate::reply;

pub const COLLECT_MODULE_ID: &str = "Collect";

/// Runs the collector named by the request's class name.
pub struct CollectRpcModule {
    collectors: &'static Registry<dyn ServiceCollector>,
}

impl CollectRpcModule {
    /// Looks collectors up in `collectors`.
    pub fn new(collectors: &'static Registry<dyn ServiceCollector>) -> Self {
        Self { collectors }
    }
}

impl Default for CollectRpcModule {
    fn default() -> Self {
        Self::new(&COLLECTORS)
    }
}

impl Identified for CollectRpcModule {
    fn id(&self) -> &str {
        COLLECT_MODULE_ID
    }
}

#[async_trait]
impl RpcModule for CollectRpcModule {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let collect = match CollectorRequest::from_xml_bytes(&request.content) {
            Ok(c) => c,
            Err(e) => return reply(&request, &CollectorResponse::error(e.to_string())),
        };
        let Some(collector) = self.collectors.lookup(&collect.class_name) else {
            return reply(
                &request,
                &CollectorResponse::error(format!(
                    "No collector found with class name '{}'",
                    collect.class_name
                )),
            );
        };
        let timeout = request.get_timeout();
        let body = match tokio::time::timeout(timeout, collector.collect(&collect)).await {
            Ok(body) => body,
            Err(_) => CollectorResponse::error(format!("Collection timed out after {timeout:?}")),
        };
        reply(&request, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_class() {
        let registry: &'static Registry<dyn ServiceCollector> =
            Box::leak(Box::new(Registry::new("collector")));
        let module = CollectRpcModule::new(registry);
        let response = module
            .execute(RpcRequest {
                rpc_id: "c".into(),
                module_id: COLLECT_MODULE_ID.into(),
                content: br#"<collector-request class-name="x.Y" address="10.0.0.1"/>"#.to_vec(),
                ..Default::default()
            })
            .await
            .unwrap();
        let body = CollectorResponse::from_xml_bytes(&response.content).unwrap();
        assert!(body.collection_set.is_none());
        assert!(body.error.unwrap().contains("x.Y"));
    }
}
