//! Routing of inbound RPC requests to registered modules.

use std::sync::Arc;

use async_trait::async_trait;
use minion_api::{Registry, RpcModule, RpcRequest, RpcResponse};
use opentelemetry::trace::SpanKind;
use opentelemetry::KeyValue;
use tracing::{debug, warn};

use crate::error::Result;
use crate::metrics::BrokerMetrics;
use crate::propagation;

/// Where a transport writes responses for requests it dispatched.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    async fn respond(&self, response: RpcResponse) -> Result<()>;
}

/// Looks up the module for each request and runs it on its own task.
pub struct Dispatcher {
    registry: &'static Registry<dyn RpcModule>,
    metrics: Arc<BrokerMetrics>,
}

impl Dispatcher {
    pub fn new(registry: &'static Registry<dyn RpcModule>, metrics: Arc<BrokerMetrics>) -> Self {
        Self { registry, metrics }
    }

    /// Dispatches `request` without waiting for the module to finish.
    ///
    /// Requests are accepted in the order the transport delivers them; the
    /// responses are written whenever their module completes.
    pub fn dispatch(&self, request: RpcRequest, responder: Arc<dyn Responder>) {
        let module_id = request.module_id.clone();
        if request.is_expired() {
            debug!(
                rpc_id = %request.rpc_id,
                module = %module_id,
                "Request deadline already passed on arrival"
            );
        }
        let Some(module) = self.registry.lookup(&module_id) else {
            warn!(rpc_id = %request.rpc_id, module = %module_id, "No RPC module registered");
            self.metrics.record_rpc_processed(&module_id, false);
            return;
        };
        self.metrics.record_rpc_received(&module_id, true);

        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            let parent = propagation::extract(&request.tracing_info);
            let cx = propagation::start_span(
                module_id.clone(),
                SpanKind::Consumer,
                &parent,
                vec![KeyValue::new("rpc_id", request.rpc_id.clone())],
            );
            let routing = RpcRequest {
                rpc_id: request.rpc_id.clone(),
                module_id: request.module_id.clone(),
                system_id: request.system_id.clone(),
                location: request.location.clone(),
                ..Default::default()
            };

            let response = module
                .execute(request)
                .await
                .filter(|response| !response.content.is_empty());
            let Some(mut response) = response else {
                warn!(rpc_id = %routing.rpc_id, module = %module_id, "Module produced no response");
                metrics.record_rpc_processed(&module_id, false);
                propagation::mark_failed(&cx, "no response");
                propagation::end(&cx);
                return;
            };
            response.route_to(&routing);
            propagation::inject(&cx, &mut response.tracing_info);
            metrics.record_rpc_processed(&module_id, true);

            let rpc_id = response.rpc_id.clone();
            match responder.respond(response).await {
                Ok(()) => {
                    debug!(rpc_id = %rpc_id, module = %module_id, "Sent RPC response");
                    metrics.record_response_sent(&module_id, true);
                }
                Err(e) => {
                    warn!(rpc_id = %rpc_id, module = %module_id, error = %e, "Failed to send RPC response");
                    metrics.record_response_sent(&module_id, false);
                    propagation::mark_failed(&cx, &e.to_string());
                }
            }
            propagation::end(&cx);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minion_api::module::Identified;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Upper;

    impl Identified for Upper {
        fn id(&self) -> &str {
            "Upper"
        }
    }

    #[async_trait]
    impl RpcModule for Upper {
        async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
            let body = request.content_str().to_uppercase();
            // Routing is filled in by the dispatcher.
            Some(RpcResponse {
                content: body.into_bytes(),
                ..Default::default()
            })
        }
    }

    struct Silent;

    impl Identified for Silent {
        fn id(&self) -> &str {
            "Silent"
        }
    }

    #[async_trait]
    impl RpcModule for Silent {
        async fn execute(&self, _request: RpcRequest) -> Option<RpcResponse> {
            None
        }
    }

    struct ChannelResponder(mpsc::UnboundedSender<RpcResponse>);

    #[async_trait]
    impl Responder for ChannelResponder {
        async fn respond(&self, response: RpcResponse) -> Result<()> {
            self.0
                .send(response)
                .map_err(|_| crate::BrokerError::NotConnected("rpc"))
        }
    }

    fn setup() -> (Dispatcher, Arc<BrokerMetrics>, Arc<dyn Responder>, mpsc::UnboundedReceiver<RpcResponse>) {
        let registry: &'static Registry<dyn RpcModule> = Box::leak(Box::new(Registry::new("rpc")));
        registry.register(Arc::new(Upper));
        registry.register(Arc::new(Silent));
        let metrics = Arc::new(BrokerMetrics::new("minion-1").unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Dispatcher::new(registry, Arc::clone(&metrics)),
            metrics,
            Arc::new(ChannelResponder(tx)),
            rx,
        )
    }

    fn request(module: &str, body: &str) -> RpcRequest {
        RpcRequest {
            rpc_id: "r-1".into(),
            module_id: module.into(),
            system_id: "minion-1".into(),
            location: "Remote".into(),
            content: body.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    async fn assert_no_response(rx: &mut mpsc::UnboundedReceiver<RpcResponse>) {
        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(!matches!(received, Ok(Some(_))));
    }

    #[tokio::test]
    async fn test_response_is_routed_back() {
        let (dispatcher, metrics, responder, mut rx) = setup();
        dispatcher.dispatch(request("Upper", "abc"), responder);
        let response = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.rpc_id, "r-1");
        assert_eq!(response.module_id, "Upper");
        assert_eq!(response.system_id, "minion-1");
        assert_eq!(response.location, "Remote");
        assert_eq!(response.content, b"ABC");
        assert_eq!(metrics.value(&metrics.rpc_received_succeeded, "Upper"), 1);
        assert_eq!(metrics.value(&metrics.rpc_processed_succeeded, "Upper"), 1);
    }

    #[tokio::test]
    async fn test_unknown_module_is_dropped() {
        let (dispatcher, metrics, responder, mut rx) = setup();
        dispatcher.dispatch(request("Nope", "x"), responder);
        assert_no_response(&mut rx).await;
        assert_eq!(metrics.value(&metrics.rpc_processed_failed, "Nope"), 1);
        assert_eq!(metrics.value(&metrics.rpc_received_succeeded, "Nope"), 0);
    }

    #[tokio::test]
    async fn test_no_response_counts_failure() {
        let (dispatcher, metrics, responder, mut rx) = setup();
        dispatcher.dispatch(request("Silent", "x"), responder);
        assert_no_response(&mut rx).await;
        assert_eq!(metrics.value(&metrics.rpc_received_succeeded, "Silent"), 1);
        assert_eq!(metrics.value(&metrics.rpc_processed_failed, "Silent"), 1);
    }

    #[tokio::test]
    async fn test_expired_request_is_still_answered() {
        let (dispatcher, metrics, responder, mut rx) = setup();
        let mut req = request("Upper", "late");
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap();
        req.expiration_time = now.as_millis() as u64 - 50;
        assert!(req.is_expired());
        dispatcher.dispatch(req, responder);
        let response = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.rpc_id, "r-1");
        assert_eq!(response.content, b"LATE");
        assert_eq!(metrics.value(&metrics.rpc_received_succeeded, "Upper"), 1);
        assert_eq!(metrics.value(&metrics.rpc_received_failed, "Upper"), 0);
    }

    #[tokio::test]
    async fn test_empty_response_is_not_sent() {
        let (dispatcher, metrics, responder, mut rx) = setup();
        // Upper echoes the body, so an empty body yields empty content.
        dispatcher.dispatch(request("Upper", ""), responder);
        assert_no_response(&mut rx).await;
        assert_eq!(metrics.value(&metrics.rpc_processed_failed, "Upper"), 1);
        assert_eq!(metrics.value(&metrics.rpc_processed_succeeded, "Upper"), 0);
    }
}
