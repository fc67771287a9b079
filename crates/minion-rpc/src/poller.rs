//! `Poller` RPC module. Dispatches poll requests to the registered service
//! monitors.

use async_trait::async_trait;
use minion_api::dto::{PollStatus, PollerRequest, PollerResponse};
use minion_api::{
    FromXml, Identified, Registry, RpcModule, RpcRequest, RpcResponse, ServiceMonitor, MONITORS,
};
use tracing::debug;

use crate::reply;

pub const POLLER_MODULE_ID: &str = "Poller";

/// Runs the monitor named by the request's class name.
pub struct PollerRpcModule {
    monitors: &'static Registry<dyn ServiceMonitor>,
}

impl PollerRpcModule {
    /// Looks monitors up in `monitors`; production passes [`MONITORS`].
    pub fn new(monitors: &'static Registry<dyn ServiceMonitor>) -> Self {
        Self { monitors }
    }
}

impl Default for PollerRpcModule {
    fn default() -> Self {
        Self::new(&MONITORS)
    }
}

impl Identified for PollerRpcModule {
    fn id(&self) -> &str {
        POLLER_MODULE_ID
    }
}

#[async_trait]
impl RpcModule for PollerRpcModule {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let poll = match PollerRequest::from_xml_bytes(&request.content) {
            Ok(p) => p,
            Err(e) => {
                return reply(
                    &request,
                    &PollerResponse {
                        status: PollStatus::unknown(e.to_string()),
                    },
                )
            }
        };
        let status = match self.monitors.lookup(&poll.class_name) {
            None => PollStatus::unknown(format!(
                "No monitor found with class name '{}'",
                poll.class_name
            )),
            Some(monitor) => {
                let timeout = request.get_timeout();
                match tokio::time::timeout(timeout, monitor.poll(&poll)).await {
                    Ok(status) => status,
                    Err(_) => PollStatus::unresponsive(format!("Poll timed out after {timeout:?}")),
                }
            }
        };
        debug!(
            class = %poll.class_name,
            service = %poll.service_name,
            address = %poll.address,
            status = %status.code,
            "Poll done"
        );
        reply(&request, &PollerResponse { status })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use minion_api::dto::PollStatusCode;
    use pretty_assertions::assert_eq;

    struct AlwaysUp;

    impl Identified for AlwaysUp {
        fn id(&self) -> &str {
            "test.AlwaysUp"
        }
    }

    #[async_trait]
    impl ServiceMonitor for AlwaysUp {
        async fn poll(&self, _request: &PollerRequest) -> PollStatus {
            PollStatus::up(Duration::from_millis(3))
        }
    }

    fn module() -> PollerRpcModule {
        let registry: &'static Registry<dyn ServiceMonitor> =
            Box::leak(Box::new(Registry::new("monitor")));
        registry.register(Arc::new(AlwaysUp));
        PollerRpcModule::new(registry)
    }

    fn request(class_name: &str) -> RpcRequest {
        RpcRequest {
            rpc_id: "p".into(),
            module_id: POLLER_MODULE_ID.into(),
            content: format!(
                r#"<poller-request class-name="{class_name}" service-name="ICMP" address="10.0.0.1"/>"#
            )
            .into_bytes(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_poll() {
        let response = module().execute(request("test.AlwaysUp")).await.unwrap();
        let body = PollerResponse::from_xml_bytes(&response.content).unwrap();
        assert_eq!(body.status.code, PollStatusCode::Up);
        assert_eq!(body.status.response_time, Some(3.0));
    }

    #[tokio::test]
    async fn test_unknown_class_is_unknown_status() {
        let response = module().execute(request("missing")).await.unwrap();
        let body = PollerResponse::from_xml_bytes(&response.content).unwrap();
        assert_eq!(body.status.code, PollStatusCode::Unknown);
        assert!(body.status.reason.unwrap().contains("missing"));
    }
}
