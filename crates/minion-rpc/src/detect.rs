use async_trait::async_trait;
use minion_api::dto::{DetectorRequest, DetectorResponse};
use minion_api::{
    FromXml, Identified, Registry, RpcModule, RpcRequest, RpcResponse, ServiceDetector, DETECTORS,
};
use tracing::debug;

use crate::reply;

pub const DETECT_MODULE_ID: &str = "Detect";

/// Runs the detector named by the request's class name.
pub struct DetectRpcModule {
    detectors: &'static Registry<dyn ServiceDetector>,
}

impl DetectRpcModule {
    pub fn new(detectors: &'static Registry<dyn ServiceDetector>) -> Self {
        Self { detectors }
    }
}

impl Default for DetectRpcModule {
    fn default() -> Self {
        Self::new(&DETECTORS)
    }
}

impl Identified for DetectRpcModule {
    fn id(&self) -> &str {
        DETECT_MODULE_ID
    }
}

#[async_trait]
impl RpcModule for DetectRpcModule {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let detect = match DetectorRequest::from_xml_bytes(&request.content) {
            Ok(d) => d,
            Err(e) => return reply(&request, &DetectorResponse::error(e.to_string())),
        };
        let Some(detector) = self.detectors.lookup(&detect.class_name) else {
            return reply(
                &request,
                &DetectorResponse::error(format!(
                    "No detector found with class name '{}'",
                    detect.class_name
                )),
            );
        };
        let timeout = request.get_timeout();
        let body = match tokio::time::timeout(timeout, detector.detect(&detect)).await {
            Ok(body) => body,
            Err(_) => DetectorResponse::error(format!("Detection timed out after {timeout:?}")),
        };
        debug!(
            class = %detect.class_name,
            address = %detect.address,
            detected = body.detected,
            "Detection done"
        );
        reply(&request, &body)
    }
}
