//! `Echo` RPC module, used by the controller to check that a minion is
//! reachable and to measure round trips.

use std::time::Duration;

use async_trait::async_trait;
use minion_api::dto::{EchoRequest, EchoResponse};
use minion_api::{FromXml, Identified, RpcModule, RpcRequest, RpcResponse};

use crate::reply;

pub const ECHO_MODULE_ID: &str = "Echo";

/// Answers with the request's id, message and body, optionally after a delay
/// or with an error.
#[derive(Debug, Default)]
pub struct EchoRpcModule;

impl Identified for EchoRpcModule {
    fn id(&self) -> &str {
        ECHO_MODULE_ID
    }
}

#[async_trait]
impl RpcModule for EchoRpcModule {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let echo = match EchoRequest::from_xml_bytes(&request.content) {
            Ok(echo) => echo,
            Err(e) => return reply(&request, &EchoResponse::error(0, e.to_string())),
        };
        if let Some(delay) = echo.delay {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        let body = if echo.throw {
            EchoResponse::error(echo.id, echo.message.clone())
        } else {
            EchoResponse::from_request(&echo)
        };
        reply(&request, &body)
    }
}
