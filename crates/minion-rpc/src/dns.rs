use std::net::IpAddr;

use async_trait::async_trait;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use minion_api::dto::{DnsLookupRequest, DnsLookupResponse, QueryType};
use minion_api::{FromXml, Identified, RpcModule, RpcRequest, RpcResponse};
use tracing::{debug, warn};

use crate::error::{Result, RpcError};
use crate::reply;

pub const DNS_MODULE_ID: &str = "DNS";

/// Forward and reverse name lookups on behalf of the controller.
pub struct DnsRpcModule {
    resolver: TokioResolver,
}

impl DnsRpcModule {
    /// Uses the system resolver configuration, or the library defaults when
    /// it cannot be read.
    pub fn new() -> Self {
        let resolver = match TokioResolver::builder_tokio() {
            Ok(builder) => builder.build(),
            Err(e) => {
                warn!(error = %e, "Cannot read system resolver configuration, using defaults");
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            }
        };
        Self { resolver }
    }

    async fn resolve(&self, request: &DnsLookupRequest) -> Result<String> {
        let host = request.host_request.trim();
        match request.query_type {
            QueryType::Lookup => {
                if let Ok(ip) = host.parse::<IpAddr>() {
                    return Ok(ip.to_string());
                }
                let lookup = self.resolver.lookup_ip(host).await.map_err(RpcError::resolve)?;
                lookup
                    .iter()
                    .next()
                    .map(|ip| ip.to_string())
                    .ok_or_else(|| RpcError::resolve(format!("no address found for {host}")))
            }
            QueryType::ReverseLookup => {
                let ip: IpAddr = host
                    .parse()
                    .map_err(|_| RpcError::resolve(format!("'{host}' is not an IP address")))?;
                let names = self.resolver.reverse_lookup(ip).await.map_err(RpcError::resolve)?;
                names
                    .iter()
                    .next()
                    .map(|name| name.to_string().trim_end_matches('.').to_string())
                    .ok_or_else(|| RpcError::resolve(format!("no name found for {host}")))
            }
        }
    }
}

impl Default for DnsRpcModule {
    fn default() -> Self {
        Self::new()
    }
}

impl Identified for DnsRpcModule {
    fn id(&self) -> &str {
        DNS_MODULE_ID
    }
}

#[async_trait]
impl RpcModule for DnsRpcModule {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let lookup = match DnsLookupRequest::from_xml_bytes(&request.content) {
            Ok(lookup) => lookup,
            Err(e) => return reply(&request, &DnsLookupResponse::failure(e.to_string())),
        };
        let timeout = request.get_timeout();
        let body = match tokio::time::timeout(timeout, self.resolve(&lookup)).await {
            Ok(Ok(answer)) => {
                debug!(host = %lookup.host_request, answer = %answer, "Resolved");
                DnsLookupResponse::success(answer)
            }
            Ok(Err(e)) => DnsLookupResponse::failure(e.to_string()),
            Err(_) => DnsLookupResponse::failure(RpcError::Timeout(timeout).to_string()),
        };
        reply(&request, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(body: &str) -> RpcRequest {
        RpcRequest {
            rpc_id: "7".into(),
            module_id: DNS_MODULE_ID.into(),
            content: body.as_bytes().to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_literal_address_lookup() {
        let module = DnsRpcModule::new();
        let response = module
            .execute(request(
                r#"<dns-lookup-request location="L" system-id="S" host-request="192.0.2.7" query-type="LOOKUP"/>"#,
            ))
            .await
            .unwrap();
        let body = DnsLookupResponse::from_xml_bytes(&response.content).unwrap();
        assert_eq!(body.host_response.as_deref(), Some("192.0.2.7"));
        assert!(body.failure_message.is_none());
    }

    #[tokio::test]
    async fn test_reverse_lookup_of_non_address_fails() {
        let module = DnsRpcModule::new();
        let response = module
            .execute(request(
                r#"<dns-lookup-request host-request="not-an-ip" query-type="REVERSE_LOOKUP"/>"#,
            ))
            .await
            .unwrap();
        let body = DnsLookupResponse::from_xml_bytes(&response.content).unwrap();
        assert!(body.host_response.is_none());
        assert!(body.failure_message.unwrap().contains("not an IP address"));
    }
}
