//! The `SNMP` module: walks and gets against one agent per request.

use async_trait::async_trait;
use minion_api::dto::{SnmpMultiResponse, SnmpRequest, SnmpResponse, SnmpResult};
use minion_api::{FromXml, Identified, RpcModule, RpcRequest, RpcResponse};
use minion_snmp::{Oid, SnmpError, SnmpSession};
use tracing::{debug, warn};

use crate::error::{Result, RpcError};
use crate::reply;

pub const SNMP_MODULE_ID: &str = "SNMP";

#[derive(Debug, Default)]
pub struct SnmpRpcModule;

fn parse_oids(texts: &[String]) -> std::result::Result<Vec<Oid>, SnmpError> {
    texts.iter().map(|t| t.parse::<Oid>()).collect()
}

/// Runs every walk, then every get, in request order.
async fn collect(request: &SnmpRequest) -> Result<Vec<SnmpMultiResponse>> {
    let session = SnmpSession::connect(&request.agent).await?;
    let mut responses = Vec::with_capacity(request.walks.len() + request.gets.len());

    for walk in &request.walks {
        let mut results = Vec::new();
        for root in parse_oids(&walk.oids)? {
            match &walk.instance {
                // A walk pinned to one instance is a plain get of root.instance.
                Some(instance) => {
                    let target: Oid = format!("{root}.{instance}").parse()?;
                    for vb in session.get(std::slice::from_ref(&target)).await? {
                        if !vb.value.is_exception() {
                            results.push(SnmpResult::new(
                                root.to_string(),
                                instance.clone(),
                                vb.value.to_snmp_value(),
                            ));
                        }
                    }
                }
                None => {
                    for vb in session.walk(&root, walk.max_repetitions).await? {
                        results.push(SnmpResult::new(
                            root.to_string(),
                            vb.oid.instance_after(&root),
                            vb.value.to_snmp_value(),
                        ));
                    }
                }
            }
        }
        debug!(correlation_id = %walk.correlation_id, results = results.len(), "Walk done");
        responses.push(SnmpMultiResponse {
            correlation_id: walk.correlation_id.clone(),
            results,
        });
    }

    let batch = request.agent.max_vars_per_pdu.max(1) as usize;
    for get in &request.gets {
        let oids = parse_oids(&get.oids)?;
        let mut results = Vec::with_capacity(oids.len());
        for chunk in oids.chunks(batch) {
            for vb in session.get(chunk).await? {
                results.push(SnmpResult::new(
                    vb.oid.to_string(),
                    "",
                    vb.value.to_snmp_value(),
                ));
            }
        }
        responses.push(SnmpMultiResponse {
            correlation_id: get.correlation_id.clone(),
            results,
        });
    }
    Ok(responses)
}

impl Identified for SnmpRpcModule {
    fn id(&self) -> &str {
        SNMP_MODULE_ID
    }
}

#[async_trait]
impl RpcModule for SnmpRpcModule {
    async fn execute(&self, request: RpcRequest) -> Option<RpcResponse> {
        let snmp_request = match SnmpRequest::from_xml_bytes(&request.content) {
            Ok(r) => r,
            Err(e) => {
                return reply(
                    &request,
                    &SnmpResponse {
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                )
            }
        };
        let timeout = request.get_timeout();
        let outcome = match tokio::time::timeout(timeout, collect(&snmp_request)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout(timeout)),
        };
        let body = match outcome {
            Ok(responses) => SnmpResponse {
                responses,
                error: None,
            },
            Err(e) => {
                warn!(agent = %snmp_request.agent.address, error = %e, "SNMP request failed");
                SnmpResponse {
                    responses: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        reply(&request, &body)
    }
}
