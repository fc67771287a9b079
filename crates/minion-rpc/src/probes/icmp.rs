use async_trait::async_trait;
use minion_api::dto::{DetectorRequest, DetectorResponse, PollStatus, PollerRequest};
use minion_api::{Identified, ServiceDetector, ServiceMonitor};

use super::{resolve_address, ICMP_DETECTOR, ICMP_MONITOR};
use crate::error::RpcError;
use crate::ping::ping;

const PACKET_SIZE: usize = 64;

#[derive(Debug, Default)]
pub struct IcmpDetector;

impl Identified for IcmpDetector {
    fn id(&self) -> &str {
        ICMP_DETECTOR
    }
}

#[async_trait]
impl ServiceDetector for IcmpDetector {
    async fn detect(&self, request: &DetectorRequest) -> DetectorResponse {
        let ip = match resolve_address(&request.address).await {
            Ok(ip) => ip,
            Err(e) => return DetectorResponse::error(e.to_string()),
        };
        match ping(ip, request.retries(), request.timeout(), PACKET_SIZE, 0).await {
            Ok(_) => DetectorResponse::detected(true),
            Err(RpcError::Timeout(_)) => DetectorResponse::detected(false),
            Err(e) => DetectorResponse::error(e.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct IcmpMonitor;

impl Identified for IcmpMonitor {
    fn id(&self) -> &str {
        ICMP_MONITOR
    }
}

#[async_trait]
impl ServiceMonitor for IcmpMonitor {
    async fn poll(&self, request: &PollerRequest) -> PollStatus {
        let ip = match resolve_address(&request.address).await {
            Ok(ip) => ip,
            Err(e) => return PollStatus::down(e.to_string()),
        };
        let dscp = request.get_attribute_value_as_int("dscp", 0).clamp(0, 255) as u8;
        match ping(ip, request.retries(), request.timeout(), PACKET_SIZE, dscp).await {
            Ok(rtt) => PollStatus::up(rtt),
            Err(RpcError::Timeout(_)) => PollStatus::down("ICMP echo timed out"),
            Err(e) => PollStatus::unknown(e.to_string()),
        }
    }
}
