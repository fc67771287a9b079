//! Async SNMP v1/v2c session over UDP.

use std::net::SocketAddr;
use std::time::Duration;

use minion_api::dto::{SnmpAgentConfig, SnmpVersion};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, trace};

use crate::error::{Result, SnmpError};
use crate::pdu::{Message, MessagePdu, Oid, Pdu, PduType, VarBind, Version};

const MAX_DATAGRAM: usize = 65_535;
/// `noSuchName`, how v1 agents report the end of a walk.
const ERROR_NO_SUCH_NAME: i64 = 2;

/// A session bound to one agent.
pub struct SnmpSession {
    socket: UdpSocket,
    target: SocketAddr,
    version: Version,
    community: Vec<u8>,
    timeout: Duration,
    retries: u32,
    max_repetitions: u32,
}

impl SnmpSession {
    /// Resolves the agent and opens a connected UDP socket.
    pub async fn connect(agent: &SnmpAgentConfig) -> Result<Self> {
        let version = match agent.version {
            SnmpVersion::V1 => Version::V1,
            SnmpVersion::V2c => Version::V2c,
            SnmpVersion::V3 => return Err(SnmpError::UnsupportedVersion(3)),
        };
        let target = tokio::net::lookup_host((agent.address.as_str(), agent.port))
            .await?
            .next()
            .ok_or_else(|| {
                SnmpError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("cannot resolve {}", agent.address),
                ))
            })?;
        let bind: SocketAddr = if target.is_ipv4() {
            "0.0.0.0:0".parse().map_err(|_| SnmpError::malformed("bind address"))?
        } else {
            "[::]:0".parse().map_err(|_| SnmpError::malformed("bind address"))?
        };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;
        debug!(agent = %target, version = version.as_str(), "Opened SNMP session");
        Ok(Self {
            socket,
            target,
            version,
            community: agent.read_community.as_bytes().to_vec(),
            timeout: agent.timeout(),
            retries: agent.retries,
            max_repetitions: agent.max_repetitions.max(1),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// Sends `pdu` and waits for the matching response, retrying on timeout.
    async fn request(&self, mut pdu: Pdu) -> Result<Pdu> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        for attempt in 0..=self.retries {
            pdu.request_id = rand::random::<i32>() & 0x7fff_ffff;
            let request_id = pdu.request_id;
            let bytes = Message::new(self.version, self.community.clone(), pdu.clone()).encode()?;
            self.socket.send(&bytes).await?;
            trace!(agent = %self.target, attempt, request_id, "Sent SNMP request");

            let deadline = Instant::now() + self.timeout;
            loop {
                let n = match timeout_at(deadline, self.socket.recv(&mut buf)).await {
                    Ok(res) => res?,
                    Err(_) => break,
                };
                let msg = match Message::decode(&buf[..n]) {
                    Ok(m) => m,
                    Err(e) => {
                        debug!(agent = %self.target, error = %e, "Discarding undecodable response");
                        continue;
                    }
                };
                if let MessagePdu::Pdu(resp) = msg.pdu {
                    if resp.pdu_type == PduType::Response && resp.request_id == request_id {
                        return Ok(resp);
                    }
                }
            }
        }
        Err(SnmpError::Timeout(self.target.to_string()))
    }

    pub async fn get(&self, oids: &[Oid]) -> Result<Vec<VarBind>> {
        let pdu = Pdu::new(
            PduType::GetRequest,
            0,
            oids.iter().cloned().map(VarBind::null).collect(),
        );
        let resp = self.request(pdu).await?;
        if resp.error_status != 0 {
            return Err(SnmpError::AgentError {
                status: resp.error_status,
                index: resp.error_index,
            });
        }
        Ok(resp.varbinds)
    }

    /// Walks the subtree under `root`, returning varbinds in agent order.
    pub async fn walk(&self, root: &Oid, max_repetitions: Option<u32>) -> Result<Vec<VarBind>> {
        let max_reps = max_repetitions.unwrap_or(self.max_repetitions).max(1);
        let mut results = Vec::new();
        let mut current = root.clone();
        loop {
            let pdu = match self.version {
                Version::V1 => Pdu::new(
                    PduType::GetNextRequest,
                    0,
                    vec![VarBind::null(current.clone())],
                ),
                Version::V2c => {
                    Pdu::get_bulk(0, 0, i64::from(max_reps), std::slice::from_ref(&current))
                }
            };
            let resp = self.request(pdu).await?;
            if resp.error_status == ERROR_NO_SUCH_NAME && self.version == Version::V1 {
                return Ok(results);
            }
            if resp.error_status != 0 {
                return Err(SnmpError::AgentError {
                    status: resp.error_status,
                    index: resp.error_index,
                });
            }
            if resp.varbinds.is_empty() {
                return Ok(results);
            }
            for vb in resp.varbinds {
                if vb.value.is_exception() || !vb.oid.is_descendant_of(root) || vb.oid <= current {
                    return Ok(results);
                }
                current = vb.oid.clone();
                results.push(vb);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::Value;

    /// Answers GetNext/GetBulk from a sorted table.
    async fn fake_agent(table: Vec<(Oid, Value)>) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (n, peer) = socket.recv_from(&mut buf).await.unwrap();
                let msg = Message::decode(&buf[..n]).unwrap();
                let MessagePdu::Pdu(req) = msg.pdu else { continue };
                let varbinds = match req.pdu_type {
                    PduType::GetRequest => req
                        .varbinds
                        .iter()
                        .map(|vb| {
                            let value = table
                                .iter()
                                .find(|(o, _)| *o == vb.oid)
                                .map(|(_, v)| v.clone())
                                .unwrap_or(Value::NoSuchInstance);
                            VarBind::new(vb.oid.clone(), value)
                        })
                        .collect(),
                    PduType::GetNextRequest | PduType::GetBulkRequest => {
                        let count = if req.pdu_type == PduType::GetBulkRequest {
                            req.error_index as usize
                        } else {
                            1
                        };
                        let start = &req.varbinds[0].oid;
                        let mut out: Vec<VarBind> = table
                            .iter()
                            .filter(|(o, _)| o > start)
                            .take(count)
                            .map(|(o, v)| VarBind::new(o.clone(), v.clone()))
                            .collect();
                        if out.is_empty() {
                            out.push(VarBind::new(start.clone(), Value::EndOfMibView));
                        }
                        out
                    }
                    _ => continue,
                };
                let resp = Message::new(
                    msg.version,
                    msg.community,
                    Pdu::new(PduType::Response, req.request_id, varbinds),
                );
                socket.send_to(&resp.encode().unwrap(), peer).await.unwrap();
            }
        });
        addr
    }

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn agent(addr: SocketAddr, version: SnmpVersion) -> SnmpAgentConfig {
        SnmpAgentConfig {
            address: addr.ip().to_string(),
            port: addr.port(),
            timeout: 500,
            retries: 0,
            version,
            ..Default::default()
        }
    }

    fn table() -> Vec<(Oid, Value)> {
        vec![
            (oid(".1.3.6.1.2.1.1.1.0"), Value::OctetString(b"descr".to_vec())),
            (oid(".1.3.6.1.2.1.2.2.1.1.1"), Value::Integer(1)),
            (oid(".1.3.6.1.2.1.2.2.1.1.2"), Value::Integer(2)),
            (oid(".1.3.6.1.2.1.2.2.1.1.3"), Value::Integer(3)),
            (oid(".1.3.6.1.2.1.2.2.1.2.1"), Value::OctetString(b"eth0".to_vec())),
        ]
    }

    #[tokio::test]
    async fn test_get() {
        let addr = fake_agent(table()).await;
        let session = SnmpSession::connect(&agent(addr, SnmpVersion::V2c)).await.unwrap();
        let vbs = session.get(&[oid(".1.3.6.1.2.1.1.1.0")]).await.unwrap();
        assert_eq!(vbs.len(), 1);
        assert_eq!(vbs[0].value, Value::OctetString(b"descr".to_vec()));
    }

    #[tokio::test]
    async fn test_bulk_walk_stays_in_subtree() {
        let addr = fake_agent(table()).await;
        let session = SnmpSession::connect(&agent(addr, SnmpVersion::V2c)).await.unwrap();
        let vbs = session.walk(&oid(".1.3.6.1.2.1.2.2.1.1"), Some(2)).await.unwrap();
        let values: Vec<Value> = vbs.into_iter().map(|vb| vb.value).collect();
        assert_eq!(values, vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]);
    }

    #[tokio::test]
    async fn test_v1_walk() {
        let addr = fake_agent(table()).await;
        let session = SnmpSession::connect(&agent(addr, SnmpVersion::V1)).await.unwrap();
        let vbs = session.walk(&oid(".1.3.6.1.2.1.2.2.1.2"), None).await.unwrap();
        assert_eq!(vbs.len(), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let mut config = agent(silent.local_addr().unwrap(), SnmpVersion::V2c);
        config.timeout = 50;
        let session = SnmpSession::connect(&config).await.unwrap();
        let err = session.get(&[oid(".1.3.6.1.2.1.1.1.0")]).await.unwrap_err();
        assert!(matches!(err, SnmpError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_v3_rejected() {
        let config = SnmpAgentConfig {
            version: SnmpVersion::V3,
            ..Default::default()
        };
        assert!(matches!(
            SnmpSession::connect(&config).await,
            Err(SnmpError::UnsupportedVersion(3))
        ));
    }
}
