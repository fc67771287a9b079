//! Trap and inform decoding into the payload sent to the controller.

use std::net::IpAddr;

use minion_api::dto::{SnmpResult, TrapDto, TrapIdentity};

use crate::error::{Result, SnmpError};
use crate::pdu::{Message, MessagePdu, Pdu, PduType, Value};

/// `sysUpTime.0`
pub const SYS_UP_TIME_OID: &str = ".1.3.6.1.2.1.1.3.0";
/// `snmpTrapOID.0`
pub const SNMP_TRAP_OID: &str = ".1.3.6.1.6.3.1.1.4.1.0";
/// `snmpTrapAddress.0`
pub const SNMP_TRAP_ADDRESS_OID: &str = ".1.3.6.1.6.3.18.1.3.0";

/// A decoded notification plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedTrap {
    pub dto: TrapDto,
    /// Address to report as the trap source; overridden by `snmpTrapAddress.0`.
    pub trap_address: String,
}

/// Decodes a trap datagram received from `source`.
pub fn decode_trap(bytes: &[u8], source: IpAddr, creation_time: i64) -> Result<ReceivedTrap> {
    let msg = Message::decode(bytes)?;
    let community = String::from_utf8_lossy(&msg.community).into_owned();
    let version = msg.version.as_str().to_string();

    match msg.pdu {
        MessagePdu::TrapV1(trap) => {
            let agent = trap.agent_addr.to_string();
            let results = trap
                .varbinds
                .iter()
                .map(|vb| SnmpResult::new(vb.oid.to_string(), "", vb.value.to_snmp_value()))
                .collect::<Vec<_>>();
            Ok(ReceivedTrap {
                dto: TrapDto {
                    agent_address: agent.clone(),
                    community,
                    version,
                    timestamp: u64::from(trap.timestamp),
                    pdu_length: trap.varbinds.len(),
                    creation_time,
                    trap_identity: TrapIdentity::new(
                        trap.enterprise.to_string(),
                        trap.generic_trap as i32,
                        trap.specific_trap as i32,
                    ),
                    results,
                },
                trap_address: agent,
            })
        }
        MessagePdu::Pdu(pdu)
            if matches!(pdu.pdu_type, PduType::TrapV2 | PduType::InformRequest) =>
        {
            let mut dto = TrapDto {
                agent_address: source.to_string(),
                community,
                version,
                pdu_length: pdu.varbinds.len(),
                creation_time,
                ..Default::default()
            };
            let mut trap_address = source.to_string();
            for vb in &pdu.varbinds {
                match (vb.oid.to_string().as_str(), &vb.value) {
                    (SYS_UP_TIME_OID, Value::TimeTicks(t)) => dto.timestamp = u64::from(*t),
                    (SYS_UP_TIME_OID, _) => {}
                    (SNMP_TRAP_OID, Value::ObjectIdentifier(oid)) => {
                        dto.trap_identity = TrapIdentity::from_trap_oid(&oid.to_string());
                    }
                    (SNMP_TRAP_OID, _) => {}
                    (SNMP_TRAP_ADDRESS_OID, Value::IpAddress(addr)) => {
                        trap_address = addr.to_string();
                    }
                    _ => dto.results.push(SnmpResult::new(
                        vb.oid.to_string(),
                        "",
                        vb.value.to_snmp_value(),
                    )),
                }
            }
            Ok(ReceivedTrap { dto, trap_address })
        }
        MessagePdu::Pdu(pdu) => Err(SnmpError::malformed(format!(
            "{:?} is not a notification",
            pdu.pdu_type
        ))),
    }
}

/// Builds the Response PDU acknowledging an inform, if `bytes` is one.
pub fn inform_ack(bytes: &[u8]) -> Result<Option<Vec<u8>>> {
    let msg = Message::decode(bytes)?;
    match msg.pdu {
        MessagePdu::Pdu(pdu) if pdu.pdu_type == PduType::InformRequest => {
            let ack = Message::new(
                msg.version,
                msg.community,
                Pdu::new(PduType::Response, pdu.request_id, pdu.varbinds),
            );
            Ok(Some(ack.encode()?))
        }
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdu::{Oid, TrapV1Pdu, VarBind, Version};
    use minion_api::dto::snmp::TYPE_OCTET_STRING;
    use pretty_assertions::assert_eq;
    use std::net::Ipv4Addr;

    fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    fn v2_trap(pdu_type: PduType, varbinds: Vec<VarBind>) -> Vec<u8> {
        Message::new(Version::V2c, "public", Pdu::new(pdu_type, 77, varbinds))
            .encode()
            .unwrap()
    }

    #[test]
    fn test_v2c_trap_identity() {
        let bytes = v2_trap(
            PduType::TrapV2,
            vec![
                VarBind::new(oid(SYS_UP_TIME_OID), Value::TimeTicks(4200)),
                VarBind::new(
                    oid(SNMP_TRAP_OID),
                    Value::ObjectIdentifier(oid(".1.3.6.1.4.1.9.1.10")),
                ),
                VarBind::new(oid(".1.3.6.1.2.1.2.2.1.1.3"), Value::Integer(3)),
            ],
        );
        let source: IpAddr = "192.0.2.7".parse().unwrap();
        let trap = decode_trap(&bytes, source, 1000).unwrap();

        assert_eq!(trap.dto.trap_identity.enterprise_id, ".1.3.6.1.4.1.9");
        assert_eq!(trap.dto.trap_identity.specific, 10);
        assert_eq!(trap.dto.trap_identity.generic, 6);
        assert_eq!(trap.dto.timestamp, 4200);
        assert_eq!(trap.dto.version, "v2c");
        assert_eq!(trap.dto.community, "public");
        assert_eq!(trap.dto.agent_address, "192.0.2.7");
        assert_eq!(trap.dto.pdu_length, 3);
        assert_eq!(trap.dto.results.len(), 1);
        assert_eq!(trap.dto.results[0].base, ".1.3.6.1.2.1.2.2.1.1.3");
        assert_eq!(trap.trap_address, "192.0.2.7");
    }

    #[test]
    fn test_trap_address_override() {
        let bytes = v2_trap(
            PduType::TrapV2,
            vec![
                VarBind::new(oid(SNMP_TRAP_OID), Value::ObjectIdentifier(oid(".1.3.6.1.6.3.1.1.5.3"))),
                VarBind::new(
                    oid(SNMP_TRAP_ADDRESS_OID),
                    Value::IpAddress(Ipv4Addr::new(10, 9, 8, 7)),
                ),
                VarBind::new(oid(".1.3.6.1.2.1.1.5.0"), Value::OctetString(b"sw1".to_vec())),
            ],
        );
        let trap = decode_trap(&bytes, "192.0.2.1".parse().unwrap(), 0).unwrap();
        assert_eq!(trap.trap_address, "10.9.8.7");
        assert_eq!(trap.dto.trap_identity.generic, 2);
        assert_eq!(trap.dto.results.len(), 1);
        assert_eq!(trap.dto.results[0].value.type_code, TYPE_OCTET_STRING);
    }

    #[test]
    fn test_v1_trap() {
        let msg = Message {
            version: Version::V1,
            community: b"public".to_vec(),
            pdu: MessagePdu::TrapV1(TrapV1Pdu {
                enterprise: oid(".1.3.6.1.4.1.9"),
                agent_addr: Ipv4Addr::new(10, 1, 1, 1),
                generic_trap: 6,
                specific_trap: 42,
                timestamp: 99,
                varbinds: vec![VarBind::new(oid(".1.3.6.1.4.1.9.2.1"), Value::Gauge32(5))],
            }),
        };
        let trap = decode_trap(&msg.encode().unwrap(), "192.0.2.1".parse().unwrap(), 0).unwrap();
        assert_eq!(trap.dto.version, "v1");
        assert_eq!(trap.dto.agent_address, "10.1.1.1");
        assert_eq!(trap.dto.trap_identity, TrapIdentity::new(".1.3.6.1.4.1.9", 6, 42));
        assert_eq!(trap.dto.timestamp, 99);
        assert_eq!(trap.dto.results.len(), 1);
    }

    #[test]
    fn test_inform_ack() {
        let inform = v2_trap(
            PduType::InformRequest,
            vec![VarBind::new(oid(SYS_UP_TIME_OID), Value::TimeTicks(1))],
        );
        let ack = inform_ack(&inform).unwrap().unwrap();
        let decoded = Message::decode(&ack).unwrap();
        match decoded.pdu {
            MessagePdu::Pdu(pdu) => {
                assert_eq!(pdu.pdu_type, PduType::Response);
                assert_eq!(pdu.request_id, 77);
            }
            other => panic!("unexpected pdu {other:?}"),
        }

        let trap = v2_trap(PduType::TrapV2, vec![]);
        assert!(inform_ack(&trap).unwrap().is_none());
    }

    #[test]
    fn test_get_request_is_not_a_trap() {
        let bytes = v2_trap(PduType::GetRequest, vec![]);
        assert!(decode_trap(&bytes, "192.0.2.1".parse().unwrap(), 0).is_err());
    }
}
