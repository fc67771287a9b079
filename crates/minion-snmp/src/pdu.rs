//! SNMP v1/v2c messages and PDUs.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use minion_api::dto::snmp::{self as dto, SnmpValue};

use crate::ber::{self, Reader};
use crate::error::{Result, SnmpError};

/// An object identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(subids: Vec<u32>) -> Self {
        Self(subids)
    }

    pub fn subids(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` lies strictly below `root`.
    pub fn is_descendant_of(&self, root: &Oid) -> bool {
        self.0.len() > root.0.len() && self.0.starts_with(&root.0)
    }

    /// The sub-identifiers after `root`, in `a.b` form.
    pub fn instance_after(&self, root: &Oid) -> String {
        if !self.0.starts_with(&root.0) {
            return String::new();
        }
        self.0[root.0.len()..]
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for id in &self.0 {
            write!(f, ".{id}")?;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Err(SnmpError::InvalidOid(s.to_string()));
        }
        trimmed
            .split('.')
            .map(|p| p.parse::<u32>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map(Oid)
            .map_err(|_| SnmpError::InvalidOid(s.to_string()))
    }
}

/// A varbind value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Oid),
    IpAddress(Ipv4Addr),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl Value {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            Value::Integer(v) => ber::write_tlv(out, ber::TAG_INTEGER, &ber::encode_signed(*v)),
            Value::OctetString(b) => ber::write_tlv(out, ber::TAG_OCTET_STRING, b),
            Value::Null => ber::write_tlv(out, ber::TAG_NULL, &[]),
            Value::ObjectIdentifier(oid) => {
                ber::write_tlv(out, ber::TAG_OID, &ber::encode_oid(oid.subids())?)
            }
            Value::IpAddress(a) => ber::write_tlv(out, ber::TAG_IPADDRESS, &a.octets()),
            Value::Counter32(v) => {
                ber::write_tlv(out, ber::TAG_COUNTER32, &ber::encode_unsigned(u64::from(*v)))
            }
            Value::Gauge32(v) => {
                ber::write_tlv(out, ber::TAG_GAUGE32, &ber::encode_unsigned(u64::from(*v)))
            }
            Value::TimeTicks(v) => {
                ber::write_tlv(out, ber::TAG_TIMETICKS, &ber::encode_unsigned(u64::from(*v)))
            }
            Value::Opaque(b) => ber::write_tlv(out, ber::TAG_OPAQUE, b),
            Value::Counter64(v) => ber::write_tlv(out, ber::TAG_COUNTER64, &ber::encode_unsigned(*v)),
            Value::NoSuchObject => ber::write_tlv(out, ber::TAG_NO_SUCH_OBJECT, &[]),
            Value::NoSuchInstance => ber::write_tlv(out, ber::TAG_NO_SUCH_INSTANCE, &[]),
            Value::EndOfMibView => ber::write_tlv(out, ber::TAG_END_OF_MIB_VIEW, &[]),
        }
        Ok(())
    }

    fn decode(tag: u8, content: &[u8]) -> Result<Self> {
        let u32_of = |c: &[u8]| -> Result<u32> {
            u32::try_from(ber::decode_unsigned(c)?)
                .map_err(|_| SnmpError::malformed("32-bit value out of range"))
        };
        Ok(match tag {
            ber::TAG_INTEGER => Value::Integer(ber::decode_signed(content)?),
            ber::TAG_OCTET_STRING => Value::OctetString(content.to_vec()),
            ber::TAG_NULL => Value::Null,
            ber::TAG_OID => Value::ObjectIdentifier(Oid(ber::decode_oid(content)?)),
            ber::TAG_IPADDRESS => {
                let octets: [u8; 4] = content
                    .try_into()
                    .map_err(|_| SnmpError::malformed("IpAddress must be 4 octets"))?;
                Value::IpAddress(Ipv4Addr::from(octets))
            }
            ber::TAG_COUNTER32 => Value::Counter32(u32_of(content)?),
            ber::TAG_GAUGE32 => Value::Gauge32(u32_of(content)?),
            ber::TAG_TIMETICKS => Value::TimeTicks(u32_of(content)?),
            ber::TAG_OPAQUE => Value::Opaque(content.to_vec()),
            ber::TAG_COUNTER64 => Value::Counter64(ber::decode_unsigned(content)?),
            ber::TAG_NO_SUCH_OBJECT => Value::NoSuchObject,
            ber::TAG_NO_SUCH_INSTANCE => Value::NoSuchInstance,
            ber::TAG_END_OF_MIB_VIEW => Value::EndOfMibView,
            other => {
                return Err(SnmpError::UnexpectedTag {
                    expected: "SNMP value",
                    found: other,
                })
            }
        })
    }

    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
        )
    }

    /// Converts to the payload form sent to the controller.
    pub fn to_snmp_value(&self) -> SnmpValue {
        match self {
            Value::Integer(v) => SnmpValue::new(dto::TYPE_INTEGER, dto::encode_bigint_signed(*v)),
            Value::OctetString(b) => SnmpValue::octet_string(b.clone()),
            Value::Null => SnmpValue::null(dto::TYPE_NULL),
            Value::ObjectIdentifier(oid) => SnmpValue::oid(&oid.to_string()),
            Value::IpAddress(a) => SnmpValue::ip_address(*a),
            Value::Counter32(v) => SnmpValue::unsigned(dto::TYPE_COUNTER32, u64::from(*v)),
            Value::Gauge32(v) => SnmpValue::unsigned(dto::TYPE_GAUGE32, u64::from(*v)),
            Value::TimeTicks(v) => SnmpValue::unsigned(dto::TYPE_TIMETICKS, u64::from(*v)),
            Value::Opaque(b) => SnmpValue::new(dto::TYPE_OPAQUE, b.clone()),
            Value::Counter64(v) => SnmpValue::unsigned(dto::TYPE_COUNTER64, *v),
            Value::NoSuchObject => SnmpValue::null(dto::TYPE_NO_SUCH_OBJECT),
            Value::NoSuchInstance => SnmpValue::null(dto::TYPE_NO_SUCH_INSTANCE),
            Value::EndOfMibView => SnmpValue::null(dto::TYPE_END_OF_MIB),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarBind {
    pub oid: Oid,
    pub value: Value,
}

impl VarBind {
    pub fn new(oid: Oid, value: Value) -> Self {
        Self { oid, value }
    }

    pub fn null(oid: Oid) -> Self {
        Self::new(oid, Value::Null)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    Response,
    SetRequest,
    GetBulkRequest,
    InformRequest,
    TrapV2,
    Report,
}

impl PduType {
    pub fn tag(&self) -> u8 {
        match self {
            Self::GetRequest => 0xa0,
            Self::GetNextRequest => 0xa1,
            Self::Response => 0xa2,
            Self::SetRequest => 0xa3,
            Self::GetBulkRequest => 0xa5,
            Self::InformRequest => 0xa6,
            Self::TrapV2 => 0xa7,
            Self::Report => 0xa8,
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            0xa0 => Self::GetRequest,
            0xa1 => Self::GetNextRequest,
            0xa2 => Self::Response,
            0xa3 => Self::SetRequest,
            0xa5 => Self::GetBulkRequest,
            0xa6 => Self::InformRequest,
            0xa7 => Self::TrapV2,
            0xa8 => Self::Report,
            _ => return None,
        })
    }
}

const TAG_TRAP_V1: u8 = 0xa4;

/// A request/response style PDU. For GetBulk, `error_status` and
/// `error_index` carry non-repeaters and max-repetitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<VarBind>,
}

impl Pdu {
    pub fn new(pdu_type: PduType, request_id: i32, varbinds: Vec<VarBind>) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds,
        }
    }

    pub fn get_bulk(request_id: i32, non_repeaters: i64, max_repetitions: i64, oids: &[Oid]) -> Self {
        Self {
            pdu_type: PduType::GetBulkRequest,
            request_id,
            error_status: non_repeaters,
            error_index: max_repetitions,
            varbinds: oids.iter().cloned().map(VarBind::null).collect(),
        }
    }
}

/// SNMPv1 Trap-PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrapV1Pdu {
    pub enterprise: Oid,
    pub agent_addr: Ipv4Addr,
    pub generic_trap: i64,
    pub specific_trap: i64,
    pub timestamp: u32,
    pub varbinds: Vec<VarBind>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessagePdu {
    Pdu(Pdu),
    TrapV1(TrapV1Pdu),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    V1,
    V2c,
}

impl Version {
    fn wire(&self) -> i64 {
        match self {
            Self::V1 => 0,
            Self::V2c => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V1 => "v1",
            Self::V2c => "v2c",
        }
    }
}

/// A community-based SNMP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: Version,
    pub community: Vec<u8>,
    pub pdu: MessagePdu,
}

fn encode_varbinds(varbinds: &[VarBind], out: &mut Vec<u8>) -> Result<()> {
    let mut list = Vec::new();
    for vb in varbinds {
        let mut inner = Vec::new();
        ber::write_tlv(&mut inner, ber::TAG_OID, &ber::encode_oid(vb.oid.subids())?);
        vb.value.encode(&mut inner)?;
        ber::write_tlv(&mut list, ber::TAG_SEQUENCE, &inner);
    }
    ber::write_tlv(out, ber::TAG_SEQUENCE, &list);
    Ok(())
}

fn decode_varbinds(reader: &mut Reader<'_>) -> Result<Vec<VarBind>> {
    let mut list = reader.read_sequence()?;
    let mut varbinds = Vec::new();
    while !list.is_empty() {
        let mut vb = list.read_sequence()?;
        let oid = Oid(vb.read_oid()?);
        let (tag, content) = vb.read_any()?;
        varbinds.push(VarBind::new(oid, Value::decode(tag, content)?));
    }
    Ok(varbinds)
}

impl Message {
    pub fn new(version: Version, community: impl Into<Vec<u8>>, pdu: Pdu) -> Self {
        Self {
            version,
            community: community.into(),
            pdu: MessagePdu::Pdu(pdu),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        ber::write_tlv(
            &mut body,
            ber::TAG_INTEGER,
            &ber::encode_signed(self.version.wire()),
        );
        ber::write_tlv(&mut body, ber::TAG_OCTET_STRING, &self.community);

        let mut pdu_body = Vec::new();
        let tag = match &self.pdu {
            MessagePdu::Pdu(pdu) => {
                ber::write_tlv(
                    &mut pdu_body,
                    ber::TAG_INTEGER,
                    &ber::encode_signed(i64::from(pdu.request_id)),
                );
                ber::write_tlv(&mut pdu_body, ber::TAG_INTEGER, &ber::encode_signed(pdu.error_status));
                ber::write_tlv(&mut pdu_body, ber::TAG_INTEGER, &ber::encode_signed(pdu.error_index));
                encode_varbinds(&pdu.varbinds, &mut pdu_body)?;
                pdu.pdu_type.tag()
            }
            MessagePdu::TrapV1(trap) => {
                ber::write_tlv(&mut pdu_body, ber::TAG_OID, &ber::encode_oid(trap.enterprise.subids())?);
                ber::write_tlv(&mut pdu_body, ber::TAG_IPADDRESS, &trap.agent_addr.octets());
                ber::write_tlv(&mut pdu_body, ber::TAG_INTEGER, &ber::encode_signed(trap.generic_trap));
                ber::write_tlv(&mut pdu_body, ber::TAG_INTEGER, &ber::encode_signed(trap.specific_trap));
                ber::write_tlv(
                    &mut pdu_body,
                    ber::TAG_TIMETICKS,
                    &ber::encode_unsigned(u64::from(trap.timestamp)),
                );
                encode_varbinds(&trap.varbinds, &mut pdu_body)?;
                TAG_TRAP_V1
            }
        };
        ber::write_tlv(&mut body, tag, &pdu_body);

        let mut out = Vec::with_capacity(body.len() + 4);
        ber::write_tlv(&mut out, ber::TAG_SEQUENCE, &body);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut outer = Reader::new(bytes);
        let mut msg = outer.read_sequence()?;
        let version = match msg.read_integer()? {
            0 => Version::V1,
            1 => Version::V2c,
            other => return Err(SnmpError::UnsupportedVersion(other)),
        };
        let community = msg.read_octet_string()?.to_vec();
        let (tag, content) = msg.read_any()?;
        let mut body = Reader::new(content);

        let pdu = if tag == TAG_TRAP_V1 {
            let enterprise = Oid(body.read_oid()?);
            let addr = body.read_tagged(ber::TAG_IPADDRESS, "IpAddress")?;
            let octets: [u8; 4] = addr
                .try_into()
                .map_err(|_| SnmpError::malformed("agent-addr must be 4 octets"))?;
            let generic_trap = body.read_integer()?;
            let specific_trap = body.read_integer()?;
            let ticks = ber::decode_unsigned(body.read_tagged(ber::TAG_TIMETICKS, "TimeTicks")?)?;
            MessagePdu::TrapV1(TrapV1Pdu {
                enterprise,
                agent_addr: Ipv4Addr::from(octets),
                generic_trap,
                specific_trap,
                timestamp: u32::try_from(ticks)
                    .map_err(|_| SnmpError::malformed("time-stamp out of range"))?,
                varbinds: decode_varbinds(&mut body)?,
            })
        } else {
            let pdu_type = PduType::from_tag(tag).ok_or(SnmpError::UnexpectedTag {
                expected: "PDU",
                found: tag,
            })?;
            let request_id = i32::try_from(body.read_integer()?)
                .map_err(|_| SnmpError::malformed("request-id out of range"))?;
            MessagePdu::Pdu(Pdu {
                pdu_type,
                request_id,
                error_status: body.read_integer()?,
                error_index: body.read_integer()?,
                varbinds: decode_varbinds(&mut body)?,
            })
        };
        Ok(Self {
            version,
            community,
            pdu,
        })
    }
}
