//! Protobuf messages and gRPC services used by the minion, generated from
//! `proto/` at build time.
//!
//! - [`ipc`]: stream transport envelopes and the `OpenNMSIpc` service
//! - [`kafka`]: message-log transport envelopes with chunk fields
//! - [`telemetry`]: telemetry envelope sent by the telemetry listeners
//! - [`flow`]: canonical flow document
//! - [`mdt`]: NX-OS dial-out service

pub mod ipc {
    #![allow(clippy::pedantic)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("org.opennms.core.ipc.grpc.common");
}

pub mod kafka {
    tonic::include_proto!("org.opennms.core.ipc.kafka");
}

pub mod telemetry {
    tonic::include_proto!("org.opennms.netmgt.telemetry.ipc");
}

pub mod flow {
    #![allow(clippy::doc_markdown)]
    tonic::include_proto!("org.opennms.flows");
}

pub mod mdt {
    #![allow(clippy::pedantic)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("mdt_dialout");
}

pub use flow::{Direction, FlowMessage, NetflowVersion, SamplingAlgorithm};
pub use ipc::{Empty, RpcRequestProto, RpcResponseProto, SinkMessage};
pub use kafka::{RpcMessageProto, SinkMessageProto};
pub use mdt::MdtDialoutArgs;
pub use telemetry::{TelemetryMessage, TelemetryMessageLog};

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use prost::Message;

    #[test]
    fn test_request_wire_fields() {
        let req = RpcRequestProto {
            rpc_id: "r".into(),
            module_id: "Echo".into(),
            expiration_time: 5,
            ..Default::default()
        };
        let bytes = req.encode_to_vec();
        // field 1 (rpc_id), length-delimited
        assert_eq!(&bytes[..3], &[0x0a, 0x01, b'r']);
        assert_eq!(RpcRequestProto::decode(bytes.as_slice()).unwrap(), req);
    }

    #[test]
    fn test_empty_encodes_to_nothing() {
        assert!(Empty {}.encode_to_vec().is_empty());
    }

    #[test]
    fn test_version_accessor() {
        let mut msg = FlowMessage::default();
        msg.set_netflow_version(NetflowVersion::V9);
        let decoded = FlowMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.netflow_version(), NetflowVersion::V9);
    }

    #[test]
    fn test_zero_wrapper_is_kept() {
        let msg = FlowMessage {
            num_bytes: Some(0),
            ..Default::default()
        };
        let decoded = FlowMessage::decode(msg.encode_to_vec().as_slice()).unwrap();
        assert_eq!(decoded.num_bytes, Some(0));
        assert_eq!(decoded.num_packets, None);
    }

    #[test]
    fn test_dialout_field_names() {
        let args = MdtDialoutArgs {
            req_id: 7,
            total_size: 3,
            ..Default::default()
        };
        // field 1 (ReqId) varint
        assert_eq!(&args.encode_to_vec()[..2], &[0x08, 0x07]);
    }

    #[test]
    fn test_service_names() {
        assert_eq!(
            ipc::open_nms_ipc_server::SERVICE_NAME,
            "org.opennms.core.ipc.grpc.common.OpenNMSIpc"
        );
        assert_eq!(
            mdt::g_rpc_mdt_dialout_server::SERVICE_NAME,
            "mdt_dialout.gRPCMdtDialout"
        );
    }
}
