//! IPC broker connecting the minion to its controller.
//!
//! The broker owns one [`Transport`](transport::Transport): either two gRPC
//! streams ([`transport::grpc`]) or a partitioned message log
//! ([`transport::message_log`], Kafka with the `kafka` feature). Inbound RPC
//! requests are reassembled if chunked and handed to the [`Dispatcher`];
//! sink messages enter through the [`Broker`]'s [`Sink`](minion_api::Sink)
//! implementation.

pub mod broker;
pub mod chunk;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod propagation;
pub mod reassembly;
pub mod transport;

pub use broker::Broker;
pub use dispatch::{Dispatcher, Responder};
pub use error::{BrokerError, Result};
pub use metrics::BrokerMetrics;
pub use reassembly::Reassembler;
pub use transport::grpc::{GrpcSettings, GrpcTransport, HEADERS_MODULE_ID};
pub use transport::message_log::{
    InMemoryLog, LogSettings, MessageLog, MessageLogTransport, Record, Topics,
};
pub use transport::{Identity, Transport};
